//! Grant validation and consent status derivation
//!
//! A grant may never exceed its request, and the status of an answered
//! petition is a pure function of (request, grant). The atomic persistence
//! of a response lives in the engine; callers there run `evaluate_response`
//! before any write.

use crate::flags::PermissionMask;
use crate::types::ConsentStatus;

/// Reject any grant carrying a flag that was never requested
pub fn validate_grant(request: PermissionMask, grant: PermissionMask) -> crate::Result<()> {
    if !grant.is_subset_of(&request) {
        return Err(crate::ConsentdError::Validation(format!(
            "granted bitmask {} has bits not marked in requested {}",
            grant.raw(),
            request.raw()
        )));
    }
    Ok(())
}

/// Derive the status of an answered petition.
///
/// An empty request derives Accepted: nothing was asked, so nothing need be
/// granted (see DESIGN.md).
pub fn derive_status(request: PermissionMask, grant: PermissionMask) -> ConsentStatus {
    if grant == request {
        ConsentStatus::Accepted
    } else if grant.is_empty() {
        ConsentStatus::Denied
    } else {
        ConsentStatus::Resolved
    }
}

/// Validate a grant against its request and derive the resulting status
pub fn evaluate_response(
    request: PermissionMask,
    grant: PermissionMask,
) -> crate::Result<ConsentStatus> {
    validate_grant(request, grant)?;
    Ok(derive_status(request, grant))
}
