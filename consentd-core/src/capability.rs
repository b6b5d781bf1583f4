//! Per-operation capability table
//!
//! One table deciding who may act on a consent petition, consumed uniformly
//! by the request handlers. State conflicts (answered vs. unanswered) are the
//! store's concern, not this table's.

use crate::types::{Address, Consent};

/// Operations on a consent petition that require a relationship to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentAction {
    /// Answer the petition with a grant
    Respond,
    /// Remove an existing answer, reverting the petition to pending
    RetractResponse,
    /// Delete the petition itself
    Delete,
}

/// Typed allow/deny decision with a caller-facing reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: &'static str },
}

impl Decision {
    /// Whether the action was allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Convert a denial into an authorization error
    pub fn require(self) -> crate::Result<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny { reason } => {
                Err(crate::ConsentdError::Authorization(reason.to_string()))
            }
        }
    }
}

/// Decide whether `actor` may perform `action` on `consent`
pub fn authorize(action: ConsentAction, actor: &Address, consent: &Consent) -> Decision {
    match action {
        ConsentAction::Respond | ConsentAction::RetractResponse => {
            if actor.ct_eq(&consent.dataset_owner) {
                Decision::Allow
            } else {
                Decision::Deny {
                    reason: "only the dataset owner may answer a consent petition",
                }
            }
        }
        ConsentAction::Delete => {
            if actor.ct_eq(&consent.solicitor) {
                Decision::Allow
            } else {
                Decision::Deny {
                    reason: "only the solicitor may delete a consent petition",
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::PermissionMask;
    use crate::types::{AssetDid, ConsentId};
    use chrono::Utc;

    fn consent(owner: Address, solicitor: Address) -> Consent {
        Consent {
            id: ConsentId::new(),
            dataset: AssetDid::new("did:op:dataset").unwrap(),
            dataset_owner: owner,
            algorithm: AssetDid::new("did:op:algorithm").unwrap(),
            algorithm_owner: owner,
            solicitor,
            request: PermissionMask::from_raw(0b001).unwrap(),
            reason: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_only_dataset_owner_may_respond() {
        let owner = Address::from_bytes([1u8; 20]);
        let solicitor = Address::from_bytes([2u8; 20]);
        let c = consent(owner, solicitor);

        assert!(authorize(ConsentAction::Respond, &owner, &c).is_allowed());
        assert!(!authorize(ConsentAction::Respond, &solicitor, &c).is_allowed());
        assert!(authorize(ConsentAction::RetractResponse, &owner, &c).is_allowed());
        assert!(!authorize(ConsentAction::RetractResponse, &solicitor, &c).is_allowed());
    }

    #[test]
    fn test_only_solicitor_may_delete() {
        let owner = Address::from_bytes([1u8; 20]);
        let solicitor = Address::from_bytes([2u8; 20]);
        let c = consent(owner, solicitor);

        assert!(authorize(ConsentAction::Delete, &solicitor, &c).is_allowed());
        assert!(!authorize(ConsentAction::Delete, &owner, &c).is_allowed());
    }

    #[test]
    fn test_denial_converts_to_authorization_error() {
        let owner = Address::from_bytes([1u8; 20]);
        let solicitor = Address::from_bytes([2u8; 20]);
        let c = consent(owner, solicitor);

        let err = authorize(ConsentAction::Respond, &solicitor, &c)
            .require()
            .unwrap_err();
        assert!(matches!(err, crate::ConsentdError::Authorization(_)));
    }
}
