//! HTTP request handlers for the consentd server

use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info, warn};

use consentd_core::auth::format_timestamp;
use consentd_core::capability::{self, ConsentAction};
use consentd_core::flags::PermissionInput;
use consentd_core::negotiation;
use consentd_core::*;
use consentd_engine::{NewConsent, StorageEngine};

use crate::auth::AuthenticationOrchestrator;
use crate::registry::AssetRegistry;

type BoxBody = Full<bytes::Bytes>;

/// Shared state handed to every request
pub struct AppState {
    pub engine: StorageEngine,
    pub auth: AuthenticationOrchestrator,
    pub registry: Arc<dyn AssetRegistry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChallengeRequest {
    address: String,
    chain_id: u64,
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    address: String,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct CreateConsentRequest {
    dataset: String,
    algorithm: String,
    request: PermissionInput,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RespondRequest {
    permitted: PermissionInput,
    reason: Option<String>,
}

/// Main request handler
pub async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> std::result::Result<Response<BoxBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("Handling {} {}", method, path);

    match route(req, &state).await {
        Ok(response) => {
            info!("{} {} -> {}", method, path, response.status());
            Ok(response)
        }
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                warn!("{} {} failed: {}", method, path, e);
            } else {
                debug!("{} {} rejected: {}", method, path, e);
            }
            Ok(json_response(status, json!({ "error": e.to_string() })))
        }
    }
}

async fn route(
    req: Request<hyper::body::Incoming>,
    state: &AppState,
) -> Result<Response<BoxBody>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (&method, path.as_str()) {
        (&Method::GET, "/health") => handle_health(),
        (&Method::POST, "/v1/auth/challenge") => handle_challenge(req, state).await,
        (&Method::POST, "/v1/auth/verify") => handle_verify(req, state).await,
        (&Method::POST, "/v1/consents") => handle_create_consent(req, state).await,
        _ => match parse_consent_path(&path) {
            Some((id, tail)) => match (&method, tail) {
                (&Method::GET, None) => handle_get_consent(id, state),
                (&Method::DELETE, None) => handle_delete_consent(&req, id, state),
                (&Method::POST, Some("response")) => handle_respond(req, id, state).await,
                (&Method::DELETE, Some("response")) => handle_retract(&req, id, state),
                _ => Err(ConsentdError::NotFound(format!(
                    "no route for {} {}",
                    method, path
                ))),
            },
            None => Err(ConsentdError::NotFound(format!(
                "no route for {} {}",
                method, path
            ))),
        },
    }
}

/// Health check handler
fn handle_health() -> Result<Response<BoxBody>> {
    Ok(json_response(
        StatusCode::OK,
        json!({
            "status": "healthy",
            "version": "0.1.0",
            "service": "consentd"
        }),
    ))
}

/// Challenge issuance: always succeeds for a well-formed address, always
/// supersedes any outstanding challenge
async fn handle_challenge(
    req: Request<hyper::body::Incoming>,
    state: &AppState,
) -> Result<Response<BoxBody>> {
    let body: ChallengeRequest = read_json(req).await?;
    let address = Address::parse(&body.address)?;

    let challenge = state.auth.issue_challenge(&address, body.chain_id)?;
    Ok(json_response(StatusCode::OK, serde_json::to_value(challenge)?))
}

/// Challenge verification: 400 for a missing or expired nonce (inherited
/// mapping), 401 when the signature does not match the claimed address
async fn handle_verify(
    req: Request<hyper::body::Incoming>,
    state: &AppState,
) -> Result<Response<BoxBody>> {
    let body: VerifyRequest = read_json(req).await?;
    let address = Address::parse(&body.address)?;

    match state.auth.verify(&address, &body.signature) {
        Ok(session) => Ok(json_response(StatusCode::OK, serde_json::to_value(session)?)),
        Err(e @ (ConsentdError::NotFound(_) | ConsentdError::Expired(_))) => Ok(json_response(
            StatusCode::BAD_REQUEST,
            json!({ "error": e.to_string() }),
        )),
        Err(e) => Err(e),
    }
}

/// Create a consent petition, resolving both asset owners through the
/// registry and materialising their identities
async fn handle_create_consent(
    req: Request<hyper::body::Incoming>,
    state: &AppState,
) -> Result<Response<BoxBody>> {
    let session = bearer_session(&req, state)?;
    let body: CreateConsentRequest = read_json(req).await?;

    let dataset = AssetDid::new(&body.dataset)?;
    let algorithm = AssetDid::new(&body.algorithm)?;
    let request = body.request.parse()?;

    let dataset_owner = state.registry.resolve_owner(&dataset).await?;
    let algorithm_owner = state.registry.resolve_owner(&algorithm).await?;

    state.engine.identities().get_or_create(&session.address)?;
    state.engine.identities().get_or_create(&dataset_owner.address)?;
    state.engine.identities().get_or_create(&algorithm_owner.address)?;

    let consent = state.engine.consents().create(NewConsent {
        dataset,
        dataset_owner: dataset_owner.address,
        algorithm,
        algorithm_owner: algorithm_owner.address,
        solicitor: session.address,
        request,
        reason: body.reason.unwrap_or_default(),
    })?;

    let response = state.engine.consents().response(consent.id)?;
    Ok(json_response(
        StatusCode::CREATED,
        consent_view(&consent, response.as_ref()),
    ))
}

/// Fetch a consent petition with its derived status
fn handle_get_consent(id: ConsentId, state: &AppState) -> Result<Response<BoxBody>> {
    let consent = state.engine.consents().get(id)?;
    let response = state.engine.consents().response(id)?;
    Ok(json_response(
        StatusCode::OK,
        consent_view(&consent, response.as_ref()),
    ))
}

/// Delete an unanswered petition; only its solicitor may do so
fn handle_delete_consent(
    req: &Request<hyper::body::Incoming>,
    id: ConsentId,
    state: &AppState,
) -> Result<Response<BoxBody>> {
    let session = bearer_session(req, state)?;
    let consent = state.engine.consents().get(id)?;

    capability::authorize(ConsentAction::Delete, &session.address, &consent).require()?;

    state.engine.consents().delete(id)?;
    Ok(empty_response(StatusCode::NO_CONTENT))
}

/// Answer a petition; only the dataset owner may do so, exactly once
async fn handle_respond(
    req: Request<hyper::body::Incoming>,
    id: ConsentId,
    state: &AppState,
) -> Result<Response<BoxBody>> {
    let session = bearer_session(&req, state)?;
    let body: RespondRequest = read_json(req).await?;

    let consent = state.engine.consents().get(id)?;
    capability::authorize(ConsentAction::Respond, &session.address, &consent).require()?;

    let permitted = body.permitted.parse()?;
    state
        .engine
        .consents()
        .respond(id, permitted, body.reason.unwrap_or_default())?;

    let response = state.engine.consents().response(id)?;
    Ok(json_response(
        StatusCode::CREATED,
        consent_view(&consent, response.as_ref()),
    ))
}

/// Remove the answer to a petition, reverting it to pending
fn handle_retract(
    req: &Request<hyper::body::Incoming>,
    id: ConsentId,
    state: &AppState,
) -> Result<Response<BoxBody>> {
    let session = bearer_session(req, state)?;
    let consent = state.engine.consents().get(id)?;

    capability::authorize(ConsentAction::RetractResponse, &session.address, &consent).require()?;

    state.engine.consents().retract(id)?;
    Ok(empty_response(StatusCode::NO_CONTENT))
}

/// Extract and validate the bearer token
fn bearer_session(
    req: &Request<hyper::body::Incoming>,
    state: &AppState,
) -> Result<consentd_core::auth::WalletSession> {
    let header = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            ConsentdError::Authentication("authentication credentials were not provided".to_string())
        })?;

    let token = header.strip_prefix("Bearer ").ok_or_else(|| {
        ConsentdError::Authentication("authorization header is not a bearer token".to_string())
    })?;

    state.auth.authenticate(token)
}

/// Read and deserialize a JSON request body
async fn read_json<T: serde::de::DeserializeOwned>(
    req: Request<hyper::body::Incoming>,
) -> Result<T> {
    let bytes = req
        .collect()
        .await
        .map_err(|_| ConsentdError::Validation("failed to read request body".to_string()))?
        .to_bytes();

    serde_json::from_slice(&bytes)
        .map_err(|e| ConsentdError::Validation(format!("invalid JSON body: {}", e)))
}

/// Parse "/v1/consents/{id}" and "/v1/consents/{id}/response"
fn parse_consent_path(path: &str) -> Option<(ConsentId, Option<&str>)> {
    let rest = path.strip_prefix("/v1/consents/")?;

    let (id_part, tail) = match rest.split_once('/') {
        Some((id, tail)) => (id, Some(tail)),
        None => (rest, None),
    };

    if id_part.is_empty() {
        return None;
    }

    let id = ConsentId::parse(id_part).ok()?;
    Some((id, tail))
}

/// Map the error taxonomy to HTTP statuses
fn status_for(error: &ConsentdError) -> StatusCode {
    match error {
        ConsentdError::Validation(_) | ConsentdError::Expired(_) => StatusCode::BAD_REQUEST,
        ConsentdError::Authentication(_) => StatusCode::UNAUTHORIZED,
        ConsentdError::Authorization(_) => StatusCode::FORBIDDEN,
        ConsentdError::NotFound(_) => StatusCode::NOT_FOUND,
        ConsentdError::Conflict(_) => StatusCode::CONFLICT,
        ConsentdError::Storage(_)
        | ConsentdError::Serialization(_)
        | ConsentdError::Io(_)
        | ConsentdError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Render a consent petition with its derived status. Masks go out in the
/// canonical object-of-true-flags form, addresses in checksum form.
fn consent_view(
    consent: &Consent,
    response: Option<&ConsentResponse>,
) -> serde_json::Value {
    let status = match response {
        Some(r) => negotiation::derive_status(consent.request, r.permitted),
        None => ConsentStatus::Pending,
    };

    json!({
        "id": consent.id.to_string(),
        "createdAt": format_timestamp(consent.created_at),
        "dataset": consent.dataset.as_str(),
        "datasetOwner": consent.dataset_owner.to_checksum(),
        "algorithm": consent.algorithm.as_str(),
        "algorithmOwner": consent.algorithm_owner.to_checksum(),
        "solicitor": consent.solicitor.to_checksum(),
        "reason": consent.reason,
        "request": consent.request.granted_flags(),
        "status": status.to_string(),
        "response": response.map(|r| json!({
            "permitted": r.permitted.granted_flags(),
            "reason": r.reason,
            "status": status.to_string(),
            "respondedAt": format_timestamp(r.responded_at),
        })),
    })
}

/// Simple JSON response builder
fn json_response(status: StatusCode, body: serde_json::Value) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .header("server", "consentd/0.1.0")
        .body(Full::new(bytes::Bytes::from(body.to_string())))
        .unwrap()
}

/// Empty response for deletions
fn empty_response(status: StatusCode) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("server", "consentd/0.1.0")
        .body(Full::new(bytes::Bytes::new()))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use consentd_core::flags::PermissionMask;

    #[test]
    fn test_parse_consent_path() {
        let id = ConsentId::new();

        let path = format!("/v1/consents/{}", id);
        let (parsed, tail) = parse_consent_path(&path).unwrap();
        assert_eq!(parsed, id);
        assert!(tail.is_none());

        let path = format!("/v1/consents/{}/response", id);
        let (parsed, tail) = parse_consent_path(&path).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(tail, Some("response"));

        // Invalid paths
        assert!(parse_consent_path("/v1/consents/").is_none());
        assert!(parse_consent_path("/v1/consents/not-a-ulid").is_none());
        assert!(parse_consent_path("/v1/other").is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&ConsentdError::Validation(String::new())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ConsentdError::Expired(String::new())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ConsentdError::Authentication(String::new())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&ConsentdError::Authorization(String::new())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&ConsentdError::NotFound(String::new())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&ConsentdError::Conflict(String::new())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&ConsentdError::Storage(String::new())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_consent_view_shape() {
        let consent = Consent {
            id: ConsentId::new(),
            dataset: AssetDid::new("did:op:dataset").unwrap(),
            dataset_owner: Address::from_bytes([1u8; 20]),
            algorithm: AssetDid::new("did:op:algorithm").unwrap(),
            algorithm_owner: Address::from_bytes([2u8; 20]),
            solicitor: Address::from_bytes([3u8; 20]),
            request: PermissionMask::from_raw(0b011).unwrap(),
            reason: "training".to_string(),
            created_at: Utc::now(),
        };

        let view = consent_view(&consent, None);
        assert_eq!(view["status"], "Pending");
        assert!(view["response"].is_null());
        assert_eq!(view["request"]["trusted_algorithm_publisher"], true);
        assert_eq!(view["request"]["trusted_algorithm"], true);
        // Unset flags are omitted from the canonical form
        assert!(view["request"].get("allow_network_access").is_none());

        let response = ConsentResponse {
            consent: consent.id,
            permitted: PermissionMask::from_raw(0b001).unwrap(),
            reason: "publisher only".to_string(),
            responded_at: Utc::now(),
        };

        let view = consent_view(&consent, Some(&response));
        assert_eq!(view["status"], "Resolved");
        assert_eq!(view["response"]["status"], "Resolved");
        assert_eq!(view["response"]["permitted"]["trusted_algorithm_publisher"], true);
    }
}
