//! HTTP surface: routes, JSON bodies and the mapping from library errors to status codes.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use zklogin_core::{
    AddressRequest, BackendKind, ErrorKind, NonceRequest, ProofOrchestrator, ProofOutcome,
    ProofPoints, ProofRequest, ProofResult, ZkLoginError,
};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The proof orchestrator, which also owns the key store.
    pub orchestrator: Arc<ProofOrchestrator>,
}

/// Error body returned for every failed request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    code: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend_used: Option<BackendKind>,
}

/// A library error on its way out as an HTTP response.
///
/// Validation failures are the caller's fault (400); everything after validation is ours (500).
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    fn with_context(mut self, address: Option<String>, backend_used: Option<BackendKind>) -> Self {
        self.body.address = address;
        self.body.backend_used = backend_used;
        self
    }
}

impl From<ZkLoginError> for ApiError {
    fn from(err: ZkLoginError) -> Self {
        let status = if err.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            body: ErrorBody {
                error: err.to_string(),
                code: err.kind(),
                detail: err.detail(),
                address: None,
                backend_used: None,
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ZkLoginError::InvalidInput {
            attribute: "body".to_string(),
            reason: rejection.body_text(),
        }
        .into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProofResponse {
    proof: ProofPoints,
    address: String,
    backend_used: BackendKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    iss_base64_details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    header_base64: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    mode: &'static str,
    backend: BackendKind,
    backends: Vec<BackendKind>,
    timestamp: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    session_id: String,
    extended_ephemeral_public_key: String,
    public_key: String,
    expires_at: u64,
}

#[derive(Debug, Serialize)]
struct NonceResponse {
    nonce: String,
}

#[derive(Debug, Serialize)]
struct AddressResponse {
    address: String,
}

/// Builds the router. `allowed_origins` containing `*` allows any origin.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/generate-proof", post(generate_proof))
        .route("/health", get(health))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", delete(delete_session))
        .route("/nonce", post(compute_nonce))
        .route("/address", post(derive_address))
        .layer(cors(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    if allowed_origins.iter().any(|origin| origin.trim() == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn generate_proof(
    State(state): State<AppState>,
    payload: Result<Json<ProofRequest>, JsonRejection>,
) -> Result<Json<ProofResponse>, ApiError> {
    let Json(request) = payload?;
    debug!(?request, "proof request received");

    let ProofResult {
        backend_used,
        address,
        outcome,
    } = state.orchestrator.generate_proof(&request).await;

    match (outcome, backend_used) {
        (ProofOutcome::Success(proof), Some(backend_used)) => Ok(Json(ProofResponse {
            proof: proof.proof_points,
            address: address.unwrap_or_default(),
            backend_used,
            iss_base64_details: proof.iss_base64_details,
            header_base64: proof.header_base64,
        })),
        (ProofOutcome::Success(_), None) => Err(ApiError::from(ZkLoginError::Internal(
            "proof produced without a backend".to_string(),
        ))),
        (ProofOutcome::Failure(err), backend_used) => {
            Err(ApiError::from(err).with_context(address, backend_used))
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.orchestrator.registry();
    let mode = if registry.contains(BackendKind::Mock) {
        "development"
    } else {
        "production"
    };
    Json(HealthResponse {
        status: "ok",
        mode,
        backend: registry.default_kind(),
        backends: registry.kinds(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let request: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| ZkLoginError::InvalidInput {
            attribute: "body".to_string(),
            reason: err.to_string(),
        })?
    };

    let ttl = match request.ttl_seconds {
        Some(0) => {
            return Err(ZkLoginError::InvalidInput {
                attribute: "ttlSeconds".to_string(),
                reason: "must be positive".to_string(),
            }
            .into())
        }
        ttl => ttl.map(Duration::from_secs),
    };

    let issued = state.orchestrator.issue_session(ttl);
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id: issued.session_id,
            extended_ephemeral_public_key: issued.public_key.to_extended_base64(),
            public_key: issued.public_key.to_base64(),
            expires_at: issued.expires_at,
        }),
    ))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.orchestrator.end_session(&session_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::from(ZkLoginError::SessionNotFound).with_status(StatusCode::NOT_FOUND))
    }
}

async fn compute_nonce(
    State(state): State<AppState>,
    payload: Result<Json<NonceRequest>, JsonRejection>,
) -> Result<Json<NonceResponse>, ApiError> {
    let Json(request) = payload?;
    let nonce = state.orchestrator.compute_nonce(&request)?;
    Ok(Json(NonceResponse { nonce }))
}

async fn derive_address(
    State(state): State<AppState>,
    payload: Result<Json<AddressRequest>, JsonRejection>,
) -> Result<Json<AddressResponse>, ApiError> {
    let Json(request) = payload?;
    let address = state.orchestrator.derive_address(&request)?;
    Ok(Json(AddressResponse { address }))
}

/// Periodically drops expired sessions until the returned task is aborted.
pub fn spawn_sweeper(orchestrator: Arc<ProofOrchestrator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = orchestrator.sweep_expired_sessions();
            if removed > 0 {
                info!(removed, "swept expired sessions");
            }
        }
    })
}
