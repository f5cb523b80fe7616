//! Mutating admission webhook
//!
//! Intercepts Pod CREATE requests and injects the CIDR-scoped network
//! sidecar. Decoding failures are answered with HTTP 400; everything after
//! decoding produces an admission decision (allow with patch, or deny with a
//! reason).

pub mod patch;
pub mod pod;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tracing::warn;

pub use patch::{build_patch, PatchError, PatchMode};
pub use pod::{MutationEngine, MutationError, Stage};

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Mutation engine with its collaborators
    pub engine: MutationEngine,
}

impl WebhookState {
    /// Create a new webhook state around the given engine
    pub fn new(engine: MutationEngine) -> Self {
        Self { engine }
    }
}

/// Error for requests that never reach an admission decision
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The body is not a JSON admission review
    #[error("undecodable admission review: {0}")]
    Decode(#[from] serde_json::Error),

    /// The admission review decoded but is unusable (e.g. no request)
    #[error("invalid admission review: {0}")]
    InvalidReview(String),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        warn!(error = %self, "Rejecting malformed admission review");
        StatusCode::BAD_REQUEST.into_response()
    }
}

/// Create the webhook router
///
/// - POST /mutate - Pod mutation
/// - GET /healthz - Liveness probe
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(pod::mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
