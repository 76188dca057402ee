use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use panel_core::PanelError;

// ---------------------------------------------------------------------------
// Internal sentinels for statuses PanelError does not model
// ---------------------------------------------------------------------------

/// Carries an explicit HTTP 404 through the `anyhow::Error` chain.
#[derive(Debug)]
struct NotFoundError(String);

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for NotFoundError {}

/// Carries an explicit HTTP 502 through the `anyhow::Error` chain.
#[derive(Debug)]
struct BadGatewayError(String);

impl std::fmt::Display for BadGatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadGatewayError {}

// ---------------------------------------------------------------------------
// AppError — unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 404 Not Found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(NotFoundError(msg.into()).into())
    }

    /// Construct a 502 Bad Gateway error (broken collaborator output).
    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self(BadGatewayError(msg.into()).into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(n) = self.0.downcast_ref::<NotFoundError>() {
            let body = serde_json::json!({ "error": n.0.clone() });
            return (StatusCode::NOT_FOUND, axum::Json(body)).into_response();
        }
        if let Some(g) = self.0.downcast_ref::<BadGatewayError>() {
            let body = serde_json::json!({ "error": g.0.clone() });
            return (StatusCode::BAD_GATEWAY, axum::Json(body)).into_response();
        }

        let status = if let Some(e) = self.0.downcast_ref::<PanelError>() {
            match e {
                PanelError::RepoNotAllowed(_)
                | PanelError::InvalidBranch(_)
                | PanelError::InvalidRoutine(_)
                | PanelError::EmptyPatch => StatusCode::BAD_REQUEST,
                PanelError::JobNotFound(_)
                | PanelError::SessionNotFound(_)
                | PanelError::AuditArtifactNotFound(_) => StatusCode::NOT_FOUND,
                PanelError::ProtectedBranch(_) | PanelError::PatchConflict(_) => {
                    StatusCode::CONFLICT
                }
                PanelError::InvalidToken
                | PanelError::RoutinesDisabled
                | PanelError::ActorTokenRejected => StatusCode::FORBIDDEN,
                PanelError::Spawn { .. }
                | PanelError::Timeout(_)
                | PanelError::ToolOutput(_)
                | PanelError::Io(_)
                | PanelError::Yaml(_)
                | PanelError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
