//! Failure taxonomy of the bridge, with its HTTP mapping.
//!
//! Every remote failure is converted where it happens and carried up as one
//! of these kinds; nothing is retried and nothing is swallowed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Config file missing, unreadable, or not valid JSON.
    #[error("configuration unavailable: {0}")]
    ConfigUnavailable(String),

    /// SSH rejected the key or the credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Private key absent at the resolved path.
    #[error("SSH key not found at {0}. Ensure the key exists and the path is correct.")]
    KeyNotFound(String),

    /// Any other SSH-layer failure (network, protocol, timeout).
    #[error("SSH error: {0}")]
    Transport(String),

    /// Generic virtualization-layer failure.
    #[error("failed to query ESXi/vCenter: {0}")]
    Directory(String),

    /// The control plane refused the credentials or the operation.
    #[error("permission denied for ESXi/vCenter: {0}")]
    PermissionDenied(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    NotLinux(String),

    #[error("{0}")]
    NoIpReported(String),

    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl BridgeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            BridgeError::NotLinux(_) => StatusCode::BAD_REQUEST,
            BridgeError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            BridgeError::KeyNotFound(_)
            | BridgeError::NotFound(_)
            | BridgeError::NoIpReported(_) => StatusCode::NOT_FOUND,
            BridgeError::ConfigUnavailable(_)
            | BridgeError::Transport(_)
            | BridgeError::Directory(_)
            | BridgeError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let body = Json(serde_json::json!({ "detail": self.to_string() }));
        (code, body).into_response()
    }
}
