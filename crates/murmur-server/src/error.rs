use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use murmur_shared::ProtocolError;
use murmur_store::StoreError;

use crate::collaborators::CollaboratorError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl RelayError {
    /// Text safe to show to the client that triggered the failure.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Store(_) => "Session store unavailable".to_string(),
            RelayError::Collaborator(_) => "Upstream service unavailable".to_string(),
            RelayError::Protocol(e) => e.to_string(),
            RelayError::BadRequest(_) => self.to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::Collaborator(_) => StatusCode::BAD_GATEWAY,
            RelayError::Protocol(_) | RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        let body = serde_json::json!({
            "error": self.client_message(),
        });

        (status, axum::Json(body)).into_response()
    }
}
