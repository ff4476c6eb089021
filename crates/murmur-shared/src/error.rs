use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown transport event: {0}")]
    UnknownEvent(String),

    #[error("Unknown action type: {0}")]
    UnknownAction(String),

    #[error("Malformed {action} payload: {reason}")]
    Malformed { action: String, reason: String },
}
