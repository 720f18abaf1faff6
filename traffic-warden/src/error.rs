//! Error kinds shared by the warden components

/// Errors raised by provider, chat and persistence collaborators
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    #[error("server listing failed for credential {credential}: {reason}")]
    Fetch { credential: String, reason: String },

    #[error("shutdown failed for server {server_id}: {reason}")]
    Shutdown { server_id: u64, reason: String },

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("chat API returned {status}: {body}")]
    Chat { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WardenError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, WardenError::MessageNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
