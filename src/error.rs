use thiserror::Error;

/// Errors surfaced by the HTTP API and the event transport.
///
/// The timeline branches on these: `SessionExpired` asks the caller to
/// re-authenticate, every other variant ends the turn as a stream error.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("session expired, please log in again")]
    SessionExpired,

    #[error("request failed ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ClientError::SessionExpired)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::InvalidResponse(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}
