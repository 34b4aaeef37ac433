use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("no response from server: {0}")]
    NoResponse(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no active session")]
    NoSession,

    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("push channel error: {0}")]
    Channel(String),
}

impl SyncError {
    /// Build a `Server` error from a non-2xx response body.
    ///
    /// The message is taken from the body when it carries one
    /// (`message`, `error.message` or a bare `error` string), otherwise
    /// from the status line.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let message = extract_message(body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.as_str().to_string())
        });
        SyncError::Server {
            status: status.as_u16(),
            message,
        }
    }

    /// True for failures where the server never answered.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::NoResponse(_))
    }
}

fn extract_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    let candidate = json
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| json.pointer("/error/message").and_then(Value::as_str))
        .or_else(|| json.get("error").and_then(Value::as_str))?;
    let trimmed = candidate.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl From<reqwest_middleware::Error> for SyncError {
    fn from(e: reqwest_middleware::Error) -> Self {
        SyncError::NoResponse(e.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SyncError::Malformed(e.to_string())
        } else {
            SyncError::NoResponse(e.to_string())
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
