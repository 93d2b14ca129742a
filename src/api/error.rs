use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response. `message` is the server's text with any leading
    /// status code removed.
    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Stream read failed: {0}")]
    StreamRead(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Server { status: 401 | 403, .. })
    }
}

/// Drop a leading `"<digits> "` status prefix from a server message.
pub fn strip_status_prefix(message: &str) -> &str {
    let digits = message.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return message;
    }
    let rest = &message[digits..];
    let trimmed = rest.trim_start();
    if trimmed.len() < rest.len() {
        trimmed
    } else {
        message
    }
}
