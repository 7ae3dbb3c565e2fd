use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Login(#[from] LoginError),

    #[error("Session token rejected by the server")]
    Unauthorized,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Request rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Server unavailable (HTTP {status}), try again later")]
    Transient { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Token storage failed: {0}")]
    Storage(String),

    #[error("ICS generation failed: {0}")]
    IcsGeneration(String),

    #[error("Network timeout")]
    Timeout,
}

/// Outcome of a failed session exchange, shared by every caller that joined it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    /// The backend refused the credentials; carries the backend's message.
    #[error("{0}")]
    Rejected(String),

    /// Network failure or server error after retries were exhausted.
    #[error("Login failed, please try again")]
    Unavailable(String),

    /// Another exchange with different credentials is already in flight.
    #[error("Another login is already in progress")]
    Busy,

    /// The exchange was abandoned, either by logout or by dropping the caller.
    #[error("Login was cancelled")]
    Cancelled,

    #[error("Failed to store credentials: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Maximum length for error response bodies kept in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl Error {
    /// Map a non-success HTTP status and its body text to an error.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = truncate_body(body);
        match status.as_u16() {
            401 => Self::Unauthorized,
            code @ 500..=599 => Self::Transient {
                status: code,
                message,
            },
            code => Self::Rejected {
                status: code,
                message,
            },
        }
    }

    /// Whether the failure is worth showing as a generic "try again" state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. }
                | Self::Timeout
                | Self::Http(_)
                | Self::Login(LoginError::Unavailable(_))
        )
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}
