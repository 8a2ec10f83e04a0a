//! # Collaborator Error Types
//!
//! Failures raised by calls to the LLM endpoint. The classifier never
//! surfaces these to users: each operation falls back to its default.

/// Error raised by a collaborator call
#[derive(Debug, Clone)]
pub enum ServiceError {
    /// The call did not finish within its deadline
    Timeout(String),
    /// Transport or HTTP status failure
    Http(String),
    /// The collaborator answered with something we could not interpret
    InvalidResponse(String),
    /// The circuit breaker is open and the call was not attempted
    CircuitOpen,
}

impl ServiceError {
    /// Whether repeating the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Timeout(_) | ServiceError::Http(_))
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Timeout(msg) => write!(f, "Timeout error: {msg}"),
            ServiceError::Http(msg) => write!(f, "HTTP error: {msg}"),
            ServiceError::InvalidResponse(msg) => write!(f, "Invalid response: {msg}"),
            ServiceError::CircuitOpen => write!(f, "Circuit breaker is open"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout(err.to_string())
        } else if err.is_decode() {
            ServiceError::InvalidResponse(err.to_string())
        } else {
            ServiceError::Http(err.to_string())
        }
    }
}
