use thiserror::Error;

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("missing API key: set the {0} environment variable")]
    MissingApiKey(&'static str),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(&'static str),

    #[error("provider request timed out")]
    Timeout,
}

impl LLMError {
    /// Transient failures that may succeed on a later attempt: rate limits,
    /// server-side errors, timeouts and dropped connections. Auth failures,
    /// bad requests and malformed payloads are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            LLMError::Status { status, .. } => {
                matches!(*status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            LLMError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            LLMError::Timeout => true,
            _ => false,
        }
    }
}
