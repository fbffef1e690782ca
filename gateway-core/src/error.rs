use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Faults that escape the core. Per the propagation policy, upstream
/// non-2xx statuses are never converted into one of these; only
/// transport failures and malformed-body conditions are.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request body is not a JSON object with a messages field")]
    MalformedBody,

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("invalid upstream response: {0}")]
    ResponseFormat(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("failed to serialize request body: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
