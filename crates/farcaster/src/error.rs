use thiserror::Error;

/// Errors returned by the Farcaster gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network failure or timeout on a physical call. Never retried.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The upstream asked us to slow down.
    #[error("Rate limited by upstream: {url}")]
    RateLimited { url: String },

    #[error("Upstream returned {status} for {url}: {body}")]
    Upstream {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Retry limit exceeded after {attempts} attempts: {url}")]
    RetryExhausted { attempts: u32, url: String },

    #[error("Farcaster identity not configured")]
    NotConfigured,

    #[error("No data found: {0}")]
    NoDataFound(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl GatewayError {
    /// HTTP status reported by the upstream, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}
