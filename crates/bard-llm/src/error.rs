//! Gateway error taxonomy

/// Failures surfaced by a chat gateway
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// No API key configured for the provider
    #[error("missing credentials for {provider}")]
    MissingCredentials {
        /// Provider name
        provider: String,
    },

    /// Upstream rejected the credentials (401/403)
    #[error("authentication rejected by {provider}: {message}")]
    Auth {
        /// Provider name
        provider: String,
        /// Upstream message
        message: String,
    },

    /// Upstream throttled the request (429)
    #[error("rate limited by {provider}")]
    RateLimited {
        /// Provider name
        provider: String,
    },

    /// Request exceeded its timeout
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout
        timeout_ms: u64,
    },

    /// Any other non-2xx upstream response
    #[error("upstream returned {status}: {body}")]
    Upstream {
        /// HTTP status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// Response body did not match the provider schema
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    /// Connection-level failure
    #[error("network error: {0}")]
    Network(String),
}

impl GatewayError {
    /// Timeouts are fatal for a session; the executor never retries them
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Worth retrying at a higher level (not inside a session)
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) => true,
            Self::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(GatewayError::Timeout { timeout_ms: 10 }.is_timeout());
        assert!(GatewayError::Upstream { status: 503, body: String::new() }.is_transient());
        assert!(!GatewayError::Upstream { status: 400, body: String::new() }.is_transient());
        assert!(!GatewayError::MissingCredentials { provider: "openai".into() }.is_transient());
    }
}
