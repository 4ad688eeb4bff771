//! Plugin error types

/// Failures raised by story backends
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    /// Backend unreachable or configuration invalid; fatal for the participant
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// Backend call failed; the same action may be retried
    #[error("backend error: {0}")]
    Backend(String),

    /// Action is not among the currently available ones
    #[error("invalid action {index}: {reason}")]
    InvalidAction {
        /// Offending index
        index: usize,
        /// Why it was rejected
        reason: String,
    },

    /// Operation called before `init_headless`
    #[error("plugin not initialized")]
    NotInitialized,

    /// Operation or plugin kind not supported
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl PluginError {
    /// Whether the same call may succeed if repeated
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}
