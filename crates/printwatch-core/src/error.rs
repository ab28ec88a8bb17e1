use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
    #[error("monitor must be created inside a tokio runtime")]
    NoRuntime,
}

impl MonitorError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}
