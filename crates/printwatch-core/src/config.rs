use std::time::Duration;

use crate::error::MonitorError;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub auto_start: bool,
    pub query_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            auto_start: true,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

impl MonitorConfig {
    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        validate_interval(self.poll_interval_secs)?;
        if self.query_timeout.is_zero() {
            return Err(MonitorError::invalid("query timeout must be non-zero"));
        }
        Ok(())
    }
}

pub(crate) fn validate_interval(secs: u64) -> Result<(), MonitorError> {
    if secs < 1 {
        return Err(MonitorError::invalid(format!(
            "poll interval must be at least 1 second, got {secs}"
        )));
    }
    Ok(())
}
