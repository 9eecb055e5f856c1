#![forbid(unsafe_code)]

use cmloop_core::env;
use web_time::Duration;

/// Environment variable overriding [`DispatcherConfig::max_registrations`].
pub const ENV_MAX_REGISTRATIONS: &str = "CMLOOP_MAX_REGISTRATIONS";
/// Environment variable overriding [`DispatcherConfig::max_poll_wait`], in milliseconds.
pub const ENV_MAX_POLL_WAIT_MS: &str = "CMLOOP_MAX_POLL_WAIT_MS";

/// Dispatcher limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Maximum live registrations per registry (timeouts, idles, descriptor
    /// sources each). Registering beyond it fails with `CapacityExceeded`.
    /// Default: 65 536.
    pub max_registrations: usize,

    /// Upper bound on a single poll. `None` lets the poll block until the
    /// next deadline, or indefinitely.
    /// Default: `None`.
    pub max_poll_wait: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_registrations: 65_536,
            max_poll_wait: None,
        }
    }
}

impl DispatcherConfig {
    /// Defaults overridden by `CMLOOP_MAX_REGISTRATIONS` and
    /// `CMLOOP_MAX_POLL_WAIT_MS`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(limit) = env::read::<usize>(ENV_MAX_REGISTRATIONS) {
            config.max_registrations = limit;
        }
        if let Some(wait) = env::read_millis(ENV_MAX_POLL_WAIT_MS) {
            config.max_poll_wait = Some(wait);
        }
        config
    }

    #[must_use]
    pub fn with_max_registrations(mut self, limit: usize) -> Self {
        self.max_registrations = limit;
        self
    }

    #[must_use]
    pub fn with_max_poll_wait(mut self, wait: Duration) -> Self {
        self.max_poll_wait = Some(wait);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.max_registrations, 65_536);
        assert_eq!(config.max_poll_wait, None);
    }

    #[test]
    fn builders_override_fields() {
        let config = DispatcherConfig::default()
            .with_max_registrations(8)
            .with_max_poll_wait(Duration::from_millis(25));
        assert_eq!(config.max_registrations, 8);
        assert_eq!(config.max_poll_wait, Some(Duration::from_millis(25)));
    }
}
