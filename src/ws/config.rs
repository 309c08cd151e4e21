#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::backoff::Constant;

use crate::Result;
use crate::error::Error;

const DEFAULT_RECONNECT_DELAY_DURATION: Duration = Duration::from_millis(1000);
const DEFAULT_MESSAGE_CAPACITY: usize = 1024;

/// Largest accepted [`Config::message_capacity`]. The broadcast buffer is allocated up
/// front, one slot per message.
pub const MAX_MESSAGE_CAPACITY: usize = 1 << 20;

/// Configuration for WebSocket connection manager behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
    /// Number of inbound messages buffered per subscriber before it is reported as lagged
    pub message_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
        }
    }
}

impl Config {
    /// Check that the configuration can be turned into a running manager.
    pub fn validate(&self) -> Result<()> {
        if self.message_capacity > MAX_MESSAGE_CAPACITY {
            return Err(Error::validation(format!(
                "message_capacity {} exceeds the maximum of {MAX_MESSAGE_CAPACITY}",
                self.message_capacity
            )));
        }

        Ok(())
    }
}

/// Configuration for automatic reconnection behavior.
///
/// Retries happen at a fixed interval. There is no exponential growth between
/// attempts, and with the default `max_attempts` of `None` the manager keeps
/// retrying for as long as a target URL is set.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay between an unexpected disconnect and the next connection attempt
    pub delay: Duration,
    /// Maximum number of consecutive failed attempts before giving up.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY_DURATION,
            max_attempts: None, // Infinite reconnection by default
        }
    }
}

impl From<ReconnectConfig> for Constant {
    fn from(config: ReconnectConfig) -> Self {
        Constant::new(config.delay)
    }
}

#[cfg(test)]
mod tests {
    use backoff::backoff::Backoff as _;

    use super::*;

    #[test]
    fn default_delay_is_one_second() {
        let config = Config::default();
        assert_eq!(config.reconnect.delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_attempts, None);
    }

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn message_capacity_bounds() {
        let mut config = Config::default();

        config.message_capacity = MAX_MESSAGE_CAPACITY;
        config.validate().unwrap();

        config.message_capacity = MAX_MESSAGE_CAPACITY + 1;
        let error = config.validate().unwrap_err();
        assert_eq!(error.kind(), crate::error::Kind::Validation);
    }

    #[test]
    fn constant_schedule_never_grows() {
        let config = ReconnectConfig {
            delay: Duration::from_millis(250),
            max_attempts: None,
        };
        let mut schedule: Constant = config.into();

        for _ in 0..10 {
            assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(250)));
        }
    }
}
