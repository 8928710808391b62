//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into
//! services as `Arc<CoreConfig>`. The intent is to avoid reading
//! process-wide environment variables during request handling or task
//! execution, which can lead to inconsistent behaviour in multi-threaded
//! runtimes and test harnesses.

use crate::{CoreError, CoreResult};
use std::time::Duration;

/// Default SSE heartbeat interval: one comment frame per 30 s of
/// inactivity.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Default lookback window for the vitals monitoring scan.
pub const DEFAULT_VITALS_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Default retention for delivered/failed notifications, in days.
pub const DEFAULT_NOTIFICATION_RETENTION_DAYS: i64 = 90;

/// Default retry ceiling for task executions and notification delivery.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between task retries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    heartbeat_interval: Duration,
    vitals_window: Duration,
    notification_retention_days: i64,
    default_max_retries: u32,
    retry_delay: Duration,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    /// Returns `CoreError::InvalidInput` if any interval is zero or the
    /// retention window is not positive.
    pub fn new(
        heartbeat_interval: Duration,
        vitals_window: Duration,
        notification_retention_days: i64,
        default_max_retries: u32,
        retry_delay: Duration,
    ) -> CoreResult<Self> {
        if heartbeat_interval.is_zero() {
            return Err(CoreError::InvalidInput(
                "heartbeat_interval must be positive".into(),
            ));
        }
        if vitals_window.is_zero() {
            return Err(CoreError::InvalidInput(
                "vitals_window must be positive".into(),
            ));
        }
        if notification_retention_days <= 0 {
            return Err(CoreError::InvalidInput(
                "notification_retention_days must be positive".into(),
            ));
        }

        Ok(Self {
            heartbeat_interval,
            vitals_window,
            notification_retention_days,
            default_max_retries,
            retry_delay,
        })
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn vitals_window(&self) -> Duration {
        self.vitals_window
    }

    pub fn notification_retention_days(&self) -> i64 {
        self.notification_retention_days
    }

    pub fn default_max_retries(&self) -> u32 {
        self.default_max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT,
            vitals_window: DEFAULT_VITALS_WINDOW,
            notification_retention_days: DEFAULT_NOTIFICATION_RETENTION_DAYS,
            default_max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Parse a duration in whole seconds from an optional environment value.
///
/// `None` or an empty/whitespace value falls back to `default`.
pub fn duration_secs_from_env_value(
    value: Option<String>,
    default: Duration,
) -> CoreResult<Duration> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    match value {
        None => Ok(default),
        Some(v) => {
            let secs: u64 = v
                .parse()
                .map_err(|_| CoreError::InvalidInput(format!("invalid duration seconds: {v}")))?;
            if secs == 0 {
                return Err(CoreError::InvalidInput(
                    "duration seconds must be positive".into(),
                ));
            }
            Ok(Duration::from_secs(secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_standard_intervals() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(cfg.vitals_window(), Duration::from_secs(300));
        assert_eq!(cfg.notification_retention_days(), 90);
    }

    #[test]
    fn rejects_zero_heartbeat() {
        let err = CoreConfig::new(
            Duration::ZERO,
            DEFAULT_VITALS_WINDOW,
            DEFAULT_NOTIFICATION_RETENTION_DAYS,
            DEFAULT_MAX_RETRIES,
            DEFAULT_RETRY_DELAY,
        )
        .expect_err("zero heartbeat should be rejected");
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn env_value_parsing_falls_back_to_default() {
        let parsed = duration_secs_from_env_value(None, DEFAULT_HEARTBEAT)
            .expect("None should fall back to default");
        assert_eq!(parsed, DEFAULT_HEARTBEAT);

        let parsed = duration_secs_from_env_value(Some("  ".into()), DEFAULT_HEARTBEAT)
            .expect("blank should fall back to default");
        assert_eq!(parsed, DEFAULT_HEARTBEAT);

        let parsed = duration_secs_from_env_value(Some("15".into()), DEFAULT_HEARTBEAT)
            .expect("valid value should parse");
        assert_eq!(parsed, Duration::from_secs(15));

        duration_secs_from_env_value(Some("abc".into()), DEFAULT_HEARTBEAT)
            .expect_err("non-numeric value should be rejected");
    }
}
