//! Pipeline configuration.

use std::time::Duration;

use crate::error::ConfigError;

/// Broker and retry settings for the email pipeline.
///
/// Loaded once at startup and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Where the broker lives, e.g. `mem://` or `rocksdb://./data/queue`.
    pub broker_uri: String,
    pub work_queue: String,
    pub dead_letter_queue: String,
    /// Retries after the first attempt before a message is dead-lettered.
    pub max_retries: u32,
    /// How long a failed message waits before it is republished.
    pub retry_delay: Duration,
    /// Number of consumers pulling from the work queue.
    pub workers: usize,
    /// Idle wait between fetches on an empty queue.
    pub poll_interval: Duration,
    /// Upper bound on one extraction attempt. Expiry counts as a failure.
    pub extraction_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            broker_uri: "mem://".to_string(),
            work_queue: "email_events".to_string(),
            dead_letter_queue: "email_events_dlq".to_string(),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            workers: 1,
            poll_interval: Duration::from_millis(100),
            extraction_timeout: None,
        }
    }
}

impl QueueConfig {
    pub fn with_broker_uri(mut self, uri: impl Into<String>) -> Self {
        self.broker_uri = uri.into();
        self
    }

    pub fn with_queues(mut self, work: impl Into<String>, dead_letter: impl Into<String>) -> Self {
        self.work_queue = work.into();
        self.dead_letter_queue = dead_letter.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// At least one worker always runs.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = Some(timeout);
        self
    }

    /// Read settings from `MAIL2CAL_*` variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let workers = parse_env::<usize>("MAIL2CAL_WORKERS")?.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                var: "MAIL2CAL_WORKERS",
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }

        Ok(Self {
            broker_uri: read_env("MAIL2CAL_BROKER_URI")?.unwrap_or(defaults.broker_uri),
            work_queue: read_env("MAIL2CAL_WORK_QUEUE")?.unwrap_or(defaults.work_queue),
            dead_letter_queue: read_env("MAIL2CAL_DEAD_LETTER_QUEUE")?
                .unwrap_or(defaults.dead_letter_queue),
            max_retries: parse_env("MAIL2CAL_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            retry_delay: parse_env("MAIL2CAL_RETRY_DELAY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_delay),
            workers,
            poll_interval: parse_env("MAIL2CAL_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            extraction_timeout: parse_env("MAIL2CAL_EXTRACTION_TIMEOUT_SECS")?
                .map(Duration::from_secs),
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn read_env(var: &'static str) -> Result<Option<String>, ConfigError> {
    match std::env::var(var) {
        Ok(v) => Ok(non_empty(v)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(source) => Err(ConfigError::Env { var, source }),
    }
}

fn parse_env<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = read_env(var)? else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = QueueConfig::default();
        assert_eq!(config.broker_uri, "mem://");
        assert_eq!(config.work_queue, "email_events");
        assert_eq!(config.dead_letter_queue, "email_events_dlq");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.workers, 1);
        assert_eq!(config.extraction_timeout, None);
    }

    #[test]
    fn builder_keeps_one_worker_minimum() {
        let config = QueueConfig::default()
            .with_workers(0)
            .with_queues("in", "in_dead")
            .with_retry_delay(Duration::from_millis(10));
        assert_eq!(config.workers, 1);
        assert_eq!(config.work_queue, "in");
        assert_eq!(config.dead_letter_queue, "in_dead");
    }

    #[test]
    fn parse_helper_reports_bad_values() {
        assert_eq!(non_empty("  ".into()), None);
        assert_eq!(non_empty(" x ".into()), Some("x".into()));
        assert!(matches!(
            parse_env::<u32>("MAIL2CAL_TEST_UNSET_VARIABLE"),
            Ok(None)
        ));
    }
}
