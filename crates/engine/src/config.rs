use serde::{Deserialize, Serialize};
use std::time::Duration;
use tickwise_core::{ConfigError, IndicatorSpec};

/// Tick loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fixed tick length. Deadlines are `origin + k * tick_interval`.
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Batching and persistence settings.
///
/// Single-row inserts into the time-series store are roughly two orders of
/// magnitude slower than one bulk insert, so rows are batched until
/// `flush_max_rows` or `flush_max_age_ms` is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Hand the tick batch to the writer once it holds this many rows.
    pub flush_max_rows: usize,
    /// ...or once its oldest row is this old.
    pub flush_max_age_ms: u64,
    /// Hard ceiling on rows held in memory awaiting a successful flush.
    /// Beyond it the oldest rows are dropped with a warning.
    pub max_pending_rows: usize,
    /// Capacity of the scheduler → writer channel, in batches.
    pub channel_capacity: usize,
    /// Delay between retries while a flush keeps failing.
    pub retry_interval_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            flush_max_rows: 5_000,
            flush_max_age_ms: 5_000,
            max_pending_rows: 500_000,
            channel_capacity: 64,
            retry_interval_ms: 2_000,
        }
    }
}

impl WriterConfig {
    pub fn flush_max_age(&self) -> Duration {
        Duration::from_millis(self.flush_max_age_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Everything the engine needs besides its collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub writer: WriterConfig,
    /// Registered on startup.
    pub indicators: Vec<IndicatorSpec>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.tick_interval_ms == 0 {
            return Err(invalid("scheduler.tick_interval_ms", "must be > 0"));
        }
        if self.writer.flush_max_rows == 0 {
            return Err(invalid("writer.flush_max_rows", "must be > 0"));
        }
        if self.writer.max_pending_rows < self.writer.flush_max_rows {
            return Err(invalid(
                "writer.max_pending_rows",
                "must be >= writer.flush_max_rows",
            ));
        }
        if self.writer.channel_capacity == 0 {
            return Err(invalid("writer.channel_capacity", "must be > 0"));
        }
        if self.writer.retry_interval_ms == 0 {
            return Err(invalid("writer.retry_interval_ms", "must be > 0"));
        }
        for spec in &self.indicators {
            spec.validate()?;
        }
        Ok(())
    }
}

fn invalid(field: &'static str, message: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        field,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickwise_core::IndicatorParams;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_rejects_ceiling_below_flush_threshold() {
        let mut config = EngineConfig::default();
        config.writer.max_pending_rows = 10;
        config.writer.flush_max_rows = 100;
        match config.validate() {
            Err(ConfigError::InvalidSetting { field, .. }) => assert_eq!(field, "writer.max_pending_rows"),
            other => panic!("Expected invalid setting, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_indicator() {
        let config = EngineConfig {
            indicators: vec![IndicatorSpec::new("BTC_USDT", IndicatorParams::Sma { period: 0 })],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
