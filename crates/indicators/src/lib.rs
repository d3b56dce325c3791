pub mod ema;
pub mod ring_buffer;
pub mod rsi;
pub mod sma;
pub mod std_dev;
pub mod twpa;
pub mod vwap;

use chrono::{DateTime, Utc};
use tickwise_core::{IndicatorKind, IndicatorParams, Sample};

pub use ema::Ema;
pub use ring_buffer::{BufferError, RingBuffer, RollingSum, WeightedRollingSum};
pub use rsi::Rsi;
pub use sma::Sma;
pub use std_dev::StdDev;
pub use twpa::Twpa;
pub use vwap::Vwap;

/// Trait for streaming (incremental) indicators.
/// Feed one sample at a time; the indicator maintains internal state and
/// every update costs O(1) regardless of the configured period.
pub trait Indicator: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> IndicatorKind;

    /// Process the next sample and return the indicator output (if ready).
    fn update(&mut self, sample: &Sample) -> Result<Option<f64>, IndicatorError>;

    /// Current output without advancing state.
    fn current_value(&self) -> Option<f64>;

    /// Reset the indicator to its initial state.
    fn reset(&mut self);

    /// Number of samples needed before the indicator produces output.
    fn warmup_period(&self) -> usize;

    fn is_ready(&self) -> bool {
        self.current_value().is_some()
    }
}

/// Construction and input errors. Every variant names the indicator type
/// that raised it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndicatorError {
    #[error("{indicator}: period must be > 0")]
    InvalidPeriod { indicator: IndicatorKind },
    #[error("{indicator}: window must be > 0")]
    InvalidWindow { indicator: IndicatorKind },
    #[error("{indicator}: non-finite {field} ({value})")]
    NonFinite {
        indicator: IndicatorKind,
        field: &'static str,
        value: f64,
    },
    #[error("{indicator}: negative volume ({value})")]
    NegativeVolume { indicator: IndicatorKind, value: f64 },
    #[error("{indicator}: negative weight ({value})")]
    NegativeWeight { indicator: IndicatorKind, value: f64 },
    #[error("{indicator}: sample at {current} precedes previous sample at {previous}")]
    TimestampRegression {
        indicator: IndicatorKind,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },
}

impl IndicatorError {
    pub fn indicator(&self) -> IndicatorKind {
        match self {
            IndicatorError::InvalidPeriod { indicator }
            | IndicatorError::InvalidWindow { indicator }
            | IndicatorError::NonFinite { indicator, .. }
            | IndicatorError::NegativeVolume { indicator, .. }
            | IndicatorError::NegativeWeight { indicator, .. }
            | IndicatorError::TimestampRegression { indicator, .. } => *indicator,
        }
    }

    /// Configuration errors come from construction; everything else is bad input.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            IndicatorError::InvalidPeriod { .. } | IndicatorError::InvalidWindow { .. }
        )
    }
}

pub(crate) fn check_period(indicator: IndicatorKind, period: usize) -> Result<usize, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod { indicator });
    }
    Ok(period)
}

pub(crate) fn check_price(indicator: IndicatorKind, price: f64) -> Result<f64, IndicatorError> {
    if !price.is_finite() {
        return Err(IndicatorError::NonFinite {
            indicator,
            field: "price",
            value: price,
        });
    }
    Ok(price)
}

pub(crate) fn check_volume(indicator: IndicatorKind, volume: f64) -> Result<f64, IndicatorError> {
    if !volume.is_finite() {
        return Err(IndicatorError::NonFinite {
            indicator,
            field: "volume",
            value: volume,
        });
    }
    if volume < 0.0 {
        return Err(IndicatorError::NegativeVolume {
            indicator,
            value: volume,
        });
    }
    Ok(volume)
}

/// Build a boxed indicator from its parameter set.
pub fn build_indicator(params: &IndicatorParams) -> Result<Box<dyn Indicator>, IndicatorError> {
    let indicator: Box<dyn Indicator> = match *params {
        IndicatorParams::Ema { period } => Box::new(Ema::new(period)?),
        IndicatorParams::Sma { period } => Box::new(Sma::new(period)?),
        IndicatorParams::Vwap { window } => Box::new(Vwap::new(window)?),
        IndicatorParams::Rsi { period } => Box::new(Rsi::new(period)?),
        IndicatorParams::Twpa { period } => Box::new(Twpa::new(period)?),
        IndicatorParams::StdDev { period } => Box::new(StdDev::new(period)?),
    };
    Ok(indicator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_indicator_kinds() {
        let all = [
            IndicatorParams::Ema { period: 20 },
            IndicatorParams::Sma { period: 3 },
            IndicatorParams::Vwap { window: None },
            IndicatorParams::Vwap { window: Some(10) },
            IndicatorParams::Rsi { period: 14 },
            IndicatorParams::Twpa { period: 5 },
            IndicatorParams::StdDev { period: 20 },
        ];
        for params in all {
            let ind = build_indicator(&params).unwrap();
            assert_eq!(ind.kind(), params.kind());
            assert!(!ind.is_ready());
        }
    }

    #[test]
    fn test_build_indicator_rejects_zero_period() {
        let err = build_indicator(&IndicatorParams::Rsi { period: 0 }).unwrap_err();
        assert_eq!(err, IndicatorError::InvalidPeriod { indicator: IndicatorKind::Rsi });
        assert!(err.is_config());

        let err = build_indicator(&IndicatorParams::Vwap { window: Some(0) }).unwrap_err();
        assert_eq!(err.indicator(), IndicatorKind::Vwap);
    }

    #[test]
    fn test_input_errors_are_distinct_per_type() {
        let sample = Sample::new("BTC_USDT", f64::NAN, 1.0, Utc::now());
        let mut sma = build_indicator(&IndicatorParams::Sma { period: 3 }).unwrap();
        let mut ema = build_indicator(&IndicatorParams::Ema { period: 3 }).unwrap();
        let sma_err = sma.update(&sample).unwrap_err();
        let ema_err = ema.update(&sample).unwrap_err();
        assert_ne!(sma_err, ema_err);
        assert!(sma_err.to_string().starts_with("sma:"));
        assert!(!ema_err.is_config());
    }
}
