use crate::ring_buffer::WeightedRollingSum;
use crate::{check_period, check_price, Indicator, IndicatorError};
use chrono::{DateTime, Utc};
use tickwise_core::{IndicatorKind, Sample};

/// Weight given to the first sample, which has no predecessor to measure
/// elapsed time against. One scheduler tick.
pub const NOMINAL_WEIGHT_SECS: f64 = 1.0;

/// Time Weighted Price Average (TWPA).
///
/// Each price is weighted by the seconds elapsed since the previous sample.
/// Output is `Σ(price·weight) / Σ(weight)` over the last `period` samples.
#[derive(Debug, Clone)]
pub struct Twpa {
    len: usize,
    window: WeightedRollingSum,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Twpa {
    pub fn new(period: usize) -> Result<Self, IndicatorError> {
        let len = check_period(IndicatorKind::Twpa, period)?;
        let window = WeightedRollingSum::new(len)
            .map_err(|_| IndicatorError::InvalidPeriod { indicator: IndicatorKind::Twpa })?;
        Ok(Self {
            len,
            window,
            last_timestamp: None,
        })
    }

    /// Feed a price with an explicit duration weight (seconds).
    pub fn next_weighted(&mut self, price: f64, weight: f64) -> Result<Option<f64>, IndicatorError> {
        let price = check_price(IndicatorKind::Twpa, price)?;
        if !weight.is_finite() {
            return Err(IndicatorError::NonFinite {
                indicator: IndicatorKind::Twpa,
                field: "weight",
                value: weight,
            });
        }
        if weight < 0.0 {
            return Err(IndicatorError::NegativeWeight {
                indicator: IndicatorKind::Twpa,
                value: weight,
            });
        }

        self.window
            .push(price, weight)
            .map_err(|_| IndicatorError::NegativeWeight {
                indicator: IndicatorKind::Twpa,
                value: weight,
            })?;
        Ok(self.value())
    }

    pub fn value(&self) -> Option<f64> {
        if self.window.count() < self.len {
            return None;
        }
        self.window.weighted_mean()
    }

    fn weight_for(&self, timestamp: DateTime<Utc>) -> Result<f64, IndicatorError> {
        match self.last_timestamp {
            None => Ok(NOMINAL_WEIGHT_SECS),
            Some(previous) if timestamp < previous => Err(IndicatorError::TimestampRegression {
                indicator: IndicatorKind::Twpa,
                previous,
                current: timestamp,
            }),
            Some(previous) => {
                let elapsed = timestamp - previous;
                Ok(elapsed.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0)
            }
        }
    }
}

impl Indicator for Twpa {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Twpa
    }

    fn update(&mut self, sample: &Sample) -> Result<Option<f64>, IndicatorError> {
        let weight = self.weight_for(sample.timestamp)?;
        let out = self.next_weighted(sample.price, weight)?;
        self.last_timestamp = Some(sample.timestamp);
        Ok(out)
    }

    fn current_value(&self) -> Option<f64> {
        self.value()
    }

    fn reset(&mut self) {
        self.window.clear();
        self.last_timestamp = None;
    }

    fn warmup_period(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_twpa_warmup_exact() {
        let mut twpa = Twpa::new(3).unwrap();
        assert_eq!(twpa.next_weighted(10.0, 1.0).unwrap(), None);
        assert_eq!(twpa.next_weighted(20.0, 1.0).unwrap(), None);
        assert_eq!(twpa.next_weighted(30.0, 2.0).unwrap(), Some(22.5));
    }

    #[test]
    fn test_twpa_weights_from_timestamps() {
        let mut twpa = Twpa::new(2).unwrap();
        let s1 = Sample::new("BTC_USDT", 100.0, 1.0, at(0));
        let s2 = Sample::new("BTC_USDT", 200.0, 1.0, at(3));
        assert_eq!(twpa.update(&s1).unwrap(), None);
        // weights: 1s nominal for the first sample, 3s elapsed for the second
        assert_eq!(twpa.update(&s2).unwrap(), Some((100.0 + 600.0) / 4.0));
    }

    #[test]
    fn test_twpa_zero_total_weight() {
        let mut twpa = Twpa::new(2).unwrap();
        twpa.next_weighted(10.0, 0.0).unwrap();
        assert_eq!(twpa.next_weighted(20.0, 0.0).unwrap(), None);
    }

    #[test]
    fn test_twpa_rejects_timestamp_regression() {
        let mut twpa = Twpa::new(2).unwrap();
        twpa.update(&Sample::new("X", 1.0, 0.0, at(10))).unwrap();
        let err = twpa
            .update(&Sample::new("X", 2.0, 0.0, at(10) - Duration::seconds(1)))
            .unwrap_err();
        assert!(matches!(err, IndicatorError::TimestampRegression { .. }));
        // The rejected sample leaves state untouched
        assert_eq!(twpa.update(&Sample::new("X", 3.0, 0.0, at(12))).unwrap(), Some(7.0 / 3.0));
    }
}
