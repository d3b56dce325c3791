use crate::ring_buffer::RollingSum;
use crate::{check_period, check_price, Indicator, IndicatorError};
use tickwise_core::{IndicatorKind, Sample};

/// Simple Moving Average (SMA).
#[derive(Debug, Clone)]
pub struct Sma {
    len: usize,
    window: RollingSum,
}

impl Sma {
    pub fn new(period: usize) -> Result<Self, IndicatorError> {
        let len = check_period(IndicatorKind::Sma, period)?;
        let window = RollingSum::new(len)
            .map_err(|_| IndicatorError::InvalidPeriod { indicator: IndicatorKind::Sma })?;
        Ok(Self { len, window })
    }

    /// Feed a price directly.
    pub fn next(&mut self, price: f64) -> Result<Option<f64>, IndicatorError> {
        let price = check_price(IndicatorKind::Sma, price)?;
        self.window.push(price).map_err(|_| IndicatorError::NonFinite {
            indicator: IndicatorKind::Sma,
            field: "price",
            value: price,
        })?;
        Ok(self.value())
    }

    /// Get the current SMA value without feeding new data.
    pub fn value(&self) -> Option<f64> {
        if self.window.count() == self.len {
            Some(self.window.sum() / self.len as f64)
        } else {
            None
        }
    }
}

impl Indicator for Sma {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Sma
    }

    fn update(&mut self, sample: &Sample) -> Result<Option<f64>, IndicatorError> {
        self.next(sample.price)
    }

    fn current_value(&self) -> Option<f64> {
        self.value()
    }

    fn reset(&mut self) {
        self.window.clear();
    }

    fn warmup_period(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_sma_basic() {
        let mut sma = Sma::new(3).unwrap();
        let out: Vec<_> = [10.0, 20.0, 30.0, 40.0]
            .iter()
            .map(|p| sma.next(*p).unwrap())
            .collect();
        assert_eq!(out, vec![None, None, Some(20.0), Some(30.0)]);
    }

    #[test]
    fn test_sma_warmup_exact() {
        let period = 5;
        let mut sma = Sma::new(period).unwrap();
        for i in 1..period {
            assert_eq!(sma.next(i as f64).unwrap(), None, "update {}", i);
        }
        assert_eq!(sma.next(5.0).unwrap(), Some(3.0));
    }

    #[test]
    fn test_sma_reset() {
        let mut sma = Sma::new(2).unwrap();
        sma.next(10.0).unwrap();
        sma.next(20.0).unwrap();
        sma.reset();
        assert!(!sma.is_ready());
        assert_eq!(sma.next(5.0).unwrap(), None);
        assert_eq!(sma.next(15.0).unwrap(), Some(10.0));
    }

    #[test]
    fn test_sma_rejects_bad_input_without_mutating() {
        let mut sma = Sma::new(2).unwrap();
        sma.next(1.0).unwrap();
        assert!(sma.next(f64::NEG_INFINITY).is_err());
        assert_eq!(sma.next(3.0).unwrap(), Some(2.0));
        assert!(Sma::new(0).is_err());
    }

    #[test]
    fn test_sma_update_cost_independent_of_period() {
        fn time_updates(period: usize) -> std::time::Duration {
            let mut sma = Sma::new(period).unwrap();
            // Fill the window so every timed push also evicts.
            for i in 0..period {
                sma.next(i as f64).unwrap();
            }
            let start = Instant::now();
            for i in 0..200_000 {
                sma.next((i % 1_000) as f64).unwrap();
            }
            start.elapsed()
        }

        let small = time_updates(10);
        let large = time_updates(10_000);
        let ratio = large.as_secs_f64() / small.as_secs_f64().max(1e-9);
        assert!(ratio < 10.0, "period 10: {:?}, period 10000: {:?}", small, large);
    }
}
