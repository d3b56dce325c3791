use crate::{check_period, check_price, Indicator, IndicatorError};
use tickwise_core::{IndicatorKind, Sample};

/// Exponential Moving Average (EMA).
///
/// Seeded with the first price, then `α·price + (1-α)·prev` with
/// `α = 2 / (period + 1)`. No history is retained.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    alpha: f64,
    current: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Result<Self, IndicatorError> {
        let period = check_period(IndicatorKind::Ema, period)?;
        Ok(Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            current: None,
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn next(&mut self, price: f64) -> Result<Option<f64>, IndicatorError> {
        let price = check_price(IndicatorKind::Ema, price)?;
        let ema = match self.current {
            None => price,
            Some(prev) => self.alpha * price + (1.0 - self.alpha) * prev,
        };
        self.current = Some(ema);
        Ok(self.current)
    }

    pub fn value(&self) -> Option<f64> {
        self.current
    }
}

impl Indicator for Ema {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Ema
    }

    fn update(&mut self, sample: &Sample) -> Result<Option<f64>, IndicatorError> {
        self.next(sample.price)
    }

    fn current_value(&self) -> Option<f64> {
        self.current
    }

    fn reset(&mut self) {
        self.current = None;
    }

    fn warmup_period(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_seed() {
        let mut ema = Ema::new(3).unwrap();
        assert_eq!(ema.period(), 3);
        assert_eq!(ema.alpha(), 0.5);
        assert_eq!(ema.next(2.0).unwrap(), Some(2.0));
        // α = 0.5 → 0.5·4 + 0.5·2 = 3
        assert_eq!(ema.next(4.0).unwrap(), Some(3.0));
        assert_eq!(ema.next(8.0).unwrap(), Some(5.5));
    }

    #[test]
    fn test_ema_constant_input_converges() {
        let mut ema = Ema::new(20).unwrap();
        let mut last = None;
        for i in 1..=25 {
            last = ema.next(100.0).unwrap();
            if i >= 20 {
                assert!((last.unwrap() - 100.0).abs() < 0.01);
            }
        }
        assert!((last.unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_ema_converges_after_level_shift() {
        let mut ema = Ema::new(10).unwrap();
        ema.next(0.0).unwrap();
        // Error shrinks by (1-α) per update: (9/11)^n · 50 < 0.01 once n >= 43.
        let mut value = 0.0;
        for _ in 0..43 {
            value = ema.next(50.0).unwrap().unwrap();
        }
        assert!((value - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_ema_peek_is_idempotent() {
        let mut ema = Ema::new(5).unwrap();
        ema.next(10.0).unwrap();
        let a = ema.current_value();
        let b = ema.current_value();
        assert_eq!(a, b);
        assert!(ema.next(f64::NAN).is_err());
        assert_eq!(ema.current_value(), a);
    }
}
