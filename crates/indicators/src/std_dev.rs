use crate::ring_buffer::RollingSum;
use crate::{check_period, check_price, Indicator, IndicatorError};
use tickwise_core::{IndicatorKind, Sample};

/// Rolling population standard deviation of price.
///
/// Uses the window's running sum of squares, so each update is O(1).
#[derive(Debug, Clone)]
pub struct StdDev {
    len: usize,
    window: RollingSum,
}

impl StdDev {
    pub fn new(period: usize) -> Result<Self, IndicatorError> {
        let len = check_period(IndicatorKind::StdDev, period)?;
        let window = RollingSum::new(len)
            .map_err(|_| IndicatorError::InvalidPeriod { indicator: IndicatorKind::StdDev })?;
        Ok(Self { len, window })
    }

    pub fn next(&mut self, price: f64) -> Result<Option<f64>, IndicatorError> {
        let price = check_price(IndicatorKind::StdDev, price)?;
        self.window.push(price).map_err(|_| IndicatorError::NonFinite {
            indicator: IndicatorKind::StdDev,
            field: "price",
            value: price,
        })?;
        Ok(self.value())
    }

    pub fn value(&self) -> Option<f64> {
        if !self.window.is_full() {
            return None;
        }
        self.window.variance().map(f64::sqrt)
    }

    /// Mean of the current window, the middle Bollinger band.
    pub fn mean(&self) -> Option<f64> {
        if self.window.is_full() {
            self.window.mean()
        } else {
            None
        }
    }
}

impl Indicator for StdDev {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::StdDev
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
