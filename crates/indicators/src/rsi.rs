use crate::{check_period, check_price, Indicator, IndicatorError};
use tickwise_core::{IndicatorKind, Sample};

/// Relative Strength Index (RSI).
/// Uses Wilder's smoothing for average gain/loss.
///
/// The first `period` price changes are averaged to seed the smoothing; the
/// seed is accumulated as two running sums so no change history is kept.
#[derive(Debug, Clone)]
pub struct Rsi {
    len: usize,
    prev_value: Option<f64>,
    seed_gain: f64,
    seed_loss: f64,
    avg_gain: Option<f64>,
    avg_loss: Option<f64>,
    count: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Result<Self, IndicatorError> {
        let len = check_period(IndicatorKind::Rsi, period)?;
        Ok(Self {
            len,
            prev_value: None,
            seed_gain: 0.0,
            seed_loss: 0.0,
            avg_gain: None,
            avg_loss: None,
            count: 0,
        })
    }

    pub fn next(&mut self, price: f64) -> Result<Option<f64>, IndicatorError> {
        let price = check_price(IndicatorKind::Rsi, price)?;

        if let Some(prev) = self.prev_value {
            let change = price - prev;
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);
            self.count += 1;

            match (self.avg_gain, self.avg_loss) {
                (Some(ag), Some(al)) => {
                    // Wilder's smoothing
                    let n = self.len as f64;
                    self.avg_gain = Some((ag * (n - 1.0) + gain) / n);
                    self.avg_loss = Some((al * (n - 1.0) + loss) / n);
                }
                _ => {
                    self.seed_gain += gain;
                    self.seed_loss += loss;
                    if self.count >= self.len {
                        let n = self.len as f64;
                        self.avg_gain = Some(self.seed_gain / n);
                        self.avg_loss = Some(self.seed_loss / n);
                    }
                }
            }
        }

        self.prev_value = Some(price);
        Ok(self.value())
    }

    pub fn value(&self) -> Option<f64> {
        match (self.avg_gain, self.avg_loss) {
            (Some(ag), Some(al)) => {
                if al <= 0.0 {
                    Some(100.0)
                } else {
                    let rs = ag / al;
                    Some((100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0))
                }
            }
            _ => None,
        }
    }
}

impl Indicator for Rsi {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Rsi
    }

    fn update(&mut self, sample: &Sample) -> Result<Option<f64>, IndicatorError> {
        self.next(sample.price)
    }

    fn current_value(&self) -> Option<f64> {
        self.value()
    }

    fn reset(&mut self) {
        self.prev_value = None;
        self.seed_gain = 0.0;
        self.seed_loss = 0.0;
        self.avg_gain = None;
        self.avg_loss = None;
        self.count = 0;
    }

    fn warmup_period(&self) -> usize {
        self.len + 1 // need one extra data point for the first change
    }
}
