use crate::ring_buffer::WeightedRollingSum;
use crate::{check_price, check_volume, Indicator, IndicatorError};
use tickwise_core::{IndicatorKind, Sample};

#[derive(Debug, Clone)]
enum VwapState {
    /// Since construction or the last `reset()`.
    Cumulative { price_volume: f64, volume: f64 },
    /// Last `n` (price, volume) pairs.
    Rolling(WeightedRollingSum),
}

/// Volume Weighted Average Price (VWAP).
///
/// Cumulative by default; call `reset()` at session boundaries. With a
/// window it tracks the last `n` samples instead.
#[derive(Debug, Clone)]
pub struct Vwap {
    window: Option<usize>,
    state: VwapState,
    current: Option<f64>,
}

impl Vwap {
    pub fn new(window: Option<usize>) -> Result<Self, IndicatorError> {
        let state = match window {
            None => VwapState::Cumulative {
                price_volume: 0.0,
                volume: 0.0,
            },
            Some(n) => VwapState::Rolling(
                WeightedRollingSum::new(n)
                    .map_err(|_| IndicatorError::InvalidWindow { indicator: IndicatorKind::Vwap })?,
            ),
        };
        Ok(Self {
            window,
            state,
            current: None,
        })
    }

    pub fn cumulative() -> Self {
        Self {
            window: None,
            state: VwapState::Cumulative {
                price_volume: 0.0,
                volume: 0.0,
            },
            current: None,
        }
    }

    pub fn window(&self) -> Option<usize> {
        self.window
    }

    /// Feed a price and traded volume.
    pub fn next_with(&mut self, price: f64, volume: f64) -> Result<Option<f64>, IndicatorError> {
        let price = check_price(IndicatorKind::Vwap, price)?;
        let volume = check_volume(IndicatorKind::Vwap, volume)?;

        self.current = match &mut self.state {
            VwapState::Cumulative {
                price_volume,
                volume: total,
            } => {
                *price_volume += price * volume;
                *total += volume;
                if *total > 0.0 {
                    Some(*price_volume / *total)
                } else {
                    None
                }
            }
            VwapState::Rolling(acc) => {
                acc.push(price, volume).map_err(|_| IndicatorError::NonFinite {
                    indicator: IndicatorKind::Vwap,
                    field: "price·volume",
                    value: price * volume,
                })?;
                acc.weighted_mean()
            }
        };

        Ok(self.current)
    }

    pub fn value(&self) -> Option<f64> {
        self.current
    }
}

impl Default for Vwap {
    fn default() -> Self {
        Self::cumulative()
    }
}

impl Indicator for Vwap {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Vwap
    }

    fn update(&mut self, sample: &Sample) -> Result<Option<f64>, IndicatorError> {
        self.next_with(sample.price, sample.volume)
    }

    fn current_value(&self) -> Option<f64> {
        self.current
    }

    fn reset(&mut self) {
        match &mut self.state {
            VwapState::Cumulative {
                price_volume,
                volume,
            } => {
                *price_volume = 0.0;
                *volume = 0.0;
            }
            VwapState::Rolling(acc) => acc.clear(),
        }
        self.current = None;
    }

    fn warmup_period(&self) -> usize {
        1
    }
}
