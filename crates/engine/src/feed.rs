use std::collections::HashMap;
use std::sync::Mutex;
use tickwise_core::{FeedError, Sample, SampleFeed};
use tracing::debug;

#[derive(Debug)]
struct Slot {
    sample: Sample,
    /// Not yet handed to the scheduler.
    fresh: bool,
}

/// In-memory latest-value feed.
///
/// Ingestion (HTTP, replay, an exchange stream) calls `publish`; the
/// scheduler pulls at most one sample per symbol per tick. Intermediate
/// samples published within one tick are superseded by the newest one.
#[derive(Debug, Default)]
pub struct LatestSampleFeed {
    slots: Mutex<HashMap<String, Slot>>,
}

impl LatestSampleFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `sample` as the newest for its symbol. Samples older than the
    /// one already held are ignored; returns whether it was accepted.
    pub fn publish(&self, sample: Sample) -> Result<bool, FeedError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| FeedError::Unavailable("feed lock poisoned".to_string()))?;

        if let Some(slot) = slots.get(&sample.symbol) {
            if sample.timestamp < slot.sample.timestamp {
                debug!(symbol = %sample.symbol, "Ignoring out-of-order sample");
                return Ok(false);
            }
        }

        slots.insert(
            sample.symbol.clone(),
            Slot {
                sample,
                fresh: true,
            },
        );
        Ok(true)
    }

    /// Symbols that have published at least once.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = match self.slots.lock() {
            Ok(slots) => slots.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        symbols.sort();
        symbols
    }
}

impl SampleFeed for LatestSampleFeed {
    fn latest_sample(&self, symbol: &str) -> Result<Option<Sample>, FeedError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| FeedError::Unavailable("feed lock poisoned".to_string()))?;

        Ok(slots.get_mut(symbol).and_then(|slot| {
            if slot.fresh {
                slot.fresh = false;
                Some(slot.sample.clone())
            } else {
                None
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_latest_sample_once_per_publish() {
        let feed = LatestSampleFeed::new();
        let now = Utc::now();
        feed.publish(Sample::new("BTC_USDT", 100.0, 1.0, now)).unwrap();
        feed.publish(Sample::new("BTC_USDT", 101.0, 1.0, now + Duration::milliseconds(10)))
            .unwrap();

        let first = feed.latest_sample("BTC_USDT").unwrap().unwrap();
        assert_eq!(first.price, 101.0);
        assert_eq!(feed.latest_sample("BTC_USDT").unwrap(), None);
        assert_eq!(feed.latest_sample("ETH_USDT").unwrap(), None);
    }

    #[test]
    fn test_out_of_order_sample_ignored() {
        let feed = LatestSampleFeed::new();
        let now = Utc::now();
        assert!(feed.publish(Sample::new("X", 2.0, 0.0, now)).unwrap());
        assert!(!feed.publish(Sample::new("X", 1.0, 0.0, now - Duration::seconds(1))).unwrap());
        assert_eq!(feed.latest_sample("X").unwrap().unwrap().price, 2.0);
        assert_eq!(feed.symbols(), vec!["X".to_string()]);
    }
}
