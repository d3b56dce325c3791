use std::sync::Arc;
use tickwise_core::TimeSeriesStore;
use tickwise_engine::{IndicatorRegistry, LatestSampleFeed, Scheduler};

/// Shared application state accessible by all route handlers.
pub struct AppState {
    pub registry: Arc<IndicatorRegistry>,
    /// Ingestion side of the scheduler's sample feed.
    pub feed: Arc<LatestSampleFeed>,
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<dyn TimeSeriesStore>,
}

impl AppState {
    pub fn new(
        registry: Arc<IndicatorRegistry>,
        feed: Arc<LatestSampleFeed>,
        scheduler: Arc<Scheduler>,
        store: Arc<dyn TimeSeriesStore>,
    ) -> Self {
        Self {
            registry,
            feed,
            scheduler,
            store,
        }
    }
}
