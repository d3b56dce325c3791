//! Tick scheduling, indicator registry and bulk persistence.

pub mod config;
pub mod feed;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod writer;

pub use config::{EngineConfig, SchedulerConfig, WriterConfig};
pub use feed::LatestSampleFeed;
pub use registry::{IndicatorRegistry, InstanceDescriptor, InstanceError, RegistrySnapshot};
pub use scheduler::{Scheduler, SchedulerState, TickProcessor, TickReport};
pub use stats::{SchedulerStats, StatsSnapshot};
pub use writer::{is_storable, spawn_writer, BulkWriter, WriterHandle, WriterMessage};

use tickwise_core::{ConfigError, StoreError};

/// Engine-level failures. Per-instance update errors never surface here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Indicator registry lock poisoned")]
    RegistryPoisoned,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Writer worker is no longer running")]
    WriterClosed,
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Task join failed: {0}")]
    Join(String),
}
