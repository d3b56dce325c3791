use crate::models::*;
use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Errors raised while registering an indicator. Never raised at tick time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown indicator type: {0}")]
    UnknownIndicator(String),
    #[error("Invalid {indicator} parameter: {message}")]
    InvalidParameter {
        indicator: IndicatorKind,
        message: String,
    },
    #[error("Symbol must not be empty")]
    EmptySymbol,
    #[error("Invalid setting {field}: {message}")]
    InvalidSetting {
        field: &'static str,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Sample Feed Trait
// ---------------------------------------------------------------------------

/// Errors from the market data feed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    #[error("Feed unavailable: {0}")]
    Unavailable(String),
    #[error("Feed error: {0}")]
    Other(String),
}

/// Pull interface over the live market data feed.
pub trait SampleFeed: Send + Sync {
    /// The newest sample for `symbol`, or `None` if nothing arrived since the
    /// previous call for that symbol.
    fn latest_sample(&self, symbol: &str) -> Result<Option<Sample>, FeedError>;
}

// ---------------------------------------------------------------------------
// Time-Series Store Trait
// ---------------------------------------------------------------------------

/// Errors that can occur while persisting indicator values.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Bulk insert rejected: {0}")]
    InsertRejected(String),
    #[error("Value not representable: {0}")]
    Encode(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Sink for computed indicator values.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Write all rows in one operation. Either every row is persisted or an
    /// error is returned and nothing is.
    async fn bulk_insert(&self, rows: &[IndicatorValue]) -> Result<u64, StoreError>;

    /// Cheap liveness check (`SELECT 1` or equivalent).
    async fn health_check(&self) -> Result<(), StoreError>;
}

