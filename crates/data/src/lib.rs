pub mod csv_loader;
pub mod db;

use async_trait::async_trait;
use std::sync::Mutex;
use tickwise_core::{IndicatorValue, StoreError, TimeSeriesStore};
use tracing::debug;

/// Errors from loading sample files.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Data not found: {0}")]
    NotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A PostgreSQL/TimescaleDB-backed indicator store.
pub struct PostgresStore {
    pub pool: sqlx::PgPool,
}

impl PostgresStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TimeSeriesStore for PostgresStore {
    async fn bulk_insert(&self, rows: &[IndicatorValue]) -> Result<u64, StoreError> {
        let inserted = db::insert_indicator_values(&self.pool, rows).await?;
        debug!(rows = inserted, "Bulk insert committed");
        Ok(inserted)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        db::ping(&self.pool).await
    }
}

/// In-process store for dry runs and tests. Applies the same value encoding
/// checks as the database store, so a batch is accepted or rejected whole.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<IndicatorValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<IndicatorValue> {
        self.rows.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryStore {
    async fn bulk_insert(&self, rows: &[IndicatorValue]) -> Result<u64, StoreError> {
        for row in rows {
            db::to_decimal(row)?;
        }
        let mut stored = self
            .rows
            .lock()
            .map_err(|_| StoreError::DatabaseError("memory store poisoned".to_string()))?;
        stored.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tickwise_core::{IndicatorParams, IndicatorSpec};

    #[tokio::test]
    async fn test_memory_store_is_all_or_nothing() {
        let store = MemoryStore::new();
        let spec = IndicatorSpec::new("BTC_USDT", IndicatorParams::Vwap { window: None });
        let good = IndicatorValue::new(&spec, 101.25, Utc::now());
        let bad = IndicatorValue::new(&spec, f64::NAN, Utc::now());

        assert_eq!(store.bulk_insert(&[good.clone()]).await.unwrap(), 1);
        assert!(store.bulk_insert(&[good.clone(), bad]).await.is_err());
        assert_eq!(store.rows(), vec![good]);
        assert!(store.health_check().await.is_ok());
    }
}
