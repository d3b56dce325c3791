use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tickwise_core::{IndicatorValue, StoreError};

/// Run embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// Open a connection pool.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
}

/// Column arrays for one UNNEST insert.
#[derive(Debug, Default)]
pub(crate) struct IndicatorColumns {
    pub times: Vec<DateTime<Utc>>,
    pub symbols: Vec<String>,
    pub indicators: Vec<String>,
    pub params: Vec<serde_json::Value>,
    pub values: Vec<Decimal>,
}

impl IndicatorColumns {
    pub fn from_rows(rows: &[IndicatorValue]) -> Result<Self, StoreError> {
        let mut cols = IndicatorColumns {
            times: Vec::with_capacity(rows.len()),
            symbols: Vec::with_capacity(rows.len()),
            indicators: Vec::with_capacity(rows.len()),
            params: Vec::with_capacity(rows.len()),
            values: Vec::with_capacity(rows.len()),
        };
        for row in rows {
            cols.times.push(row.timestamp);
            cols.symbols.push(row.symbol.clone());
            cols.indicators.push(row.indicator.as_str().to_string());
            cols.params.push(row.params.to_json());
            cols.values.push(to_decimal(row)?);
        }
        Ok(cols)
    }
}

/// Convert an indicator output for the NUMERIC column.
pub(crate) fn to_decimal(row: &IndicatorValue) -> Result<Decimal, StoreError> {
    Decimal::try_from(row.value).map_err(|e| {
        StoreError::Encode(format!(
            "{} {} value {} at {}: {}",
            row.symbol, row.params, row.value, row.timestamp, e
        ))
    })
}

/// Insert indicator values with a single statement. The statement is atomic:
/// either every row lands or none does.
pub async fn insert_indicator_values(
    pool: &PgPool,
    rows: &[IndicatorValue],
) -> Result<u64, StoreError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let cols = IndicatorColumns::from_rows(rows)?;

    let result = sqlx::query(
        "INSERT INTO indicator_values (time, symbol, indicator, params, value)
         SELECT * FROM UNNEST($1::timestamptz[], $2::text[], $3::text[], $4::jsonb[], $5::numeric[])",
    )
    .bind(&cols.times)
    .bind(&cols.symbols)
    .bind(&cols.indicators)
    .bind(&cols.params)
    .bind(&cols.values)
    .execute(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(result.rows_affected())
}

/// Liveness check.
pub async fn ping(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

pub(crate) fn map_sqlx_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::ConnectionFailed(e.to_string()),
        sqlx::Error::Database(db) => StoreError::InsertRejected(db.to_string()),
        other => StoreError::DatabaseError(other.to_string()),
    }
}
