use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::io::Read;
use std::path::Path;
use tickwise_core::Sample;

use crate::DataError;

/// Load price samples from a CSV file.
///
/// Expected columns (case-insensitive, flexible ordering):
/// `timestamp` (or `date`, `datetime`, `time`), `price` (or `last`, `close`),
/// optional `volume`, optional `symbol`. Without a symbol column the file
/// stem is used.
pub fn load_samples_from_csv(path: &Path) -> Result<Vec<Sample>, DataError> {
    let default_symbol = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let file = std::fs::File::open(path).map_err(DataError::IoError)?;
    load_samples(file, &default_symbol)
}

/// Parse samples from any CSV source. Rows come back sorted by timestamp.
pub fn load_samples<R: Read>(source: R, default_symbol: &str) -> Result<Vec<Sample>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers = reader
        .headers()
        .map_err(|e| DataError::ParseError(format!("Failed to read headers: {}", e)))?
        .clone();

    let cols = resolve_sample_columns(&headers)?;

    let mut samples = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result.map_err(|e| DataError::ParseError(format!("CSV record error: {}", e)))?;
        let field = |idx: usize| {
            record.get(idx).ok_or_else(|| {
                DataError::ParseError(format!("Row {} is missing column {}", line + 1, idx))
            })
        };

        let timestamp = parse_timestamp(field(cols.timestamp)?)?;
        let price = parse_number(field(cols.price)?, "price")?;
        let volume = match cols.volume {
            Some(idx) => parse_number(field(idx)?, "volume")?,
            None => 0.0,
        };
        let symbol = match cols.symbol {
            Some(idx) => field(idx)?.to_string(),
            None => default_symbol.to_string(),
        };

        samples.push(Sample::new(symbol, price, volume, timestamp));
    }

    // Stable, so same-timestamp rows keep file order
    samples.sort_by_key(|s| s.timestamp);
    Ok(samples)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

struct SampleColumnMap {
    timestamp: usize,
    price: usize,
    volume: Option<usize>,
    symbol: Option<usize>,
}

fn resolve_sample_columns(headers: &csv::StringRecord) -> Result<SampleColumnMap, DataError> {
    let timestamp = find_column(headers, &["timestamp", "date", "datetime", "time"])
        .ok_or_else(|| DataError::ParseError("No timestamp column found".into()))?;
    let price = find_column(headers, &["price", "last", "close"])
        .ok_or_else(|| DataError::ParseError("No price column found".into()))?;
    let volume = find_column(headers, &["volume", "vol", "size", "qty"]);
    let symbol = find_column(headers, &["symbol", "instrument", "pair"]);

    Ok(SampleColumnMap {
        timestamp,
        price,
        volume,
        symbol,
    })
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers.iter().position(|header| {
        let h = header.trim().to_lowercase();
        names.iter().any(|name| h == *name)
    })
}

fn parse_number(s: &str, field: &str) -> Result<f64, DataError> {
    let value: f64 = s
        .trim()
        .parse()
        .map_err(|e| DataError::ParseError(format!("Failed to parse {} '{}': {}", field, s, e)))?;
    if !value.is_finite() {
        return Err(DataError::ParseError(format!("Non-finite {} '{}'", field, s)));
    }
    Ok(value)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DataError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Without timezone, assume UTC
    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%m/%d/%Y %H:%M:%S",
        "%Y%m%d %H:%M:%S",
    ];
    for fmt in &formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }

    if let Some(dt) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc));
    }

    // Unix seconds, or milliseconds for exchange exports
    if let Ok(ts) = s.parse::<i64>() {
        let dt = if ts.abs() >= 100_000_000_000 {
            DateTime::from_timestamp_millis(ts)
        } else {
            DateTime::from_timestamp(ts, 0)
        };
        if let Some(dt) = dt {
            return Ok(dt);
        }
    }

    Err(DataError::ParseError(format!("Unable to parse timestamp: '{}'", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_load_with_symbol_column() {
        let csv = "Time,Symbol,Price,Volume\n\
                   2024-01-01T00:00:02Z,ETH_USDT,2001.5,3\n\
                   2024-01-01T00:00:01Z,BTC_USDT,42000,0.5\n";
        let samples = load_samples(csv.as_bytes(), "ignored").unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].symbol, "BTC_USDT");
        assert_eq!(samples[0].price, 42_000.0);
        assert_eq!(samples[0].volume, 0.5);
        assert_eq!(
            samples[1].timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 2).unwrap()
        );
    }

    #[test]
    fn test_default_symbol_and_volume() {
        let csv = "timestamp,last\n1700000000,10\n1700000001000,11\n";
        let samples = load_samples(csv.as_bytes(), "SOL_USDT").unwrap();
        assert!(samples.iter().all(|s| s.symbol == "SOL_USDT" && s.volume == 0.0));
        assert_eq!(samples[0].timestamp.timestamp(), 1_700_000_000);
        assert_eq!(samples[1].timestamp.timestamp(), 1_700_000_001);
    }

    #[test]
    fn test_bad_rows_rejected() {
        let missing = "timestamp,volume\n2024-01-01,1\n";
        assert!(matches!(
            load_samples(missing.as_bytes(), "X"),
            Err(DataError::ParseError(_))
        ));

        let nan = "timestamp,price\n2024-01-01,NaN\n";
        assert!(load_samples(nan.as_bytes(), "X").is_err());

        let bad_ts = "timestamp,price\nyesterday,1\n";
        assert!(load_samples(bad_ts.as_bytes(), "X").is_err());
    }
}
