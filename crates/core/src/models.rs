use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::traits::ConfigError;

// ---------------------------------------------------------------------------
// Market Data
// ---------------------------------------------------------------------------

/// One observed market data point for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(symbol: impl Into<String>, price: f64, volume: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volume,
            timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Indicators
// ---------------------------------------------------------------------------

/// The family of streaming indicators the engine can compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Ema,
    Sma,
    Vwap,
    Rsi,
    Twpa,
    StdDev,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 6] = [
        IndicatorKind::Ema,
        IndicatorKind::Sma,
        IndicatorKind::Vwap,
        IndicatorKind::Rsi,
        IndicatorKind::Twpa,
        IndicatorKind::StdDev,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::Ema => "ema",
            IndicatorKind::Sma => "sma",
            IndicatorKind::Vwap => "vwap",
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Twpa => "twpa",
            IndicatorKind::StdDev => "std_dev",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            IndicatorKind::Ema => "Exponential moving average (alpha = 2 / (period + 1))",
            IndicatorKind::Sma => "Simple moving average over the last `period` samples",
            IndicatorKind::Vwap => "Volume weighted average price, cumulative or rolling `window`",
            IndicatorKind::Rsi => "Relative strength index with Wilder smoothing",
            IndicatorKind::Twpa => "Time weighted price average over the last `period` samples",
            IndicatorKind::StdDev => "Rolling population standard deviation of price",
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndicatorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ema" => Ok(IndicatorKind::Ema),
            "sma" => Ok(IndicatorKind::Sma),
            "vwap" => Ok(IndicatorKind::Vwap),
            "rsi" => Ok(IndicatorKind::Rsi),
            "twpa" => Ok(IndicatorKind::Twpa),
            "std_dev" | "stddev" => Ok(IndicatorKind::StdDev),
            other => Err(ConfigError::UnknownIndicator(other.to_string())),
        }
    }
}

/// Parameter set of an indicator instance.
///
/// Tagged by `type` so the same shape is used in config files, the HTTP API
/// and the persisted `params` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndicatorParams {
    Ema { period: usize },
    Sma { period: usize },
    /// `window: None` accumulates since registration (or the last reset).
    Vwap {
        #[serde(default)]
        window: Option<usize>,
    },
    Rsi { period: usize },
    Twpa { period: usize },
    StdDev { period: usize },
}

impl IndicatorParams {
    pub fn kind(&self) -> IndicatorKind {
        match self {
            IndicatorParams::Ema { .. } => IndicatorKind::Ema,
            IndicatorParams::Sma { .. } => IndicatorKind::Sma,
            IndicatorParams::Vwap { .. } => IndicatorKind::Vwap,
            IndicatorParams::Rsi { .. } => IndicatorKind::Rsi,
            IndicatorParams::Twpa { .. } => IndicatorKind::Twpa,
            IndicatorParams::StdDev { .. } => IndicatorKind::StdDev,
        }
    }

    /// Reject parameter sets no indicator could be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            IndicatorParams::Ema { period }
            | IndicatorParams::Sma { period }
            | IndicatorParams::Rsi { period }
            | IndicatorParams::Twpa { period }
            | IndicatorParams::StdDev { period } => {
                if period == 0 {
                    return Err(ConfigError::InvalidParameter {
                        indicator: self.kind(),
                        message: "period must be > 0".to_string(),
                    });
                }
            }
            IndicatorParams::Vwap { window } => {
                if window == Some(0) {
                    return Err(ConfigError::InvalidParameter {
                        indicator: IndicatorKind::Vwap,
                        message: "window must be > 0 when set".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// JSON form stored alongside each persisted value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for IndicatorParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorParams::Ema { period }
            | IndicatorParams::Sma { period }
            | IndicatorParams::Rsi { period }
            | IndicatorParams::Twpa { period }
            | IndicatorParams::StdDev { period } => write!(f, "{}({})", self.kind(), period),
            IndicatorParams::Vwap { window: Some(n) } => write!(f, "vwap({})", n),
            IndicatorParams::Vwap { window: None } => f.write_str("vwap(cumulative)"),
        }
    }
}

/// Identity of an indicator instance: `(symbol, indicator type, parameters)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndicatorSpec {
    pub symbol: String,
    #[serde(flatten)]
    pub params: IndicatorParams,
}

impl IndicatorSpec {
    pub fn new(symbol: impl Into<String>, params: IndicatorParams) -> Self {
        Self {
            symbol: symbol.into(),
            params,
        }
    }

    pub fn kind(&self) -> IndicatorKind {
        self.params.kind()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        self.params.validate()
    }
}

impl fmt::Display for IndicatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.params)
    }
}

/// Registry-assigned handle of a live indicator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One computed indicator value, shaped as a time-series row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub symbol: String,
    pub indicator: IndicatorKind,
    pub params: IndicatorParams,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl IndicatorValue {
    pub fn new(spec: &IndicatorSpec, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: spec.symbol.clone(),
            indicator: spec.kind(),
            params: spec.params,
            value,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_str() {
        assert_eq!("EMA".parse::<IndicatorKind>().unwrap(), IndicatorKind::Ema);
        assert_eq!("std_dev".parse::<IndicatorKind>().unwrap(), IndicatorKind::StdDev);
        match "macd".parse::<IndicatorKind>() {
            Err(ConfigError::UnknownIndicator(name)) => assert_eq!(name, "macd"),
            other => panic!("Expected unknown indicator error, got {:?}", other),
        }
    }

    #[test]
    fn test_params_validate() {
        assert!(IndicatorParams::Sma { period: 0 }.validate().is_err());
        assert!(IndicatorParams::Vwap { window: Some(0) }.validate().is_err());
        assert!(IndicatorParams::Vwap { window: None }.validate().is_ok());
        assert!(IndicatorParams::Rsi { period: 14 }.validate().is_ok());
    }

    #[test]
    fn test_spec_serde_shape() {
        let spec: IndicatorSpec =
            serde_json::from_str(r#"{"symbol":"BTC_USDT","type":"ema","period":20}"#).unwrap();
        assert_eq!(spec, IndicatorSpec::new("BTC_USDT", IndicatorParams::Ema { period: 20 }));

        let vwap: IndicatorSpec = serde_json::from_str(r#"{"symbol":"ETH_USDT","type":"vwap"}"#).unwrap();
        assert_eq!(vwap.params, IndicatorParams::Vwap { window: None });

        let bad = serde_json::from_str::<IndicatorSpec>(r#"{"symbol":"X","type":"macd","period":3}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_empty_symbol_rejected() {
        let spec = IndicatorSpec::new("  ", IndicatorParams::Sma { period: 3 });
        assert!(matches!(spec.validate(), Err(ConfigError::EmptySymbol)));
    }
}
