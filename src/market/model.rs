use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One intraday bar as reported by the provider's time-series endpoint.
/// Datetimes are exchange-local and carry no offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntradayBar {
    pub datetime: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Latest quote for a tracked symbol. A populated `error` marks a placeholder
/// row for a symbol the upstream could not price; numeric fields are zeroed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolQuote {
    pub symbol: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub price: f64,
    pub change: f64,
    pub percent_change: f64,
    pub volume: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<IntradayBar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Point-in-time view of the whole universe. Replaced wholesale on every
/// successful refresh, never mutated field by field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbols: Vec<SymbolQuote>,
    pub last_updated: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_updated
    }
}

/// Single-symbol quote detail returned by `get_quote`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteData {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub percent_change: f64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub previous_close: f64,
}
