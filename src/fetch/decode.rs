use chrono::NaiveDateTime;
use serde_json::Value;

use crate::error::{FetchError, FetchResult};
use crate::market::{display_name, symbol_kind, IntradayBar, QuoteData, SymbolQuote};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Detect the provider's credits-exhausted shape: either `code == 429` or a
/// `status: "error"` body whose message mentions credits. Both arrive with
/// HTTP 200.
pub fn is_credit_exhausted(value: &Value) -> bool {
    if value.get("code").and_then(Value::as_i64) == Some(429) {
        return true;
    }
    if value.get("status").and_then(Value::as_str) == Some("error") {
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return message.to_ascii_lowercase().contains("credit");
        }
    }
    false
}

/// Decode the batch quote map into one row per tracked symbol, keeping the
/// universe order. Symbols the upstream could not price become zeroed
/// placeholder rows with the reason recorded.
pub fn parse_batch_quotes(value: &Value, symbols: &[String]) -> FetchResult<Vec<SymbolQuote>> {
    if !value.is_object() {
        return Err(FetchError::Malformed(
            "batch quote payload is not an object".to_string(),
        ));
    }

    let mut quotes = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        // A one-symbol request comes back as a flat object, not a keyed map.
        let entry = value.get(symbol).or_else(|| {
            (symbols.len() == 1 && value.get("close").is_some()).then_some(value)
        });
        let usable = entry
            .map(|data| data.is_object() && data.get("code").is_none())
            .unwrap_or(false);

        if !usable {
            let reason = entry
                .and_then(|data| data.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("No data available");
            quotes.push(placeholder_quote(symbol, reason));
            continue;
        }

        let data = entry.unwrap_or(&Value::Null);
        quotes.push(SymbolQuote {
            symbol: symbol.clone(),
            name: data
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| display_name(symbol)),
            kind: symbol_kind(symbol),
            price: num_field(data, "close"),
            change: num_field(data, "change"),
            percent_change: num_field(data, "percent_change"),
            volume: num_field(data, "volume") as u64,
            series: Vec::new(),
            error: None,
        });
    }

    if quotes.iter().all(|quote| quote.error.is_some()) {
        return Err(FetchError::Malformed(
            "batch quote payload contained no usable symbols".to_string(),
        ));
    }

    Ok(quotes)
}

/// Decode a single-symbol quote response. Accepts both the flat object shape
/// and the symbol-keyed map shape the provider uses interchangeably.
pub fn parse_quote(value: &Value, symbol: &str) -> FetchResult<QuoteData> {
    let upper = symbol.to_uppercase();
    let data = if value.get("close").is_some() {
        value
    } else {
        value.get(&upper).unwrap_or(value)
    };

    if data.get("status").and_then(Value::as_str) == Some("error") {
        let message = data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("API returned error status");
        return Err(FetchError::NotFound(format!("{symbol}: {message}")));
    }

    if data.get("close").is_none() {
        return Err(FetchError::NotFound(symbol.to_string()));
    }

    let close = num_field(data, "close");
    Ok(QuoteData {
        symbol: upper,
        price: close,
        change: num_field(data, "change"),
        percent_change: num_field(data, "percent_change"),
        high: num_field_or(data, "high", close),
        low: num_field_or(data, "low", close),
        open: num_field_or(data, "open", close),
        previous_close: num_field_or(data, "previous_close", close),
    })
}

/// Decode a time-series response into ascending bars. The provider emits the
/// newest bar first.
pub fn parse_time_series(value: &Value, symbol: &str) -> FetchResult<Vec<IntradayBar>> {
    if value.get("status").and_then(Value::as_str) == Some("error") {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("API returned error status");
        return Err(FetchError::NotFound(format!("{symbol}: {message}")));
    }

    let values = value
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            FetchError::Malformed(format!("time series for {symbol} has no `values` array"))
        })?;

    let mut bars = Vec::with_capacity(values.len());
    for point in values {
        let raw = point
            .get("datetime")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FetchError::Malformed(format!("time series bar for {symbol} missing datetime"))
            })?;
        let datetime = NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT).map_err(|err| {
            FetchError::Malformed(format!("bad datetime `{raw}` for {symbol}: {err}"))
        })?;

        bars.push(IntradayBar {
            datetime,
            open: num_field(point, "open"),
            high: num_field(point, "high"),
            low: num_field(point, "low"),
            close: num_field(point, "close"),
            volume: num_field(point, "volume") as u64,
        });
    }

    bars.sort_by_key(|bar| bar.datetime);
    Ok(bars)
}

fn placeholder_quote(symbol: &str, reason: &str) -> SymbolQuote {
    SymbolQuote {
        symbol: symbol.to_string(),
        name: display_name(symbol),
        kind: symbol_kind(symbol),
        price: 0.0,
        change: 0.0,
        percent_change: 0.0,
        volume: 0,
        series: Vec::new(),
        error: Some(reason.to_string()),
    }
}

/// Provider numerics arrive as strings more often than numbers; missing or
/// unparsable values collapse to the fallback.
fn num_field_or(value: &Value, key: &str, fallback: f64) -> f64 {
    match value.get(key) {
        Some(Value::String(s)) => s.trim().parse().unwrap_or(fallback),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(fallback),
        _ => fallback,
    }
}

fn num_field(value: &Value, key: &str) -> f64 {
    num_field_or(value, key, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_batch() -> Value {
        json!({
            "SPY": {
                "name": "SPDR S&P 500 ETF Trust",
                "close": "512.34",
                "change": "1.20",
                "percent_change": "0.23",
                "volume": "55000000"
            },
            "QQQ": {
                "name": "Invesco QQQ Trust",
                "close": "438.91",
                "change": "-0.55",
                "percent_change": "-0.12",
                "volume": "31000000"
            },
            "AAPL": { "code": 404, "message": "symbol not found" }
        })
    }

    #[test]
    fn detects_credit_exhaustion_shapes() {
        assert!(is_credit_exhausted(&json!({ "code": 429 })));
        assert!(is_credit_exhausted(&json!({
            "status": "error",
            "message": "You have run out of API credits for the day"
        })));
        assert!(!is_credit_exhausted(&json!({
            "status": "error",
            "message": "symbol not found"
        })));
        assert!(!is_credit_exhausted(&json!({ "status": "ok" })));
    }

    #[test]
    fn batch_quotes_keep_universe_order_and_mark_failures() {
        let symbols = vec!["SPY".to_string(), "QQQ".to_string(), "AAPL".to_string()];
        let quotes = parse_batch_quotes(&sample_batch(), &symbols).unwrap();

        assert_eq!(quotes.len(), 3);
        assert_eq!(quotes[0].symbol, "SPY");
        assert!((quotes[0].price - 512.34).abs() < 1e-9);
        assert_eq!(quotes[0].volume, 55_000_000);
        assert!(quotes[0].error.is_none());

        assert!((quotes[1].change + 0.55).abs() < 1e-9);

        assert_eq!(quotes[2].symbol, "AAPL");
        assert_eq!(quotes[2].price, 0.0);
        assert_eq!(quotes[2].error.as_deref(), Some("symbol not found"));
        assert_eq!(quotes[2].name, "Apple Inc.");
    }

    #[test]
    fn batch_with_no_usable_symbols_is_malformed() {
        let symbols = vec!["SPY".to_string()];
        let payload = json!({ "SPY": { "code": 500 } });
        assert!(matches!(
            parse_batch_quotes(&payload, &symbols),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn quote_parses_string_numerics_with_fallbacks() {
        let quote = parse_quote(
            &json!({
                "close": "189.95",
                "change": "0.85",
                "percent_change": "0.45",
                "previous_close": "189.10"
            }),
            "aapl",
        )
        .unwrap();

        assert_eq!(quote.symbol, "AAPL");
        assert!((quote.price - 189.95).abs() < 1e-9);
        // Missing high/low/open fall back to close.
        assert!((quote.high - 189.95).abs() < 1e-9);
        assert!((quote.previous_close - 189.10).abs() < 1e-9);
    }

    #[test]
    fn quote_accepts_symbol_keyed_shape() {
        let quote = parse_quote(
            &json!({ "AAPL": { "close": "189.95", "change": "0.85" } }),
            "aapl",
        )
        .unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert!((quote.price - 189.95).abs() < 1e-9);
    }

    #[test]
    fn single_symbol_batch_accepts_flat_shape() {
        let symbols = vec!["SPY".to_string()];
        let payload = json!({
            "name": "SPDR S&P 500 ETF Trust",
            "close": "512.34",
            "change": "1.20",
            "percent_change": "0.23",
            "volume": "55000000"
        });

        let quotes = parse_batch_quotes(&payload, &symbols).unwrap();
        assert_eq!(quotes.len(), 1);
        assert!(quotes[0].error.is_none());
        assert!((quotes[0].price - 512.34).abs() < 1e-9);
    }

    #[test]
    fn quote_without_close_is_not_found() {
        assert!(matches!(
            parse_quote(&json!({ "name": "Apple" }), "AAPL"),
            Err(FetchError::NotFound(_))
        ));
        assert!(matches!(
            parse_quote(
                &json!({ "status": "error", "message": "symbol not found" }),
                "ZZZZ"
            ),
            Err(FetchError::NotFound(_))
        ));
    }

    #[test]
    fn time_series_sorts_ascending() {
        let payload = json!({
            "status": "ok",
            "values": [
                { "datetime": "2024-03-01 15:59:00", "open": "101", "high": "102",
                  "low": "100", "close": "101.5", "volume": "1200" },
                { "datetime": "2024-03-01 15:58:00", "open": "100", "high": "101",
                  "low": "99.5", "close": "101", "volume": "900" }
            ]
        });

        let bars = parse_time_series(&payload, "AAPL").unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[0].datetime < bars[1].datetime);
        assert!((bars[1].close - 101.5).abs() < 1e-9);
        assert_eq!(bars[0].volume, 900);
    }

    #[test]
    fn time_series_without_values_is_malformed() {
        assert!(matches!(
            parse_time_series(&json!({ "status": "ok" }), "AAPL"),
            Err(FetchError::Malformed(_))
        ));
    }
}
