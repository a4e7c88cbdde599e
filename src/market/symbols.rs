/// Fixed universe tracked by the dashboard. The listing order is the order
/// quotes appear in every snapshot.
pub const MARKET_SYMBOLS: [(&str, &str, &str); 5] = [
    ("SPY", "SPDR S&P 500 ETF", "ETF"),
    ("QQQ", "Invesco QQQ Trust", "ETF"),
    ("AAPL", "Apple Inc.", "Stock"),
    ("MSFT", "Microsoft Corporation", "Stock"),
    ("NVDA", "NVIDIA Corporation", "Stock"),
];

pub fn default_symbols() -> Vec<String> {
    MARKET_SYMBOLS
        .iter()
        .map(|(symbol, _, _)| (*symbol).to_string())
        .collect()
}

/// Human-readable name for a tracked symbol; falls back to the ticker for
/// symbols outside the builtin universe.
pub fn display_name(symbol: &str) -> String {
    MARKET_SYMBOLS
        .iter()
        .find(|(s, _, _)| *s == symbol)
        .map(|(_, name, _)| (*name).to_string())
        .unwrap_or_else(|| symbol.to_string())
}

pub fn symbol_kind(symbol: &str) -> String {
    MARKET_SYMBOLS
        .iter()
        .find(|(s, _, _)| *s == symbol)
        .map(|(_, _, kind)| (*kind).to_string())
        .unwrap_or_else(|| "Stock".to_string())
}
