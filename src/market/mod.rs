pub mod model;
pub mod symbols;

pub use model::{IntradayBar, MarketSnapshot, QuoteData, SymbolQuote};
pub use symbols::{default_symbols, display_name, symbol_kind, MARKET_SYMBOLS};
