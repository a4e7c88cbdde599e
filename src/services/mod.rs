pub mod quotes;

pub use quotes::MarketDataService;
