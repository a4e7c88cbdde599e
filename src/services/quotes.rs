use std::sync::Arc;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::coordination::cache::ResponseCache;
use crate::coordination::snapshot::SnapshotSource;
use crate::error::{FetchError, FetchResult};
use crate::fetch::client::QuoteApi;
use crate::fetch::decode;
use crate::market::{IntradayBar, MarketSnapshot, QuoteData, SymbolQuote};

const INTRADAY_INTERVAL: &str = "1min";
const INTRADAY_OUTPUT_SIZE: u32 = 390;

// Cache endpoint identifiers. Single-quote detail and batch rows store
// different payload shapes, so they must never share a key.
const SNAPSHOT_ENDPOINT: &str = "/snapshot";
const QUOTE_ENDPOINT: &str = "/quote";
const BATCH_ENDPOINT: &str = "/quote_batch";
const SERIES_ENDPOINT: &str = "/time_series";

/// Inbound data surface consumed by the UI layer. Every operation routes
/// through the response cache, so freshness, coalescing, queueing and the
/// breaker policy apply uniformly. Cached payloads are the *decoded* shapes,
/// so a stale serve still carries its original timestamps.
#[derive(Clone)]
pub struct MarketDataService {
    cache: Arc<ResponseCache>,
    client: Arc<dyn QuoteApi>,
    symbols: Vec<String>,
}

impl MarketDataService {
    pub fn new(cache: Arc<ResponseCache>, client: Arc<dyn QuoteApi>, symbols: Vec<String>) -> Self {
        Self {
            cache,
            client,
            symbols,
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Latest quotes for the whole tracked universe, one upstream batch call.
    /// The cached payload embeds the fetch-time stamp, so consumers can
    /// detect staleness on a stale serve.
    pub async fn get_market_snapshot(&self) -> FetchResult<MarketSnapshot> {
        let value = self
            .cache
            .get(
                SNAPSHOT_ENDPOINT,
                &[("symbol", self.symbols.join(","))],
                snapshot_fetch(Arc::clone(&self.client), self.symbols.clone()),
            )
            .await?;
        decode_as(value)
    }

    /// Quotes for an arbitrary subset of symbols.
    pub async fn get_batch_quotes(&self, symbols: &[String]) -> FetchResult<Vec<SymbolQuote>> {
        if symbols.is_empty() {
            return Err(FetchError::NotFound("empty symbol list".to_string()));
        }
        let mut symbols: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();
        symbols.sort();
        symbols.dedup();
        self.batch_quotes_for(symbols).await
    }

    /// Single-symbol quote detail.
    pub async fn get_quote(&self, symbol: &str) -> FetchResult<QuoteData> {
        let symbol = symbol.to_uppercase();
        let client = Arc::clone(&self.client);
        let value = self
            .cache
            .get(QUOTE_ENDPOINT, &[("symbol", symbol.clone())], {
                let symbol = symbol.clone();
                async move {
                    let raw = client.batch_quotes(&[symbol.clone()]).await.into_result()?;
                    let quote = decode::parse_quote(&raw, &symbol)?;
                    encode(&quote)
                }
            })
            .await?;
        decode_as(value)
    }

    /// Intraday 1-minute bars for one symbol, oldest first.
    pub async fn get_time_series(&self, symbol: &str) -> FetchResult<Vec<IntradayBar>> {
        let symbol = symbol.to_uppercase();
        let client = Arc::clone(&self.client);
        let value = self
            .cache
            .get(
                SERIES_ENDPOINT,
                &[
                    ("symbol", symbol.clone()),
                    ("interval", INTRADAY_INTERVAL.to_string()),
                ],
                {
                    let symbol = symbol.clone();
                    async move {
                        let raw = client
                            .time_series(&symbol, INTRADAY_INTERVAL, INTRADAY_OUTPUT_SIZE)
                            .await
                            .into_result()?;
                        let bars = decode::parse_time_series(&raw, &symbol)?;
                        encode(&bars)
                    }
                },
            )
            .await?;
        decode_as(value)
    }

    async fn batch_quotes_for(&self, symbols: Vec<String>) -> FetchResult<Vec<SymbolQuote>> {
        let value = self
            .cache
            .get(
                BATCH_ENDPOINT,
                &[("symbol", symbols.join(","))],
                batch_fetch(Arc::clone(&self.client), symbols),
            )
            .await?;
        decode_as(value)
    }
}

impl SnapshotSource for MarketDataService {
    fn market_snapshot(&self) -> BoxFuture<'static, FetchResult<MarketSnapshot>> {
        let this = self.clone();
        async move { this.get_market_snapshot().await }.boxed()
    }
}

fn batch_fetch(
    client: Arc<dyn QuoteApi>,
    symbols: Vec<String>,
) -> impl std::future::Future<Output = FetchResult<Value>> + Send + 'static {
    async move {
        let raw = client.batch_quotes(&symbols).await.into_result()?;
        let quotes = decode::parse_batch_quotes(&raw, &symbols)?;
        encode(&quotes)
    }
}

fn snapshot_fetch(
    client: Arc<dyn QuoteApi>,
    symbols: Vec<String>,
) -> impl std::future::Future<Output = FetchResult<Value>> + Send + 'static {
    async move {
        let raw = client.batch_quotes(&symbols).await.into_result()?;
        let quotes = decode::parse_batch_quotes(&raw, &symbols)?;
        let snapshot = MarketSnapshot {
            symbols: quotes,
            last_updated: Utc::now(),
        };
        encode(&snapshot)
    }
}

fn encode<T: serde::Serialize>(value: &T) -> FetchResult<Value> {
    serde_json::to_value(value)
        .map_err(|err| FetchError::Malformed(format!("failed to encode payload: {err}")))
}

fn decode_as<T: serde::de::DeserializeOwned>(value: Value) -> FetchResult<T> {
    serde_json::from_value(value)
        .map_err(|err| FetchError::Malformed(format!("failed to decode cached payload: {err}")))
}
