use std::sync::Arc;

use chrono::Utc;
use tokio::time::{sleep, Duration};

use crate::config::Settings;
use crate::coordination::{CircuitBreaker, RequestQueue, ResponseCache, SnapshotManager};
use crate::error::{AppError, FetchError, Result};
use crate::market::MarketSnapshot;
use crate::records::DurableCache;
use crate::services::MarketDataService;
use crate::fetch::UpstreamClient;

#[derive(Debug, Clone)]
pub enum Command {
    /// One snapshot of the whole universe (default).
    Snapshot,
    /// Quote detail for one symbol.
    Quote(String),
    /// Intraday series for one symbol.
    Series(String),
    /// Periodic refresh loop printing every state transition.
    Watch { interval: Duration },
}

impl Command {
    pub fn from_args(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let Some(first) = args.next() else {
            return Ok(Command::Snapshot);
        };

        match first.as_str() {
            "snapshot" => Ok(Command::Snapshot),
            "quote" => {
                let symbol = args
                    .next()
                    .ok_or_else(|| AppError::message("usage: quote <SYMBOL>"))?;
                Ok(Command::Quote(symbol))
            }
            "series" => {
                let symbol = args
                    .next()
                    .ok_or_else(|| AppError::message("usage: series <SYMBOL>"))?;
                Ok(Command::Series(symbol))
            }
            "watch" => {
                let interval = match args.next() {
                    Some(raw) => {
                        let secs: u64 = raw.trim().parse().map_err(|_| {
                            AppError::message(format!("invalid watch interval: {}", raw))
                        })?;
                        Duration::from_secs(secs.max(1))
                    }
                    None => Duration::from_secs(60),
                };
                Ok(Command::Watch { interval })
            }
            other => Err(AppError::message(format!(
                "unknown command `{other}`; expected snapshot, quote, series or watch"
            ))),
        }
    }
}

/// Composition root. Builds the breaker, queue, cache, upstream client,
/// service and snapshot manager once and wires them together explicitly; no
/// component reaches for ambient global state.
pub struct AppController {
    manager: Arc<SnapshotManager>,
    service: MarketDataService,
    breaker: Arc<CircuitBreaker>,
}

impl AppController {
    pub fn build(settings: Settings) -> Result<Self> {
        let breaker = Arc::new(CircuitBreaker::new(settings.breaker_cooldown));
        let queue = RequestQueue::new(
            Arc::clone(&breaker),
            settings.queue_spacing,
            settings.request_timeout,
        );

        let store = match &settings.cache_dir {
            Some(dir) => Some(Arc::new(DurableCache::new(
                dir.clone(),
                settings.freshness_window,
            )?)),
            None => None,
        };

        let cache = Arc::new(
            ResponseCache::new(
                queue,
                Arc::clone(&breaker),
                settings.freshness_window,
                settings.min_request_interval,
            )
            .with_store(store),
        );

        let client = Arc::new(UpstreamClient::new(&settings)?);
        let service = MarketDataService::new(cache, client, settings.symbols.clone());
        let manager = SnapshotManager::new(Arc::new(service.clone()), Arc::clone(&breaker));

        Ok(Self {
            manager,
            service,
            breaker,
        })
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Snapshot => self.run_snapshot().await,
            Command::Quote(symbol) => self.run_quote(&symbol).await,
            Command::Series(symbol) => self.run_series(&symbol).await,
            Command::Watch { interval } => self.run_watch(interval).await,
        }
    }

    async fn run_snapshot(&self) -> Result<()> {
        match self.manager.fetch_snapshot().await {
            Ok(snapshot) => {
                print_snapshot(&snapshot);
                Ok(())
            }
            Err(err) => Err(self.describe(err)),
        }
    }

    async fn run_quote(&self, symbol: &str) -> Result<()> {
        let quote = self
            .service
            .get_quote(symbol)
            .await
            .map_err(|err| self.describe(err))?;
        println!(
            "{}  price {:>10.2}  change {:>+8.2} ({:>+6.2}%)  open {:.2}  high {:.2}  low {:.2}  prev {:.2}",
            quote.symbol,
            quote.price,
            quote.change,
            quote.percent_change,
            quote.open,
            quote.high,
            quote.low,
            quote.previous_close,
        );
        Ok(())
    }

    async fn run_series(&self, symbol: &str) -> Result<()> {
        let bars = self
            .service
            .get_time_series(symbol)
            .await
            .map_err(|err| self.describe(err))?;
        println!("{} intraday bars for {}", bars.len(), symbol.to_uppercase());
        for bar in &bars {
            println!(
                "{}  o {:>9.2}  h {:>9.2}  l {:>9.2}  c {:>9.2}  vol {:>10}",
                bar.datetime.format("%H:%M"),
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.volume,
            );
        }
        Ok(())
    }

    async fn run_watch(&self, interval: Duration) -> Result<()> {
        let _subscription = self.manager.subscribe(|state| {
            if state.loading {
                println!("refreshing...");
            } else if let Some(error) = &state.error {
                println!("refresh failed: {error}");
            } else if let Some(snapshot) = &state.snapshot {
                println!("--- updated {} ---", Utc::now().format("%H:%M:%S"));
                print_snapshot(snapshot);
            }
        });

        loop {
            if let Err(err) = self.manager.fetch_snapshot().await {
                if err.is_rate_limited() {
                    let wait = self
                        .breaker
                        .remaining()
                        .max(Duration::from_secs(1));
                    log::warn!(
                        "blocked by rate limit; next attempt in {}s",
                        wait.as_secs()
                    );
                    sleep(wait).await;
                    self.manager.reset_credits();
                    continue;
                }
            }
            sleep(interval).await;
        }
    }

    fn describe(&self, err: FetchError) -> AppError {
        if err.is_rate_limited() {
            let remaining = self.breaker.remaining();
            if remaining > Duration::ZERO {
                return AppError::message(format!(
                    "all upstream requests blocked; retry in {}s",
                    remaining.as_secs()
                ));
            }
        }
        AppError::Fetch(err)
    }
}

fn print_snapshot(snapshot: &MarketSnapshot) {
    println!(
        "market snapshot @ {} ({} symbols)",
        snapshot.last_updated.format("%Y-%m-%d %H:%M:%S UTC"),
        snapshot.symbols.len()
    );
    for quote in &snapshot.symbols {
        match &quote.error {
            Some(reason) => println!("{:<6} {:<28} unavailable: {reason}", quote.symbol, quote.name),
            None => println!(
                "{:<6} {:<28} {:>10.2}  {:>+8.2} ({:>+6.2}%)  vol {:>12}",
                quote.symbol,
                quote.name,
                quote.price,
                quote.change,
                quote.percent_change,
                quote.volume,
            ),
        }
    }
}
