use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::market::default_symbols;

pub const DEFAULT_BASE_URL: &str = "https://api.twelvedata.com";

/// Startup configuration for the coordination core. Nothing here is
/// hot-reloaded; the controller builds the object graph once from it.
#[derive(Debug, Clone)]
pub struct Settings {
    pub base_url: String,
    pub api_key: String,
    pub symbols: Vec<String>,
    /// Maximum age at which a cached payload is served without refetching.
    pub freshness_window: Duration,
    /// Minimum gap between two upstream attempts for the same cache key.
    pub min_request_interval: Duration,
    /// How long the circuit breaker suppresses all upstream calls after a
    /// rate-limit signal.
    pub breaker_cooldown: Duration,
    pub request_timeout: Duration,
    /// Delay the request queue inserts between consecutive upstream calls.
    pub queue_spacing: Duration,
    /// Directory for the optional durable cache; `None` disables it.
    pub cache_dir: Option<PathBuf>,
}

impl Settings {
    /// Defaults tuned for a free-tier quote API with a daily credit budget.
    pub fn builtin() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            symbols: default_symbols(),
            freshness_window: Duration::from_secs(45 * 60),
            min_request_interval: Duration::from_secs(45 * 60),
            breaker_cooldown: Duration::from_secs(3 * 60),
            request_timeout: Duration::from_secs(10),
            queue_spacing: Duration::from_secs(5),
            cache_dir: None,
        }
    }

    /// Build settings from the environment. `TWELVE_DATA_API_KEY` is
    /// required; everything else falls back to `builtin()`.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::builtin();

        settings.api_key = env::var("TWELVE_DATA_API_KEY").map_err(|_| {
            AppError::message("TWELVE_DATA_API_KEY environment variable is not set")
        })?;

        if let Ok(url) = env::var("MARKET_BASE_URL") {
            settings.base_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(raw) = env::var("MARKET_SYMBOLS") {
            let symbols: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !symbols.is_empty() {
                settings.symbols = symbols;
            }
        }

        if let Some(secs) = env_secs("MARKET_FRESHNESS_SECS")? {
            settings.freshness_window = secs;
        }
        if let Some(secs) = env_secs("MARKET_MIN_INTERVAL_SECS")? {
            settings.min_request_interval = secs;
        }
        if let Some(secs) = env_secs("MARKET_BREAKER_COOLDOWN_SECS")? {
            settings.breaker_cooldown = secs;
        }
        if let Some(secs) = env_secs("MARKET_REQUEST_TIMEOUT_SECS")? {
            settings.request_timeout = secs;
        }
        if let Some(secs) = env_secs("MARKET_QUEUE_SPACING_SECS")? {
            settings.queue_spacing = secs;
        }

        if let Ok(dir) = env::var("MARKET_CACHE_DIR") {
            if !dir.trim().is_empty() {
                settings.cache_dir = Some(PathBuf::from(dir));
            }
        }

        Ok(settings)
    }
}

fn env_secs(name: &str) -> Result<Option<Duration>> {
    match env::var(name) {
        Ok(raw) => {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                AppError::message(format!("{} must be a whole number of seconds: {}", name, raw))
            })?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_defaults_are_coherent() {
        let settings = Settings::builtin();
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.symbols.len(), 5);
        assert_eq!(settings.freshness_window, settings.min_request_interval);
        assert!(settings.breaker_cooldown < settings.freshness_window);
        assert!(settings.cache_dir.is_none());
    }

    #[test]
    fn env_secs_rejects_garbage() {
        std::env::set_var("MARKET_TEST_SECS_BOGUS", "ninety");
        assert!(env_secs("MARKET_TEST_SECS_BOGUS").is_err());
        std::env::remove_var("MARKET_TEST_SECS_BOGUS");
    }
}
