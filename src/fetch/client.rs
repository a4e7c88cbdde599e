use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;

use crate::config::Settings;
use crate::error::{AppError, FetchError, FetchResult, Result};
use crate::fetch::decode;

const USER_AGENT: &str = "Market-Dashboard/1.0";

/// Classified outcome of one upstream HTTP call. Expected upstream error
/// shapes land here instead of being thrown; only broken configuration is an
/// error at construction time.
#[derive(Debug)]
pub enum Classified {
    Success(Value),
    RateLimited { retry_after: Option<Duration> },
    Malformed(String),
    Timeout(Duration),
    Network(String),
}

impl Classified {
    pub fn into_result(self) -> FetchResult<Value> {
        match self {
            Classified::Success(value) => Ok(value),
            Classified::RateLimited { retry_after } => Err(FetchError::RateLimited {
                retry_after: retry_after.unwrap_or(Duration::ZERO),
            }),
            Classified::Malformed(reason) => Err(FetchError::Malformed(reason)),
            Classified::Timeout(bound) => Err(FetchError::Timeout(bound)),
            Classified::Network(reason) => Err(FetchError::Upstream(reason)),
        }
    }
}

/// Outbound quote API surface. The HTTP client implements this; tests
/// substitute stubs.
pub trait QuoteApi: Send + Sync {
    /// One batch quote call for a symbol set.
    fn batch_quotes(&self, symbols: &[String]) -> BoxFuture<'static, Classified>;
    /// Intraday series for one symbol, newest bar first in the raw payload.
    fn time_series(
        &self,
        symbol: &str,
        interval: &str,
        output_size: u32,
    ) -> BoxFuture<'static, Classified>;
}

/// Thin wrapper over the provider's quote and time-series endpoints. Every
/// call is bounded by the configured timeout.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        if settings.api_key.trim().is_empty() || settings.api_key == "demo" {
            return Err(AppError::message(
                "upstream API key is not configured; set TWELVE_DATA_API_KEY",
            ));
        }

        let client = Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            timeout: settings.request_timeout,
        })
    }

    async fn call(&self, url: &str) -> Classified {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => return Classified::Timeout(self.timeout),
            Err(err) => return Classified::Network(err.to_string()),
        };

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Classified::RateLimited {
                retry_after: parse_retry_after(&response),
            };
        }

        if !response.status().is_success() {
            return Classified::Network(format!(
                "upstream responded with status {}",
                response.status()
            ));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(err) if err.is_timeout() => return Classified::Timeout(self.timeout),
            Err(err) => return Classified::Network(err.to_string()),
        };

        let value: Value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => return Classified::Malformed(format!("invalid JSON payload: {err}")),
        };

        // Credit exhaustion can also arrive as a 200-status error body.
        if decode::is_credit_exhausted(&value) {
            log::warn!("upstream reported credit exhaustion inside a 200 response");
            return Classified::RateLimited { retry_after: None };
        }

        Classified::Success(value)
    }
}

impl QuoteApi for UpstreamClient {
    fn batch_quotes(&self, symbols: &[String]) -> BoxFuture<'static, Classified> {
        let url = format!(
            "{}/quote?symbol={}&apikey={}",
            self.base_url,
            symbols.join(","),
            self.api_key
        );
        let this = self.clone();
        async move { this.call(&url).await }.boxed()
    }

    fn time_series(
        &self,
        symbol: &str,
        interval: &str,
        output_size: u32,
    ) -> BoxFuture<'static, Classified> {
        let url = format!(
            "{}/time_series?symbol={}&interval={}&outputsize={}&apikey={}",
            self.base_url, symbol, interval, output_size, self.api_key
        );
        let this = self.clone();
        async move { this.call(&url).await }.boxed()
    }
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_key(key: &str) -> Settings {
        let mut settings = Settings::builtin();
        settings.api_key = key.to_string();
        settings
    }

    #[test]
    fn rejects_missing_api_key() {
        assert!(UpstreamClient::new(&Settings::builtin()).is_err());
        assert!(UpstreamClient::new(&settings_with_key("demo")).is_err());
        assert!(UpstreamClient::new(&settings_with_key("real-key")).is_ok());
    }

    #[test]
    fn classified_maps_onto_error_taxonomy() {
        let limited = Classified::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        }
        .into_result();
        match limited {
            Err(FetchError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(30))
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }

        assert!(matches!(
            Classified::Timeout(Duration::from_secs(10)).into_result(),
            Err(FetchError::Timeout(_))
        ));
        assert!(matches!(
            Classified::Network("503".to_string()).into_result(),
            Err(FetchError::Upstream(_))
        ));
        assert!(matches!(
            Classified::Malformed("bad json".to_string()).into_result(),
            Err(FetchError::Malformed(_))
        ));
    }
}
