use crate::config::FeedSettings;
use crate::error::FeedError;
use crate::execution::PriceSource;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const TICKER_PRICE_PATH: &str = "/api/v3/ticker/price";

// Type alias for the rate limiter to simplify signatures
type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Read-only client for the public Binance spot ticker.
///
/// One HTTP attempt per call: retrying is the polling loop's business, it
/// simply asks again on the next tick. Clones share the rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<BinanceRateLimiter>,
}

/// Response from /api/v3/ticker/price
#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

/// Error body Binance sends with 4xx responses
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

impl BinanceClient {
    pub fn new(settings: &FeedSettings) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| FeedError::Fatal(format!("failed to build HTTP client: {}", e)))?;

        let per_minute = NonZeroU32::new(settings.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)));

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Decimal, FeedError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, TICKER_PRICE_PATH);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| FeedError::Unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let ticker: TickerPrice = response
                .json()
                .await
                .map_err(|e| FeedError::Unavailable(format!("malformed ticker: {}", e)))?;
            return parse_ticker(symbol, ticker);
        }

        // Throttling (429, or 418 once Binance bans the IP for a while) and
        // server errors pass; anything else means the request itself is wrong.
        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::IM_A_TEAPOT
            || status.is_server_error()
        {
            return Err(FeedError::Unavailable(format!("Binance returned {}", status)));
        }

        let body = response.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|e| format!("{} (code {})", e.msg, e.code))
            .unwrap_or(body);
        Err(FeedError::Fatal(format!(
            "Binance rejected {} ({}): {}",
            symbol, status, reason
        )))
    }
}

fn parse_ticker(symbol: &str, ticker: TickerPrice) -> Result<Decimal, FeedError> {
    if ticker.symbol != symbol {
        return Err(FeedError::Unavailable(format!(
            "asked for {} but got a quote for {}",
            symbol, ticker.symbol
        )));
    }

    let price = Decimal::from_str(&ticker.price)
        .map_err(|e| FeedError::Unavailable(format!("bad price {:?}: {}", ticker.price, e)))?;
    if price <= Decimal::ZERO {
        return Err(FeedError::Unavailable(format!(
            "non-positive price {} for {}",
            price, symbol
        )));
    }
    Ok(price.normalize())
}

#[async_trait]
impl PriceSource for BinanceClient {
    async fn fetch_price(&self, symbol: &str) -> Result<Decimal, FeedError> {
        let symbol = symbol.to_uppercase();
        let price = self.fetch_ticker(&symbol).await?;
        tracing::debug!(symbol = %symbol, price = %price, "Fetched Binance ticker");
        Ok(price)
    }

    fn name(&self) -> &str {
        "binance"
    }
}
