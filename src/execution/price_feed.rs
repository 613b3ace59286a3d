use crate::error::FeedError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Anything that can quote the current price of a symbol.
///
/// Failing to quote is a normal outcome, not an exceptional one; see
/// [`FeedError`] for which failures the caller should retry.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_price(&self, symbol: &str) -> Result<Decimal, FeedError>;

    /// Source name, for logs
    fn name(&self) -> &str;
}

/// Short-lived read cache in front of another source.
///
/// A quote younger than `ttl` is served again instead of calling the inner
/// source. Only successful reads are cached, so a failed read is retried on
/// the next call.
pub struct CachedPriceSource<S> {
    inner: S,
    ttl: Duration,
    quotes: Mutex<HashMap<String, (Instant, Decimal)>>,
}

impl<S: PriceSource> CachedPriceSource<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            quotes: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn cached(&self, symbol: &str) -> Option<Decimal> {
        let quotes = self.quotes.lock().unwrap_or_else(PoisonError::into_inner);
        quotes
            .get(symbol)
            .filter(|(fetched_at, _)| fetched_at.elapsed() < self.ttl)
            .map(|(_, price)| *price)
    }

    fn remember(&self, symbol: &str, price: Decimal) {
        let mut quotes = self.quotes.lock().unwrap_or_else(PoisonError::into_inner);
        quotes.insert(symbol.to_string(), (Instant::now(), price));
    }
}

#[async_trait]
impl<S: PriceSource> PriceSource for CachedPriceSource<S> {
    async fn fetch_price(&self, symbol: &str) -> Result<Decimal, FeedError> {
        if let Some(price) = self.cached(symbol) {
            tracing::debug!(symbol, price = %price, "Serving cached price");
            return Ok(price);
        }

        let price = self.inner.fetch_price(symbol).await?;
        self.remember(symbol, price);
        Ok(price)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
