use crate::error::FeedError;
use crate::execution::PriceSource;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Replays a fixed list of readings, one per call, whatever the symbol.
///
/// `None` entries come back as [`FeedError::Unavailable`]. Once the list is
/// used up every call fails with [`FeedError::Fatal`], which ends a polling
/// loop that has not closed its cycle by then.
pub struct ScriptedPriceSource {
    readings: Mutex<VecDeque<Option<Decimal>>>,
    calls: AtomicUsize,
}

impl ScriptedPriceSource {
    pub fn new(readings: Vec<Option<Decimal>>) -> Self {
        Self {
            readings: Mutex::new(readings.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Parse a comma separated script such as `0.50,0.49,-,0.51`.
    ///
    /// `-` (or an empty entry) stands for a failed read.
    pub fn parse(script: &str) -> Result<Self, rust_decimal::Error> {
        let readings = script
            .split(',')
            .map(str::trim)
            .map(|entry| match entry {
                "" | "-" => Ok(None),
                price => Decimal::from_str(price).map(Some),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(readings))
    }

    /// Number of `fetch_price` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl PriceSource for ScriptedPriceSource {
    async fn fetch_price(&self, symbol: &str) -> Result<Decimal, FeedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match next {
            Some(Some(price)) => Ok(price),
            Some(None) => Err(FeedError::Unavailable(format!(
                "scripted outage for {}",
                symbol
            ))),
            None => Err(FeedError::Fatal("price script exhausted".to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
