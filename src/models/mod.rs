use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One read from the price feed. `price` is `None` when the read failed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSample {
    pub timestamp: DateTime<Utc>,
    pub price: Option<Decimal>,
}

impl PriceSample {
    pub fn observed(timestamp: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            timestamp,
            price: Some(price),
        }
    }

    pub fn missing(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            price: None,
        }
    }

    /// The sample as a stored price point, if the read succeeded
    pub fn point(&self) -> Option<PricePoint> {
        self.price.map(|price| PricePoint {
            timestamp: self.timestamp,
            price,
        })
    }
}

/// Successful price read, as kept in the price log
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

impl PricePoint {
    pub fn new(timestamp: DateTime<Utc>, price: Decimal) -> Self {
        Self { timestamp, price }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeKind {
    Buy,
    Sell,
    Rebuy,
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TradeKind::Buy => "BUY",
            TradeKind::Sell => "SELL",
            TradeKind::Rebuy => "REBUY",
        };
        f.write_str(label)
    }
}

/// Simulated trade. Nothing is ever sent to a venue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TradeEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: TradeKind,
    pub price: Decimal,
}

/// Stage of a cycle. Only ever moves forward, one step at a time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Idle,
    Holding,
    Sold,
    Closed,
}

impl Phase {
    /// The only phase reachable from this one
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Idle => Some(Phase::Holding),
            Phase::Holding => Some(Phase::Sold),
            Phase::Sold => Some(Phase::Closed),
            Phase::Closed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::Closed
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Mutable core of one cycle.
///
/// Targets are fixed when the cycle starts and never touched again; only
/// `phase` changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleState {
    pub cycle_id: Uuid,
    pub phase: Phase,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub sell_target: Decimal,
    pub rebuy_target: Decimal,
    pub started_at: DateTime<Utc>,
}

impl CycleState {
    /// Step to `to`, refusing anything but the single forward transition
    pub fn advance(&mut self, to: Phase) -> bool {
        if self.phase.next() == Some(to) {
            self.phase = to;
            true
        } else {
            false
        }
    }
}
