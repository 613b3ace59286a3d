use crate::models::{PricePoint, TradeEvent};
use serde::Serialize;

/// Append-only record of every successful price read, in arrival order
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(transparent)]
pub struct PriceLog {
    points: Vec<PricePoint>,
}

impl PriceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, point: PricePoint) {
        self.points.push(point);
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn latest(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Append-only record of simulated trades.
///
/// Emission order is chronological order because a single loop feeds the
/// state machine.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(transparent)]
pub struct EventLog {
    events: Vec<TradeEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, event: TradeEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[TradeEvent] {
        &self.events
    }

    pub fn latest(&self) -> Option<&TradeEvent> {
        self.events.last()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
