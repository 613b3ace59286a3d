//! Buy -> sell -> rebuy state machine.
//!
//! ```plain
//!   Idle --start--> Holding --p >= sell--> Sold --p <= rebuy--> Closed
//!                      |                     |
//!                      +------- stop --------+--> (inactive, phase kept)
//! ```
//!
//! Pure and synchronous: no clock, no I/O, no locks. The driver hands it
//! timestamped samples and reads back the logs.

use crate::config::StrategyConfig;
use crate::error::{CycleError, CycleResult};
use crate::execution::journal::{EventLog, PriceLog};
use crate::models::{CycleState, Phase, PricePoint, PriceSample, TradeEvent, TradeKind};
use crate::strategy::{compute_quantity, compute_targets};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// One simulation run: the current cycle plus the logs it has produced.
///
/// The logs outlive individual cycles; a cycle that closed or was stopped can
/// be followed by a new `start` and its events are appended after the old
/// ones.
#[derive(Debug, Clone)]
pub struct CycleRun {
    config: StrategyConfig,
    cycle: Option<CycleState>,
    active: bool,
    current_price: Option<Decimal>,
    price_log: PriceLog,
    event_log: EventLog,
}

/// Read-only copy of a run, for whoever renders it
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSnapshot {
    pub symbol: String,
    pub phase: Phase,
    pub active: bool,
    pub current_price: Option<Decimal>,
    pub cycle: Option<CycleState>,
    pub price_log: PriceLog,
    pub event_log: EventLog,
}

impl CycleRun {
    pub fn new(config: StrategyConfig) -> CycleResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cycle: None,
            active: false,
            current_price: None,
            price_log: PriceLog::new(),
            event_log: EventLog::new(),
        })
    }

    /// Open a cycle at `entry`: size the position, fix both targets and
    /// record the buy.
    ///
    /// Rejected with [`CycleError::AlreadyActive`] while a cycle is running;
    /// nothing changes in that case, and nothing changes either if the entry
    /// price cannot produce valid targets.
    pub fn start(&mut self, entry: PricePoint) -> CycleResult<TradeEvent> {
        if self.active {
            return Err(CycleError::AlreadyActive);
        }

        let quantity = compute_quantity(self.config.capital, entry.price)?;
        let targets = compute_targets(
            entry.price,
            self.config.sell_target_pct,
            self.config.rebuy_drop_pct,
        )?;

        let mut state = CycleState {
            cycle_id: Uuid::new_v4(),
            phase: Phase::Idle,
            entry_price: entry.price,
            quantity,
            sell_target: targets.sell_target,
            rebuy_target: targets.rebuy_target,
            started_at: entry.timestamp,
        };
        state.advance(Phase::Holding);

        tracing::info!(
            cycle_id = %state.cycle_id,
            symbol = %self.config.symbol,
            quantity = %state.quantity,
            entry = %state.entry_price,
            sell_target = %state.sell_target,
            rebuy_target = %state.rebuy_target,
            "🟢 Simulated buy"
        );

        self.cycle = Some(state);
        self.active = true;
        self.observe(entry);
        Ok(self.emit(entry, TradeKind::Buy))
    }

    /// Feed one sample. Returns the trade it triggered, if any.
    ///
    /// Failed reads and samples arriving while no cycle is active are dropped
    /// without touching the logs.
    pub fn on_sample(&mut self, sample: PriceSample) -> Option<TradeEvent> {
        if !self.active {
            return None;
        }
        let point = sample.point()?;
        self.observe(point);

        let state = self.cycle.as_mut()?;
        let kind = match state.phase {
            Phase::Holding if point.price >= state.sell_target => {
                state.advance(Phase::Sold);
                TradeKind::Sell
            }
            Phase::Sold if point.price <= state.rebuy_target => {
                state.advance(Phase::Closed);
                self.active = false;
                TradeKind::Rebuy
            }
            _ => return None,
        };

        tracing::info!(
            cycle_id = %state.cycle_id,
            price = %point.price,
            phase = %state.phase,
            "{} Simulated {}",
            if kind == TradeKind::Sell { "🔴" } else { "🔵" },
            kind
        );

        Some(self.emit(point, kind))
    }

    /// Abandon the running cycle. The phase it reached stays readable.
    ///
    /// Returns `false` when there was nothing to stop.
    pub fn stop(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        if let Some(state) = &self.cycle {
            tracing::warn!(
                cycle_id = %state.cycle_id,
                phase = %state.phase,
                "⏹️  Cycle stopped"
            );
        }
        true
    }

    fn observe(&mut self, point: PricePoint) {
        self.price_log.append(point);
        self.current_price = Some(point.price);
    }

    fn emit(&mut self, point: PricePoint, kind: TradeKind) -> TradeEvent {
        let event = TradeEvent {
            timestamp: point.timestamp,
            kind,
            price: point.price,
        };
        self.event_log.append(event);
        event
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.cycle.as_ref().map_or(Phase::Idle, |c| c.phase)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> Option<&CycleState> {
        self.cycle.as_ref()
    }

    /// Id of the current (or last) cycle
    pub fn cycle_id(&self) -> Option<Uuid> {
        self.cycle.as_ref().map(|c| c.cycle_id)
    }

    /// Whether `cycle_id` is the cycle currently running
    pub fn is_running(&self, cycle_id: Uuid) -> bool {
        self.active && self.cycle_id() == Some(cycle_id)
    }

    /// Last successfully read price
    pub fn current_price(&self) -> Option<Decimal> {
        self.current_price
    }

    pub fn price_log(&self) -> &PriceLog {
        &self.price_log
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            symbol: self.config.symbol.clone(),
            phase: self.phase(),
            active: self.active,
            current_price: self.current_price,
            cycle: self.cycle.clone(),
            price_log: self.price_log.clone(),
            event_log: self.event_log.clone(),
        }
    }
}
