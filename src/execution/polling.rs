use super::cycle::CycleRun;
use super::price_feed::PriceSource;
use crate::models::{Phase, PriceSample};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Notify;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

/// A run shared between the polling loop and its readers.
///
/// The lock is the only synchronisation point: it is taken for a single
/// `start`, `on_sample`, `stop` or `snapshot` call and never held across an
/// await, so readers see a prefix of the logs and never a reordering.
pub type SharedRun = Arc<RwLock<CycleRun>>;

pub fn share(run: CycleRun) -> SharedRun {
    Arc::new(RwLock::new(run))
}

pub(crate) fn read_run(run: &SharedRun) -> RwLockReadGuard<'_, CycleRun> {
    run.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_run(run: &SharedRun) -> RwLockWriteGuard<'_, CycleRun> {
    run.write().unwrap_or_else(PoisonError::into_inner)
}

/// Cooperative stop request.
///
/// The loop checks it at the top of every iteration; triggering it also cuts
/// short the wait between ticks, but never an in-flight price read.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `trigger` has been called
    pub async fn triggered(&self) {
        // Register before checking the flag so a concurrent trigger is not lost
        let notified = self.notify.notified();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

/// Why the loop returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    /// The rebuy happened
    Closed,
    /// Stop was requested, or the run was not active to begin with
    Cancelled,
    /// The source reported something retrying will not fix
    SourceFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Price reads attempted
    pub ticks: u64,
    /// Reads that came back unavailable and were skipped
    pub missed_ticks: u64,
    pub final_phase: Phase,
}

/// Drives a started [`CycleRun`] at a fixed cadence.
#[derive(Debug, Clone, Copy)]
pub struct PollingLoop {
    interval: Duration,
}

impl Default for PollingLoop {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}

impl PollingLoop {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll `source` until the cycle closes, `stop` fires, or the source fails
    /// for good.
    ///
    /// The loop is bound to the cycle that is running when it starts and
    /// never touches a later one. The first read happens one interval in,
    /// since the entry read already covers time zero. A stop request is
    /// honoured at the top of the next iteration; a read already in flight is
    /// allowed to finish first, and is dropped if its cycle is no longer the
    /// running one. Unavailable reads are logged and skipped; they never end
    /// the run on their own.
    pub async fn run<S>(&self, run: &SharedRun, source: &S, stop: &StopSignal) -> RunReport
    where
        S: PriceSource + ?Sized,
    {
        let (symbol, owned, mut phase) = {
            let guard = read_run(run);
            let owned = guard.cycle_id().filter(|id| guard.is_running(*id));
            (guard.config().symbol.clone(), owned, guard.phase())
        };
        let Some(cycle_id) = owned else {
            return RunReport {
                outcome: RunOutcome::Cancelled,
                ticks: 0,
                missed_ticks: 0,
                final_phase: phase,
            };
        };

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks = 0u64;
        let mut missed_ticks = 0u64;

        tracing::info!(
            symbol = %symbol,
            cycle_id = %cycle_id,
            source = source.name(),
            interval_ms = self.interval.as_millis() as u64,
            "🔄 Polling loop started"
        );

        let outcome = loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.triggered() => {}
            }

            if stop.is_triggered() {
                let mut guard = write_run(run);
                if guard.is_running(cycle_id) {
                    guard.stop();
                }
                break RunOutcome::Cancelled;
            }
            if !read_run(run).is_running(cycle_id) {
                break RunOutcome::Cancelled;
            }

            ticks += 1;
            match source.fetch_price(&symbol).await {
                Ok(price) => {
                    let applied = {
                        let mut guard = write_run(run);
                        if guard.is_running(cycle_id) {
                            guard.on_sample(PriceSample::observed(Utc::now(), price));
                            Some(guard.phase())
                        } else {
                            None
                        }
                    };
                    let Some(now) = applied else {
                        tracing::debug!(
                            symbol = %symbol,
                            price = %price,
                            "Dropping read for a finished cycle"
                        );
                        break RunOutcome::Cancelled;
                    };
                    phase = now;

                    tracing::info!(symbol = %symbol, price = %price, phase = %phase, "Price tick");

                    if phase.is_terminal() {
                        break RunOutcome::Closed;
                    }
                }
                Err(e) if e.is_transient() => {
                    missed_ticks += 1;
                    tracing::warn!(
                        symbol = %symbol,
                        error = %e,
                        "⚠️  Price feed unavailable, skipping tick"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        symbol = %symbol,
                        error = %e,
                        "❌ Price feed failed, ending run"
                    );
                    let mut guard = write_run(run);
                    if guard.is_running(cycle_id) {
                        guard.stop();
                    }
                    break RunOutcome::SourceFailed(e.to_string());
                }
            }
        };

        tracing::info!(
            symbol = %symbol,
            cycle_id = %cycle_id,
            outcome = ?outcome,
            ticks,
            missed_ticks,
            phase = %phase,
            "🏁 Polling loop finished"
        );

        RunReport {
            outcome,
            ticks,
            missed_ticks,
            final_phase: phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ScriptedPriceSource;
    use crate::config::StrategyConfig;
    use crate::models::{PricePoint, TradeKind};
    use rust_decimal_macros::dec;

    const FAST: Duration = Duration::from_millis(1);

    fn started_run() -> SharedRun {
        let mut run = CycleRun::new(StrategyConfig::default()).unwrap();
        run.start(PricePoint::new(Utc::now(), dec!(0.50))).unwrap();
        share(run)
    }

    #[tokio::test]
    async fn test_runs_reference_feed_to_close() {
        let run = started_run();
        let source = ScriptedPriceSource::new(vec![
            Some(dec!(0.49)),
            Some(dec!(0.51)),
            Some(dec!(0.50)),
            Some(dec!(0.4947)),
        ]);

        let report = PollingLoop::new(FAST).run(&run, &source, &StopSignal::new()).await;

        assert_eq!(report.outcome, RunOutcome::Closed);
        assert_eq!(report.ticks, 4);
        assert_eq!(report.missed_ticks, 0);
        assert_eq!(report.final_phase, Phase::Closed);

        let run = read_run(&run);
        let kinds: Vec<_> = run.event_log().events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![TradeKind::Buy, TradeKind::Sell, TradeKind::Rebuy]);
        assert!(!run.is_active());
    }

    #[tokio::test]
    async fn test_outage_is_skipped_and_polling_resumes() {
        let run = started_run();
        let source = ScriptedPriceSource::new(vec![
            Some(dec!(0.49)),
            None,
            Some(dec!(0.51)),
            Some(dec!(0.4947)),
        ]);

        let report = PollingLoop::new(FAST).run(&run, &source, &StopSignal::new()).await;

        assert_eq!(report.outcome, RunOutcome::Closed);
        assert_eq!(report.ticks, 4);
        assert_eq!(report.missed_ticks, 1);

        let prices: Vec<_> = read_run(&run)
            .price_log()
            .points()
            .iter()
            .map(|p| p.price)
            .collect();
        assert_eq!(prices, vec![dec!(0.50), dec!(0.49), dec!(0.51), dec!(0.4947)]);
    }

    #[tokio::test]
    async fn test_fatal_source_error_ends_run_and_keeps_phase() {
        let run = started_run();
        let source = ScriptedPriceSource::new(vec![Some(dec!(0.52))]);

        let report = PollingLoop::new(FAST).run(&run, &source, &StopSignal::new()).await;

        assert_eq!(
            report.outcome,
            RunOutcome::SourceFailed("price source failed: price script exhausted".to_string())
        );
        assert_eq!(report.final_phase, Phase::Sold);
        assert!(!read_run(&run).is_active());
    }

    #[tokio::test]
    async fn test_pre_triggered_stop_reads_nothing() {
        let run = started_run();
        let source = ScriptedPriceSource::new(vec![Some(dec!(0.51))]);
        let stop = StopSignal::new();
        stop.trigger();

        let report = PollingLoop::new(FAST).run(&run, &source, &stop).await;

        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(report.ticks, 0);
        assert_eq!(source.calls(), 0);
        assert_eq!(report.final_phase, Phase::Holding);
    }

    #[tokio::test]
    async fn test_idle_run_returns_immediately() {
        let run = share(CycleRun::new(StrategyConfig::default()).unwrap());
        let source = ScriptedPriceSource::new(vec![Some(dec!(0.51))]);

        let report = PollingLoop::new(FAST).run(&run, &source, &StopSignal::new()).await;

        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(report.final_phase, Phase::Idle);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_stop_from_another_task() {
        let run = started_run();
        let source = Arc::new(ScriptedPriceSource::new(vec![Some(dec!(0.50)); 10_000]));
        let stop = StopSignal::new();

        let handle = {
            let run = run.clone();
            let source = source.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                PollingLoop::new(Duration::from_millis(2))
                    .run(&run, source.as_ref(), &stop)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.trigger();
        let report = handle.await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(report.final_phase, Phase::Holding);
        assert!(!read_run(&run).is_active());
        assert!(report.ticks >= 1);
        assert_eq!(source.calls() as u64, report.ticks);
    }

    #[tokio::test]
    async fn test_first_read_waits_one_interval() {
        let run = started_run();
        let source = Arc::new(ScriptedPriceSource::new(vec![Some(dec!(0.51))]));
        let stop = StopSignal::new();

        let handle = {
            let run = run.clone();
            let source = source.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                PollingLoop::new(Duration::from_secs(3600))
                    .run(&run, source.as_ref(), &stop)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.trigger();
        let report = handle.await.unwrap();

        assert_eq!(report.ticks, 0);
        assert_eq!(source.calls(), 0);
        assert_eq!(read_run(&run).price_log().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_leaves_a_newer_cycle_alone() {
        let run = started_run();
        let source = Arc::new(ScriptedPriceSource::new(vec![Some(dec!(0.50)); 10_000]));
        let stop = StopSignal::new();

        let handle = {
            let run = run.clone();
            let source = source.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                PollingLoop::new(FAST).run(&run, source.as_ref(), &stop).await
            })
        };
        while source.calls() == 0 {
            tokio::task::yield_now().await;
        }

        // Replace the cycle behind the loop's back, then stop the old loop
        {
            let mut guard = write_run(&run);
            guard.stop();
            guard.start(PricePoint::new(Utc::now(), dec!(1.00))).unwrap();
        }
        stop.trigger();
        let report = handle.await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Cancelled);
        let guard = read_run(&run);
        assert!(guard.is_active());
        assert_eq!(guard.phase(), Phase::Holding);
        assert_eq!(guard.state().unwrap().entry_price, dec!(1.00));
        assert_eq!(guard.price_log().latest().unwrap().price, dec!(1.00));
    }

    #[test]
    fn test_default_interval_is_ten_seconds() {
        assert_eq!(PollingLoop::default().interval(), Duration::from_secs(10));
    }
}
