use super::cycle::{CycleRun, RunSnapshot};
use super::polling::{read_run, share, write_run, PollingLoop, RunReport, SharedRun, StopSignal};
use super::price_feed::PriceSource;
use crate::config::StrategyConfig;
use crate::error::{CycleError, CycleResult};
use crate::models::PricePoint;
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

/// Start/stop front end for one symbol.
///
/// Commands may come from any task. At most one cycle runs at a time: the
/// shared run's lock decides which `start` wins, the loser gets
/// [`CycleError::AlreadyActive`].
pub struct SimulationSession<S> {
    source: Arc<S>,
    run: SharedRun,
    polling: PollingLoop,
    stop: Mutex<StopSignal>,
}

impl<S: PriceSource + 'static> SimulationSession<S> {
    pub fn new(config: StrategyConfig, source: S, polling: PollingLoop) -> CycleResult<Self> {
        Ok(Self {
            source: Arc::new(source),
            run: share(CycleRun::new(config)?),
            polling,
            stop: Mutex::new(StopSignal::new()),
        })
    }

    /// Buy at the current price and start polling in the background.
    ///
    /// The returned handle resolves when the loop ends. If the entry price
    /// cannot be read the command fails and no cycle is created.
    pub async fn start(&self) -> CycleResult<JoinHandle<RunReport>> {
        let symbol = {
            let run = read_run(&self.run);
            if run.is_active() {
                return Err(CycleError::AlreadyActive);
            }
            run.config().symbol.clone()
        };

        let price = self.source.fetch_price(&symbol).await.map_err(|e| {
            tracing::warn!(symbol = %symbol, error = %e, "Could not read entry price");
            e
        })?;
        write_run(&self.run).start(PricePoint::new(Utc::now(), price))?;

        let stop = StopSignal::new();
        *self.stop.lock().unwrap_or_else(PoisonError::into_inner) = stop.clone();

        let run = self.run.clone();
        let source = self.source.clone();
        let polling = self.polling;
        Ok(tokio::spawn(async move {
            polling.run(&run, source.as_ref(), &stop).await
        }))
    }

    /// Ask the running loop to stop. Safe to call at any time, any number of
    /// times; returns whether a cycle was actually running.
    pub fn stop(&self) -> bool {
        self.stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .trigger();
        let stopped = write_run(&self.run).stop();
        if stopped {
            tracing::info!("⏹️  Simulation stopped on request");
        }
        stopped
    }

    pub fn is_active(&self) -> bool {
        read_run(&self.run).is_active()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        read_run(&self.run).snapshot()
    }

    /// Handle for readers that want to follow the run themselves
    pub fn shared_run(&self) -> SharedRun {
        self.run.clone()
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ScriptedPriceSource;
    use crate::error::FeedError;
    use crate::execution::RunOutcome;
    use crate::execution::CachedPriceSource;
    use crate::models::{Phase, TradeKind};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    /// Answers each call with the next price, after that call's delay
    struct LaggingSource {
        replies: Mutex<VecDeque<(Duration, Decimal)>>,
        calls: AtomicUsize,
    }

    impl LaggingSource {
        fn new(replies: Vec<(Duration, Decimal)>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PriceSource for LaggingSource {
        async fn fetch_price(&self, _symbol: &str) -> Result<Decimal, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some((delay, price)) => {
                    tokio::time::sleep(delay).await;
                    Ok(price)
                }
                None => Err(FeedError::Unavailable("no reply queued".to_string())),
            }
        }

        fn name(&self) -> &str {
            "lagging"
        }
    }

    fn session(
        readings: Vec<Option<Decimal>>,
        every: Duration,
    ) -> SimulationSession<ScriptedPriceSource> {
        SimulationSession::new(
            StrategyConfig::default(),
            ScriptedPriceSource::new(readings),
            PollingLoop::new(every),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_full_cycle_through_session() {
        let session = session(
            vec![
                Some(dec!(0.50)),
                Some(dec!(0.49)),
                Some(dec!(0.51)),
                Some(dec!(0.50)),
                Some(dec!(0.4947)),
            ],
            Duration::from_millis(1),
        );

        let handle = assert_ok!(session.start().await);
        let report = handle.await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Closed);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, Phase::Closed);
        assert!(!snapshot.active);
        assert_eq!(snapshot.current_price, Some(dec!(0.4947)));
        assert_eq!(snapshot.price_log.len(), 5);
        let kinds: Vec<_> = snapshot.event_log.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![TradeKind::Buy, TradeKind::Sell, TradeKind::Rebuy]);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_running() {
        let session = session(vec![Some(dec!(0.50)); 100], Duration::from_secs(3600));

        let handle = assert_ok!(session.start().await);
        let before = session.snapshot().cycle;

        let second = session.start().await;
        assert_eq!(assert_err!(second), CycleError::AlreadyActive);
        assert_eq!(session.snapshot().cycle, before);
        assert_eq!(session.snapshot().event_log.len(), 1);

        assert!(session.stop());
        let report = handle.await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(report.final_phase, Phase::Holding);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_keeps_phase() {
        let mut readings = vec![Some(dec!(0.50)), Some(dec!(0.52))];
        readings.extend(std::iter::repeat(Some(dec!(0.51))).take(10_000));
        let session = session(readings, Duration::from_millis(5));
        assert!(!session.stop());

        let handle = assert_ok!(session.start().await);
        // first loop read sells at 0.52, later ones sit between the targets
        while session.snapshot().phase != Phase::Sold {
            tokio::task::yield_now().await;
        }

        assert!(session.stop());
        assert!(!session.stop());
        let report = handle.await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(session.snapshot().phase, Phase::Sold);
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_entry_read_failure_creates_nothing() {
        let session = session(vec![None], Duration::from_millis(1));

        let result = session.start().await;

        assert!(matches!(
            result,
            Err(CycleError::Feed(FeedError::Unavailable(_)))
        ));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, Phase::Idle);
        assert!(snapshot.cycle.is_none());
        assert!(snapshot.price_log.is_empty());
    }

    #[tokio::test]
    async fn test_restart_after_close() {
        let session = session(
            vec![
                Some(dec!(0.50)),
                Some(dec!(0.51)),
                Some(dec!(0.49)),
                Some(dec!(1.00)),
                Some(dec!(1.02)),
                Some(dec!(0.98)),
            ],
            Duration::from_millis(1),
        );

        let first = session.start().await.unwrap().await.unwrap();
        assert_eq!(first.outcome, RunOutcome::Closed);

        let second = session.start().await.unwrap().await.unwrap();
        assert_eq!(second.outcome, RunOutcome::Closed);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.event_log.len(), 6);
        assert_eq!(snapshot.cycle.unwrap().entry_price, dec!(1.00));
        assert_eq!(session.source().remaining(), 0);
    }

    #[tokio::test]
    async fn test_restart_while_old_read_in_flight() {
        let source = LaggingSource::new(vec![
            (Duration::ZERO, dec!(0.50)),
            (Duration::from_millis(200), dec!(1.05)),
            (Duration::ZERO, dec!(1.00)),
        ]);
        let session = SimulationSession::new(
            StrategyConfig::default(),
            source,
            PollingLoop::new(Duration::from_millis(10)),
        )
        .unwrap();

        let old = assert_ok!(session.start().await);
        while session.source().calls() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(session.stop());
        let new = assert_ok!(session.start().await);

        // The stale 1.05 would sell the new cycle (target 1.02)
        let report = old.await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(report.final_phase, Phase::Holding);

        let snapshot = session.snapshot();
        assert!(snapshot.active);
        assert_eq!(snapshot.phase, Phase::Holding);
        let events: Vec<_> = snapshot
            .event_log
            .events()
            .iter()
            .map(|e| (e.kind, e.price))
            .collect();
        assert_eq!(
            events,
            vec![(TradeKind::Buy, dec!(0.50)), (TradeKind::Buy, dec!(1.00))]
        );
        assert!(snapshot.price_log.points().iter().all(|p| p.price != dec!(1.05)));

        assert!(session.stop());
        assert_eq!(new.await.unwrap().outcome, RunOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cached_entry_read_is_logged_once() {
        let inner = ScriptedPriceSource::new(vec![Some(dec!(0.50)), Some(dec!(0.49))]);
        let session = SimulationSession::new(
            StrategyConfig::default(),
            CachedPriceSource::new(inner, Duration::from_secs(5)),
            PollingLoop::new(Duration::from_secs(10)),
        )
        .unwrap();

        let handle = assert_ok!(session.start().await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.stop();
        handle.await.unwrap();

        let prices: Vec<_> = session
            .snapshot()
            .price_log
            .points()
            .iter()
            .map(|p| p.price)
            .collect();
        assert_eq!(prices, vec![dec!(0.50)]);
        assert_eq!(session.source().inner().calls(), 1);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = StrategyConfig {
            rebuy_drop_pct: dec!(0),
            ..StrategyConfig::default()
        };
        let result = SimulationSession::new(
            config,
            ScriptedPriceSource::new(vec![]),
            PollingLoop::default(),
        );
        assert!(matches!(result, Err(CycleError::InvalidConfig(_))));
    }
}
