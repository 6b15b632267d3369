use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pnlwatch_domain::repositories::snapshot_source::{FetchError, SnapshotSource};
use pnlwatch_domain::repositories::state_store::StateStore;
use pnlwatch_domain::services::store::PositionStore;
use pnlwatch_domain::value_objects::balance::BalanceSnapshot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone)]
pub struct UpdateSummary {
    pub balance: BalanceSnapshot,
    pub open_positions: usize,
    pub samples_appended: usize,
    pub trackers_closed: usize,
    pub at: DateTime<Utc>,
}

pub enum PollerEvent {
    Updated(UpdateSummary),
    CycleError(String),
    AuthFailure(String),
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub poll_interval: Duration,
    pub save_interval: Duration,
}

/// Seeds a freshly built store from the persisted documents. Load failures
/// are logged and leave the store empty; startup never fails on state.
pub fn seed_store(store: &PositionStore, state: &dyn StateStore) {
    let now = Utc::now();
    match state.load_history() {
        Ok(history) => store.seed_history(history, now),
        Err(err) => tracing::warn!(error = %err, "failed to load pnl history, starting empty"),
    }
    match state.load_hold() {
        Ok(symbols) => store.seed_hold(&symbols),
        Err(err) => tracing::warn!(error = %err, "failed to load hold set, starting empty"),
    }
}

/// Drives the periodic ingest cycle: fetch, ingest, throttled save. One
/// cycle runs at a time; a tick that lands while the previous cycle is
/// still in flight is skipped. Stopping via the watch channel flushes both
/// state documents unconditionally.
pub struct Poller {
    shared: Arc<CycleState>,
    poll_interval: Duration,
}

struct CycleState {
    store: Arc<PositionStore>,
    source: Arc<dyn SnapshotSource>,
    state: Arc<dyn StateStore>,
    events: mpsc::UnboundedSender<PollerEvent>,
    save_interval: Duration,
    last_save: Mutex<Option<Instant>>,
    in_flight: AtomicBool,
    auth_failed: AtomicBool,
}

impl Poller {
    pub fn new(
        store: Arc<PositionStore>,
        source: Arc<dyn SnapshotSource>,
        state: Arc<dyn StateStore>,
        settings: PollerSettings,
        events: mpsc::UnboundedSender<PollerEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(CycleState {
                store,
                source,
                state,
                events,
                save_interval: settings.save_interval,
                last_save: Mutex::new(None),
                in_flight: AtomicBool::new(false),
                auth_failed: AtomicBool::new(false),
            }),
            poll_interval: settings.poll_interval,
        }
    }

    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycle: Option<tokio::task::JoinHandle<()>> = None;

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if self.shared.auth_failed.load(Ordering::Acquire) {
                        break;
                    }
                    if self
                        .shared
                        .in_flight
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        let shared = self.shared.clone();
                        cycle = Some(tokio::task::spawn_blocking(move || {
                            shared.run_cycle();
                            shared.in_flight.store(false, Ordering::Release);
                        }));
                    } else {
                        metrics::counter!("pnlwatch.poll.ticks_skipped_total").increment(1);
                        tracing::debug!("previous ingest cycle still in flight, skipping tick");
                    }
                }
            }
        }

        // an in-flight cycle may save state; let it finish before the
        // final flush so two writers never touch the same document
        if let Some(handle) = cycle.take() {
            let _ = handle.await;
        }
        let shared = self.shared.clone();
        let _ = tokio::task::spawn_blocking(move || shared.flush(true)).await;
        let _ = self.shared.events.send(PollerEvent::Stopped);
    }
}

impl CycleState {
    fn run_cycle(&self) {
        let started = Instant::now();
        let balance = match self.source.fetch_balance() {
            Ok(balance) => balance,
            Err(err) => return self.report_fetch_error(err, started),
        };
        let positions = match self.source.fetch_positions() {
            Ok(positions) => positions,
            Err(err) => return self.report_fetch_error(err, started),
        };

        let now = Utc::now();
        let outcome = self.store.ingest(&positions, now);
        if outcome.entries_skipped > 0 {
            tracing::warn!(
                skipped = outcome.entries_skipped,
                "snapshots without a symbol were skipped"
            );
        }

        metrics::counter!("pnlwatch.poll.cycles_total", "result" => "ok").increment(1);
        metrics::histogram!("pnlwatch.poll.cycle_ms", "result" => "ok")
            .record(started.elapsed().as_millis() as f64);

        let _ = self.events.send(PollerEvent::Updated(UpdateSummary {
            balance,
            open_positions: self.store.active_trackers().len(),
            samples_appended: outcome.samples_appended,
            trackers_closed: outcome.trackers_closed,
            at: now,
        }));

        self.flush(false);
    }

    fn report_fetch_error(&self, err: FetchError, started: Instant) {
        metrics::counter!("pnlwatch.poll.cycles_total", "result" => "err").increment(1);
        metrics::histogram!("pnlwatch.poll.cycle_ms", "result" => "err")
            .record(started.elapsed().as_millis() as f64);
        match err {
            FetchError::Auth(msg) => {
                tracing::error!(error = %msg, "credential rejected, stopping polling");
                self.auth_failed.store(true, Ordering::Release);
                let _ = self.events.send(PollerEvent::AuthFailure(msg));
            }
            FetchError::Transient(msg) => {
                tracing::warn!(error = %msg, "fetch failed, keeping last known state");
                let _ = self.events.send(PollerEvent::CycleError(msg));
            }
        }
    }

    /// History saves are throttled (dirty + interval elapsed); the hold
    /// document saves whenever it is dirty. `force` writes both documents
    /// regardless, for graceful shutdown.
    fn flush(&self, force: bool) {
        let throttle_elapsed = match *self.last_save.lock() {
            Some(at) => at.elapsed() >= self.save_interval,
            None => true,
        };

        if force || (self.store.history_dirty() && throttle_elapsed) {
            let history = self.store.export_history();
            match self.state.save_history(&history) {
                Ok(()) => self.store.clear_history_dirty(),
                Err(err) => tracing::warn!(error = %err, "failed to save pnl history"),
            }
            *self.last_save.lock() = Some(Instant::now());
        }

        if force || self.store.hold_dirty() {
            let symbols = self.store.hold_symbols();
            match self.state.save_hold(&symbols) {
                Ok(()) => self.store.clear_hold_dirty(),
                Err(err) => tracing::warn!(error = %err, "failed to save hold set"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{seed_store, Poller, PollerEvent, PollerSettings};
    use chrono::{Duration as ChronoDuration, Utc};
    use parking_lot::Mutex;
    use pnlwatch_domain::repositories::snapshot_source::{FetchError, SnapshotSource};
    use pnlwatch_domain::repositories::state_store::StateStore;
    use pnlwatch_domain::services::store::PositionStore;
    use pnlwatch_domain::value_objects::balance::BalanceSnapshot;
    use pnlwatch_domain::value_objects::pnl_sample::PnlSample;
    use pnlwatch_domain::value_objects::snapshot::PositionSnapshot;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, watch};

    struct ScriptedSource {
        fetch_calls: AtomicUsize,
        positions: Mutex<Vec<Result<Vec<PositionSnapshot>, FetchError>>>,
        fetch_delay: Duration,
    }

    impl ScriptedSource {
        fn new(positions: Vec<Result<Vec<PositionSnapshot>, FetchError>>) -> Self {
            Self {
                fetch_calls: AtomicUsize::new(0),
                positions: Mutex::new(positions),
                fetch_delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.fetch_delay = delay;
            self
        }

        fn calls(&self) -> usize {
            self.fetch_calls.load(Ordering::Relaxed)
        }
    }

    impl SnapshotSource for ScriptedSource {
        fn fetch_balance(&self) -> Result<BalanceSnapshot, FetchError> {
            Ok(BalanceSnapshot::default())
        }

        fn fetch_positions(&self) -> Result<Vec<PositionSnapshot>, FetchError> {
            self.fetch_calls.fetch_add(1, Ordering::Relaxed);
            std::thread::sleep(self.fetch_delay);
            let mut scripted = self.positions.lock();
            if scripted.is_empty() {
                Ok(Vec::new())
            } else {
                scripted.remove(0)
            }
        }
    }

    #[derive(Default)]
    struct MemoryStateStore {
        history: Mutex<BTreeMap<String, Vec<PnlSample>>>,
        hold: Mutex<Vec<String>>,
        history_saves: AtomicUsize,
    }

    impl StateStore for MemoryStateStore {
        fn load_history(&self) -> Result<BTreeMap<String, Vec<PnlSample>>, String> {
            Ok(self.history.lock().clone())
        }

        fn save_history(
            &self,
            history: &BTreeMap<String, Vec<PnlSample>>,
        ) -> Result<(), String> {
            self.history_saves.fetch_add(1, Ordering::Relaxed);
            *self.history.lock() = history.clone();
            Ok(())
        }

        fn load_hold(&self) -> Result<Vec<String>, String> {
            Ok(self.hold.lock().clone())
        }

        fn save_hold(&self, symbols: &[String]) -> Result<(), String> {
            *self.hold.lock() = symbols.to_vec();
            Ok(())
        }
    }

    /// State store with a slow write path that records how many
    /// `save_history` calls ran at the same time.
    struct SlowStateStore {
        history: Mutex<BTreeMap<String, Vec<PnlSample>>>,
        active_writers: AtomicUsize,
        max_writers: AtomicUsize,
        write_delay: Duration,
    }

    impl SlowStateStore {
        fn new(write_delay: Duration) -> Self {
            Self {
                history: Mutex::new(BTreeMap::new()),
                active_writers: AtomicUsize::new(0),
                max_writers: AtomicUsize::new(0),
                write_delay,
            }
        }
    }

    impl StateStore for SlowStateStore {
        fn load_history(&self) -> Result<BTreeMap<String, Vec<PnlSample>>, String> {
            Ok(self.history.lock().clone())
        }

        fn save_history(
            &self,
            history: &BTreeMap<String, Vec<PnlSample>>,
        ) -> Result<(), String> {
            let active = self.active_writers.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_writers.fetch_max(active, Ordering::SeqCst);
            std::thread::sleep(self.write_delay);
            *self.history.lock() = history.clone();
            self.active_writers.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        fn load_hold(&self) -> Result<Vec<String>, String> {
            Ok(Vec::new())
        }

        fn save_hold(&self, _symbols: &[String]) -> Result<(), String> {
            Ok(())
        }
    }

    fn snapshot(symbol: &str, pnl: f64) -> PositionSnapshot {
        PositionSnapshot {
            symbol: symbol.to_string(),
            quantity: 1.0,
            average_price: Some(10.0),
            unrealized_pnl: Some(pnl),
            realized_pnl: None,
        }
    }

    fn settings(poll_ms: u64) -> PollerSettings {
        PollerSettings {
            poll_interval: Duration::from_millis(poll_ms),
            save_interval: Duration::from_secs(300),
        }
    }

    async fn recv_until_stopped(
        rx: &mut mpsc::UnboundedReceiver<PollerEvent>,
    ) -> Vec<PollerEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("poller should emit before timeout")
                .expect("channel open");
            let stopped = matches!(event, PollerEvent::Stopped);
            events.push(event);
            if stopped {
                return events;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn successful_cycle_ingests_and_emits_update() {
        let store = Arc::new(PositionStore::default());
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![snapshot("BTCUSDT", 5.0)])]));
        let state = Arc::new(MemoryStateStore::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let poller = Poller::new(store.clone(), source, state, settings(20), tx);
        let handle = tokio::spawn(poller.run(stop_rx));

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open");
        match first {
            PollerEvent::Updated(summary) => {
                assert_eq!(summary.open_positions, 1);
                assert_eq!(summary.samples_appended, 1);
            }
            _ => panic!("expected an update event"),
        }
        assert!(store.get("BTCUSDT").is_some());

        stop_tx.send(true).expect("stop");
        handle.await.expect("poller task");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_error_skips_cycle_without_mutation() {
        let store = Arc::new(PositionStore::default());
        let source = Arc::new(ScriptedSource::new(vec![Err(FetchError::Transient(
            "timeout".to_string(),
        ))]));
        let state = Arc::new(MemoryStateStore::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let poller = Poller::new(store.clone(), source, state, settings(20), tx);
        let handle = tokio::spawn(poller.run(stop_rx));

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open");
        assert!(matches!(first, PollerEvent::CycleError(_)));
        assert!(store.is_empty());

        stop_tx.send(true).expect("stop");
        handle.await.expect("poller task");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auth_failure_stops_polling() {
        let store = Arc::new(PositionStore::default());
        let source = Arc::new(ScriptedSource::new(vec![Err(FetchError::Auth(
            "invalid api key".to_string(),
        ))]));
        let state = Arc::new(MemoryStateStore::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);

        let poller = Poller::new(store, source.clone(), state, settings(20), tx);
        let handle = tokio::spawn(poller.run(stop_rx));

        let events = recv_until_stopped(&mut rx).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, PollerEvent::AuthFailure(_))));
        assert_eq!(source.calls(), 1);

        handle.await.expect("poller task");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overlapping_ticks_are_skipped() {
        let store = Arc::new(PositionStore::default());
        let source = Arc::new(
            ScriptedSource::new(Vec::new()).with_delay(Duration::from_millis(150)),
        );
        let state = Arc::new(MemoryStateStore::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let poller = Poller::new(store, source.clone(), state, settings(20), tx);
        let handle = tokio::spawn(poller.run(stop_rx));

        // ~15 ticks elapse, but each cycle holds the guard for ~150ms
        tokio::time::sleep(Duration::from_millis(300)).await;
        stop_tx.send(true).expect("stop");
        handle.await.expect("poller task");

        assert!(source.calls() <= 3, "got {} fetches", source.calls());
        assert!(source.calls() >= 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_flushes_state_unconditionally() {
        let store = Arc::new(PositionStore::default());
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![snapshot("BTCUSDT", 5.0)])]));
        let state = Arc::new(MemoryStateStore::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let poller = Poller::new(store, source, state.clone(), settings(20), tx);
        let handle = tokio::spawn(poller.run(stop_rx));

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open");
        assert!(matches!(first, PollerEvent::Updated(_)));

        stop_tx.send(true).expect("stop");
        handle.await.expect("poller task");

        // the first dirty cycle writes, and the shutdown flush rewrites
        let history = state.history.lock();
        assert!(history.contains_key("BTCUSDT"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_waits_for_the_in_flight_cycle_before_flushing() {
        let store = Arc::new(PositionStore::default());
        let source = Arc::new(
            ScriptedSource::new(vec![Ok(vec![snapshot("BTCUSDT", 5.0)])])
                .with_delay(Duration::from_millis(150)),
        );
        let state = Arc::new(SlowStateStore::new(Duration::from_millis(200)));
        let (tx, _rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let settings = PollerSettings {
            poll_interval: Duration::from_millis(20),
            save_interval: Duration::ZERO,
        };
        let poller = Poller::new(store, source, state.clone(), settings, tx);
        let handle = tokio::spawn(poller.run(stop_rx));

        // stop while the first cycle is still fetching; its slow save and
        // the final flush must not run at the same time
        tokio::time::sleep(Duration::from_millis(40)).await;
        stop_tx.send(true).expect("stop");
        handle.await.expect("poller task");

        assert_eq!(
            state.max_writers.load(Ordering::SeqCst),
            1,
            "history saves overlapped"
        );
        assert!(state.history.lock().contains_key("BTCUSDT"));
    }

    #[test]
    fn history_save_needs_both_dirty_and_an_elapsed_interval() {
        let store = Arc::new(PositionStore::default());
        let source = Arc::new(ScriptedSource::new(Vec::new()));
        let state = Arc::new(MemoryStateStore::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        let poller = Poller::new(store.clone(), source, state.clone(), settings(20), tx);

        store.ingest(&[snapshot("BTCUSDT", 5.0)], Utc::now());
        poller.shared.flush(false);
        assert_eq!(state.history_saves.load(Ordering::Relaxed), 1);

        // dirty again, but inside the 300s throttle window
        store.ingest(&[snapshot("BTCUSDT", 6.0)], Utc::now());
        assert!(store.history_dirty());
        poller.shared.flush(false);
        assert_eq!(state.history_saves.load(Ordering::Relaxed), 1);

        // force ignores the throttle
        poller.shared.flush(true);
        assert_eq!(state.history_saves.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn history_save_repeats_once_the_interval_elapses() {
        let store = Arc::new(PositionStore::default());
        let source = Arc::new(ScriptedSource::new(Vec::new()));
        let state = Arc::new(MemoryStateStore::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        let settings = PollerSettings {
            poll_interval: Duration::from_millis(20),
            save_interval: Duration::ZERO,
        };
        let poller = Poller::new(store.clone(), source, state.clone(), settings, tx);

        store.ingest(&[snapshot("BTCUSDT", 5.0)], Utc::now());
        poller.shared.flush(false);
        assert_eq!(state.history_saves.load(Ordering::Relaxed), 1);

        // interval elapsed but nothing dirty: no write
        poller.shared.flush(false);
        assert_eq!(state.history_saves.load(Ordering::Relaxed), 1);

        store.ingest(&[snapshot("BTCUSDT", 6.0)], Utc::now());
        poller.shared.flush(false);
        assert_eq!(state.history_saves.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn seed_store_tolerates_failing_state_store() {
        struct FailingStateStore;
        impl StateStore for FailingStateStore {
            fn load_history(&self) -> Result<BTreeMap<String, Vec<PnlSample>>, String> {
                Err("disk on fire".to_string())
            }
            fn save_history(
                &self,
                _history: &BTreeMap<String, Vec<PnlSample>>,
            ) -> Result<(), String> {
                Err("disk on fire".to_string())
            }
            fn load_hold(&self) -> Result<Vec<String>, String> {
                Err("disk on fire".to_string())
            }
            fn save_hold(&self, _symbols: &[String]) -> Result<(), String> {
                Err("disk on fire".to_string())
            }
        }

        let store = PositionStore::default();
        seed_store(&store, &FailingStateStore);
        assert!(store.is_empty());
    }

    #[test]
    fn seed_store_restores_history_and_hold() {
        let state = MemoryStateStore::default();
        state.history.lock().insert(
            "BTCUSDT".to_string(),
            vec![PnlSample {
                pnl: 4.0,
                timestamp_utc: Utc::now() - ChronoDuration::minutes(5),
            }],
        );
        state.hold.lock().push("ETHUSDT".to_string());

        let store = PositionStore::default();
        seed_store(&store, &state);

        assert!(store.get("BTCUSDT").expect("tracker").has_history());
        assert!(store.get("ETHUSDT").expect("tracker").is_hold());
    }
}
