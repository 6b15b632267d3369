use crate::services::retention::RetentionPolicy;
use crate::value_objects::pnl_sample::PnlSample;
use crate::value_objects::snapshot::PositionSnapshot;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-instrument accumulator: the latest snapshot plus a time-ordered
/// unrealized-PnL sample history. The history has its own lock so that
/// pruning or appending on one instrument never blocks another.
pub struct PositionTracker {
    symbol: String,
    current: RwLock<Option<PositionSnapshot>>,
    is_hold: AtomicBool,
    history: Mutex<Vec<PnlSample>>,
}

impl PositionTracker {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            current: RwLock::new(None),
            is_hold: AtomicBool::new(false),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Latest-wins: each ingest replaces the snapshot wholesale.
    pub fn replace_snapshot(&self, snapshot: PositionSnapshot) {
        *self.current.write() = Some(snapshot);
    }

    pub fn current_snapshot(&self) -> Option<PositionSnapshot> {
        self.current.read().clone()
    }

    pub fn is_hold(&self) -> bool {
        self.is_hold.load(Ordering::Relaxed)
    }

    pub fn set_hold(&self, is_hold: bool) {
        self.is_hold.store(is_hold, Ordering::Relaxed);
    }

    pub fn append_sample(&self, pnl: f64, now: DateTime<Utc>) {
        self.history.lock().push(PnlSample {
            pnl,
            timestamp_utc: now,
        });
    }

    /// Drops samples older than the retention ceiling.
    pub fn prune(&self, policy: RetentionPolicy, now: DateTime<Utc>) {
        let cutoff = policy.cutoff(now);
        self.history
            .lock()
            .retain(|sample| sample.timestamp_utc >= cutoff);
    }

    /// Loads persisted samples, keeping the list time-ordered.
    pub fn seed_history(&self, samples: Vec<PnlSample>) {
        let mut history = self.history.lock();
        history.extend(samples);
        history.sort_by_key(|sample| sample.timestamp_utc);
    }

    pub fn history_snapshot(&self) -> Vec<PnlSample> {
        self.history.lock().clone()
    }

    pub fn has_history(&self) -> bool {
        !self.history.lock().is_empty()
    }

    /// Change in unrealized PnL over the lookback `window`.
    ///
    /// Sampling is coarse (one sample per ingest tick), so the window
    /// boundary is approximate: the delta baseline is the oldest sample
    /// still inside the window, or, when every sample predates it, the
    /// earliest sample available. Returns `None` with fewer than two
    /// samples or without a current unrealized PnL.
    pub fn pnl_change(&self, window: Duration, now: DateTime<Utc>) -> Option<f64> {
        let history = self.history.lock();
        let current_pnl = self.current.read().as_ref().and_then(|s| s.unrealized_pnl)?;
        if history.len() < 2 {
            return None;
        }

        let cutoff = now - window;
        if let Some(baseline) = history.iter().find(|s| s.timestamp_utc >= cutoff) {
            return Some(current_pnl - baseline.pnl);
        }

        let earliest = history.first()?;
        if earliest.timestamp_utc < cutoff {
            return Some(current_pnl - earliest.pnl);
        }
        None
    }
}
