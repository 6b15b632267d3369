use crate::entities::tracker::PositionTracker;
use crate::services::retention::RetentionPolicy;
use crate::value_objects::pnl_sample::PnlSample;
use crate::value_objects::snapshot::PositionSnapshot;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub samples_appended: usize,
    pub trackers_closed: usize,
    pub entries_skipped: usize,
}

/// Concurrent symbol -> tracker map. The index lock is held only for map
/// lookups and mutations; each tracker's state is locked independently, so
/// readers enumerate a stable snapshot of entries while an ingest runs.
pub struct PositionStore {
    trackers: RwLock<HashMap<String, Arc<PositionTracker>>>,
    retention: RetentionPolicy,
    history_dirty: AtomicBool,
    hold_dirty: AtomicBool,
}

impl PositionStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            trackers: RwLock::new(HashMap::new()),
            retention,
            history_dirty: AtomicBool::new(false),
            hold_dirty: AtomicBool::new(false),
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    fn get_or_create(&self, symbol: &str) -> Arc<PositionTracker> {
        if let Some(tracker) = self.trackers.read().get(symbol) {
            return tracker.clone();
        }
        self.trackers
            .write()
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(PositionTracker::new(symbol)))
            .clone()
    }

    /// Applies one snapshot batch: upserts every named symbol, closes every
    /// tracker absent from the batch (history included), then prunes the
    /// survivors. Entries with an empty symbol are skipped individually.
    pub fn ingest(&self, batch: &[PositionSnapshot], now: DateTime<Utc>) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();
        let mut active_symbols: HashSet<&str> = HashSet::new();

        for snapshot in batch {
            if snapshot.symbol.trim().is_empty() {
                outcome.entries_skipped += 1;
                continue;
            }
            active_symbols.insert(snapshot.symbol.as_str());

            let tracker = self.get_or_create(&snapshot.symbol);
            tracker.replace_snapshot(snapshot.clone());
            if let Some(pnl) = snapshot.unrealized_pnl {
                tracker.append_sample(pnl, now);
                outcome.samples_appended += 1;
                self.history_dirty.store(true, Ordering::Relaxed);
            }
        }

        {
            let mut trackers = self.trackers.write();
            let before = trackers.len();
            trackers.retain(|symbol, _| active_symbols.contains(symbol.as_str()));
            outcome.trackers_closed = before - trackers.len();
        }
        if outcome.trackers_closed > 0 {
            self.history_dirty.store(true, Ordering::Relaxed);
        }

        for tracker in self.tracker_snapshot() {
            tracker.prune(self.retention, now);
        }

        outcome
    }

    fn tracker_snapshot(&self) -> Vec<Arc<PositionTracker>> {
        self.trackers.read().values().cloned().collect()
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<PositionTracker>> {
        self.trackers.read().get(symbol).cloned()
    }

    pub fn len(&self) -> usize {
        self.trackers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.read().is_empty()
    }

    /// Trackers worth displaying, ordered by symbol so consecutive reads
    /// with no ingest in between see identical content. A tracker seeded
    /// from persisted history has no snapshot yet and still counts as
    /// active until the first ingest resolves it.
    pub fn active_trackers(&self) -> Vec<Arc<PositionTracker>> {
        let mut active: Vec<Arc<PositionTracker>> = self
            .tracker_snapshot()
            .into_iter()
            .filter(|t| t.current_snapshot().map(|s| s.quantity != 0.0).unwrap_or(true))
            .collect();
        active.sort_by(|a, b| a.symbol().cmp(b.symbol()));
        active
    }

    pub fn short_term_trackers(&self) -> Vec<Arc<PositionTracker>> {
        self.active_trackers()
            .into_iter()
            .filter(|t| !t.is_hold())
            .collect()
    }

    pub fn long_term_trackers(&self) -> Vec<Arc<PositionTracker>> {
        self.active_trackers()
            .into_iter()
            .filter(|t| t.is_hold())
            .collect()
    }

    /// Flips the hold flag on an existing tracker; unknown symbols are a
    /// no-op.
    pub fn set_hold(&self, symbol: &str, is_hold: bool) {
        if let Some(tracker) = self.get(symbol) {
            tracker.set_hold(is_hold);
            self.hold_dirty.store(true, Ordering::Relaxed);
        }
    }

    /// Seeds persisted history into (possibly new) trackers. Seeded
    /// trackers carry no current snapshot until the first ingest. Stale
    /// samples are pruned immediately in case the file sat unmaintained.
    pub fn seed_history(
        &self,
        history: BTreeMap<String, Vec<PnlSample>>,
        now: DateTime<Utc>,
    ) {
        for (symbol, samples) in history {
            if symbol.trim().is_empty() {
                continue;
            }
            let tracker = self.get_or_create(&symbol);
            tracker.seed_history(samples);
            tracker.prune(self.retention, now);
        }
    }

    /// Marks the persisted hold set, creating trackers where needed.
    pub fn seed_hold(&self, symbols: &[String]) {
        for symbol in symbols {
            if symbol.trim().is_empty() {
                continue;
            }
            self.get_or_create(symbol).set_hold(true);
        }
    }

    /// Symbol -> samples for every tracker with non-empty history, in the
    /// shape the history document persists.
    pub fn export_history(&self) -> BTreeMap<String, Vec<PnlSample>> {
        let mut out = BTreeMap::new();
        for tracker in self.tracker_snapshot() {
            let history = tracker.history_snapshot();
            if !history.is_empty() {
                out.insert(tracker.symbol().to_string(), history);
            }
        }
        out
    }

    pub fn hold_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .tracker_snapshot()
            .into_iter()
            .filter(|t| t.is_hold())
            .map(|t| t.symbol().to_string())
            .collect();
        symbols.sort();
        symbols
    }

    pub fn history_dirty(&self) -> bool {
        self.history_dirty.load(Ordering::Relaxed)
    }

    pub fn clear_history_dirty(&self) {
        self.history_dirty.store(false, Ordering::Relaxed);
    }

    pub fn hold_dirty(&self) -> bool {
        self.hold_dirty.load(Ordering::Relaxed)
    }

    pub fn clear_hold_dirty(&self) {
        self.hold_dirty.store(false, Ordering::Relaxed);
    }
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}
