use crate::entities::tracker::PositionTracker;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Symbol,
    Cost,
    UnrealizedPnl,
    Change1h,
    Change24h,
    RealizedPnl,
}

/// Active column plus direction, with the click-to-toggle semantics of the
/// position table header: re-selecting the current column flips direction,
/// selecting another column resets to ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortState {
    column: SortColumn,
    ascending: bool,
}

impl SortState {
    pub fn new() -> Self {
        Self {
            column: SortColumn::UnrealizedPnl,
            ascending: false,
        }
    }

    pub fn column(&self) -> SortColumn {
        self.column
    }

    pub fn ascending(&self) -> bool {
        self.ascending
    }

    pub fn select(&mut self, column: SortColumn) {
        if column == self.column {
            self.ascending = !self.ascending;
        } else {
            self.column = column;
            self.ascending = true;
        }
    }
}

impl Default for SortState {
    fn default() -> Self {
        Self::new()
    }
}

fn numeric_key(tracker: &PositionTracker, column: SortColumn, now: DateTime<Utc>) -> f64 {
    let snapshot = tracker.current_snapshot();
    match column {
        SortColumn::Symbol => 0.0,
        SortColumn::Cost => snapshot.as_ref().and_then(|s| s.cost()).unwrap_or(0.0),
        SortColumn::UnrealizedPnl => snapshot
            .as_ref()
            .and_then(|s| s.unrealized_pnl)
            .unwrap_or(0.0),
        SortColumn::Change1h => tracker.pnl_change(Duration::hours(1), now).unwrap_or(0.0),
        SortColumn::Change24h => tracker.pnl_change(Duration::hours(24), now).unwrap_or(0.0),
        SortColumn::RealizedPnl => snapshot
            .as_ref()
            .and_then(|s| s.realized_pnl)
            .unwrap_or(0.0),
    }
}

/// Stable sort of trackers by the chosen column. Missing numeric values
/// compare as zero; symbols compare ordinally. Equal keys keep their input
/// order in both directions.
pub fn sort_trackers(
    trackers: Vec<Arc<PositionTracker>>,
    column: SortColumn,
    ascending: bool,
    now: DateTime<Utc>,
) -> Vec<Arc<PositionTracker>> {
    if let SortColumn::Symbol = column {
        let mut sorted = trackers;
        sorted.sort_by(|a, b| {
            let ordering = a.symbol().cmp(b.symbol());
            if ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
        return sorted;
    }

    // keys evaluated once per tracker; windowed deltas take the history
    // lock, so recomputing them inside the comparator would be wasteful
    let mut keyed: Vec<(f64, Arc<PositionTracker>)> = trackers
        .into_iter()
        .map(|tracker| (numeric_key(&tracker, column, now), tracker))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| {
        let ordering = a.total_cmp(b);
        if ascending {
            ordering
        } else {
            ordering.reverse()
        }
    });
    keyed.into_iter().map(|(_, tracker)| tracker).collect()
}
