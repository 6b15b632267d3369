use chrono::Duration;
use pnlwatch_application::poller::UpdateSummary;
use pnlwatch_domain::entities::tracker::PositionTracker;
use pnlwatch_domain::services::sorting::{sort_trackers, SortState};
use pnlwatch_domain::services::store::PositionStore;
use std::sync::Arc;

pub fn render(store: &PositionStore, summary: &UpdateSummary, sort: &SortState) {
    println!(
        "\n[{}] margin: {}  available: {}  open positions: {}",
        summary.at.format("%Y-%m-%d %H:%M:%S UTC"),
        fmt_opt(summary.balance.total_margin_balance),
        fmt_opt(summary.balance.available_balance),
        summary.open_positions,
    );

    render_group("short-term", store.short_term_trackers(), summary, sort);
    render_group("hold", store.long_term_trackers(), summary, sort);
}

fn render_group(
    label: &str,
    trackers: Vec<Arc<PositionTracker>>,
    summary: &UpdateSummary,
    sort: &SortState,
) {
    if trackers.is_empty() {
        return;
    }
    let sorted = sort_trackers(trackers, sort.column(), sort.ascending(), summary.at);

    println!("{label}:");
    println!(
        "  {:<12} {:>10} {:>12} {:>12} {:>10} {:>10} {:>10}",
        "symbol", "qty", "cost", "uPnL", "1h", "24h", "realized"
    );
    for tracker in sorted {
        let snapshot = tracker.current_snapshot();
        let (qty, cost, upnl, rpnl) = match &snapshot {
            Some(s) => (
                format!("{:.4}", s.quantity),
                fmt_opt(s.cost()),
                fmt_opt(s.unrealized_pnl),
                fmt_opt(s.realized_pnl),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string(), "-".to_string()),
        };
        println!(
            "  {:<12} {:>10} {:>12} {:>12} {:>10} {:>10} {:>10}",
            tracker.symbol(),
            qty,
            cost,
            upnl,
            fmt_opt(tracker.pnl_change(Duration::hours(1), summary.at)),
            fmt_opt(tracker.pnl_change(Duration::hours(24), summary.at)),
            rpnl,
        );
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}"),
        None => "-".to_string(),
    }
}
