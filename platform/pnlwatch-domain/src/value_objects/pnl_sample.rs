use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unrealized-PnL reading. Serde field names are the persisted wire
/// format of the history document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PnlSample {
    pub pnl: f64,
    #[serde(rename = "timestampUtc")]
    pub timestamp_utc: DateTime<Utc>,
}
