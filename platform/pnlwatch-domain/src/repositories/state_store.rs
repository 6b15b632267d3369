use crate::value_objects::pnl_sample::PnlSample;
use std::collections::BTreeMap;

/// Port for the two persisted state documents: the per-symbol PnL history
/// and the hold set. Loading tolerates missing or corrupt documents by
/// returning empty state; only unrecoverable I/O surfaces as an error.
pub trait StateStore: Send + Sync {
    fn load_history(&self) -> Result<BTreeMap<String, Vec<PnlSample>>, String>;
    fn save_history(&self, history: &BTreeMap<String, Vec<PnlSample>>) -> Result<(), String>;
    fn load_hold(&self) -> Result<Vec<String>, String>;
    fn save_hold(&self, symbols: &[String]) -> Result<(), String>;
}
