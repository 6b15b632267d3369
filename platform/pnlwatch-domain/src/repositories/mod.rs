pub mod snapshot_source;
pub mod state_store;
