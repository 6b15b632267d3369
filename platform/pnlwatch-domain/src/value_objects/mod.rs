pub mod balance;
pub mod pnl_sample;
pub mod snapshot;
