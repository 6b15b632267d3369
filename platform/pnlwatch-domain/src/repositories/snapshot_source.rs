use crate::value_objects::balance::BalanceSnapshot;
use crate::value_objects::snapshot::PositionSnapshot;
use std::fmt;

/// Failure classes for a snapshot fetch. Transient failures skip the cycle
/// and keep the last-known state; auth failures stop polling because no
/// local retry can fix a rejected credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    Transient(String),
    Auth(String),
}

impl FetchError {
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Auth(_))
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transient(msg) => write!(f, "transient fetch error: {msg}"),
            FetchError::Auth(msg) => write!(f, "auth error: {msg}"),
        }
    }
}

pub trait SnapshotSource: Send + Sync {
    fn fetch_balance(&self) -> Result<BalanceSnapshot, FetchError>;
    fn fetch_positions(&self) -> Result<Vec<PositionSnapshot>, FetchError>;
}
