#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BalanceSnapshot {
    pub total_margin_balance: Option<f64>,
    pub available_balance: Option<f64>,
    pub has_settlement_asset: bool,
}
