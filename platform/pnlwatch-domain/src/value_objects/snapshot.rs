/// One point-in-time reading of a single open position, produced by the
/// exchange adapter. Quantity is signed (short positions are negative).
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub quantity: f64,
    pub average_price: Option<f64>,
    pub unrealized_pnl: Option<f64>,
    pub realized_pnl: Option<f64>,
}

impl PositionSnapshot {
    /// Notional cost of the position (`quantity * average_price`).
    pub fn cost(&self) -> Option<f64> {
        self.average_price.map(|price| self.quantity * price)
    }
}
