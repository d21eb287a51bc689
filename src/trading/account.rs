//! Shared capital pool backing every symbol's margin.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

/// The single pot of capital all symbols draw margin from.
///
/// Invariant: `used_margin <= equity` whenever reservations only go through
/// [`CapitalPool::reserve`]. Equity moves only when realized PnL settles.
#[derive(Debug, Clone)]
pub struct CapitalPool {
    equity: f64,
    used_margin: f64,
}

impl CapitalPool {
    pub fn new(start_capital: f64) -> Self {
        Self {
            equity: start_capital,
            used_margin: 0.0,
        }
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn used_margin(&self) -> f64 {
        self.used_margin
    }

    pub fn free_margin(&self) -> f64 {
        self.equity - self.used_margin
    }

    /// Try to lock `amount` of margin. Returns false without mutating when
    /// free margin is insufficient; callers skip the entry in that case.
    pub fn reserve(&mut self, amount: f64) -> bool {
        if amount > self.free_margin() {
            debug!(
                requested = amount,
                free = self.free_margin(),
                "margin reservation denied"
            );
            return false;
        }
        self.used_margin += amount;
        true
    }

    /// Release a position's margin and settle its net realized PnL.
    pub fn release(&mut self, margin: f64, net_pnl: f64) {
        self.used_margin -= margin;
        self.equity += net_pnl;
    }
}

/// Handle shared between concurrently evaluated symbols.
pub type SharedCapitalPool = Arc<Mutex<CapitalPool>>;

pub fn shared_pool(start_capital: f64) -> SharedCapitalPool {
    Arc::new(Mutex::new(CapitalPool::new(start_capital)))
}
