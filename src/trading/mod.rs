//! Capital pool, configuration, and position management.

mod account;
mod config;
mod manager;

pub use account::{shared_pool, CapitalPool, SharedCapitalPool};
pub use config::{SymbolConfig, TradeMode, TradingConfig};
pub use manager::{
    entry_fill_price, exit_fill_price, flip_fill_price, open_position, plan_bar, settle_close,
    stop_fill_price, BarPlan,
};
