//! Position lifecycle: bar planning, entries, and settlement.
//!
//! `plan_bar` is a pure decision function; `open_position` and `settle_close`
//! apply the decisions against the shared capital pool. Keeping planning and
//! settlement separate lets the backtester and the live trader share the
//! exact same semantics.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{CloseReason, ClosedTrade, Position, PositionSide};
use crate::signal::Cross;

use super::account::CapitalPool;
use super::config::{SymbolConfig, TradeMode, TradingConfig};

/// What to do with one symbol on one bar. A close and an open can both be
/// set: a signal flip frees the slot for a same-bar reverse entry. A
/// stop-out never re-enters on the same bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarPlan {
    pub close: Option<CloseReason>,
    pub open: Option<PositionSide>,
}

impl BarPlan {
    pub fn idle() -> Self {
        Self {
            close: None,
            open: None,
        }
    }
}

/// Decide the action for one bar. Stop-loss takes priority over the cross
/// and suppresses re-entry until the next bar; an exact line touch never
/// counts as a cross.
pub fn plan_bar(
    mode: TradeMode,
    position: Option<&Position>,
    cross: Cross,
    price: f64,
) -> BarPlan {
    let mut close = None;
    let mut occupied = position.is_some();
    let mut stopped_out = false;

    if let Some(pos) = position {
        if pos.stop_hit(price) {
            close = Some(CloseReason::StopLoss);
            occupied = false;
            stopped_out = true;
        } else {
            let flip = matches!(
                (pos.side, cross),
                (PositionSide::Long, Cross::Bear) | (PositionSide::Short, Cross::Bull)
            );
            if flip {
                close = Some(CloseReason::SignalFlip);
                occupied = false;
            }
        }
    }

    let open = if occupied || stopped_out {
        None
    } else {
        match cross {
            Cross::Bull if mode.allows_long() => Some(PositionSide::Long),
            Cross::Bear if mode.allows_short() => Some(PositionSide::Short),
            _ => None,
        }
    };

    BarPlan { close, open }
}

// Slippage conventions. Entries always slip against the trader. Stop and
// forced end-of-window exits slip against the position; signal-flip exits
// slip in its favor.

/// Fill price for a new entry at `price`.
pub fn entry_fill_price(side: PositionSide, price: f64, slippage: f64) -> f64 {
    match side {
        PositionSide::Long => price * (1.0 + slippage),
        PositionSide::Short => price * (1.0 - slippage),
    }
}

/// Fill price when a stop-loss closes the position at `price`.
pub fn stop_fill_price(side: PositionSide, price: f64, slippage: f64) -> f64 {
    match side {
        PositionSide::Long => price * (1.0 - slippage),
        PositionSide::Short => price * (1.0 + slippage),
    }
}

/// Fill price when an opposite cross closes the position at `price`.
pub fn flip_fill_price(side: PositionSide, price: f64, slippage: f64) -> f64 {
    match side {
        PositionSide::Long => price * (1.0 + slippage),
        PositionSide::Short => price * (1.0 - slippage),
    }
}

/// Exit fill for `reason` at raw price `price`.
pub fn exit_fill_price(side: PositionSide, reason: CloseReason, price: f64, slippage: f64) -> f64 {
    match reason {
        CloseReason::StopLoss | CloseReason::ForceCloseEnd => {
            stop_fill_price(side, price, slippage)
        }
        _ => flip_fill_price(side, price, slippage),
    }
}

/// Try to open a position, reserving its margin from the pool.
///
/// Returns `None` when free margin cannot cover the requirement; the signal
/// is simply skipped, never queued.
pub fn open_position(
    pool: &mut CapitalPool,
    symbol_cfg: &SymbolConfig,
    config: &TradingConfig,
    side: PositionSide,
    fill_price: f64,
    entry_time: DateTime<Utc>,
    entry_index: usize,
) -> Option<Position> {
    let required_margin = symbol_cfg.margin_target(config.leverage);
    if !pool.reserve(required_margin) {
        debug!(
            symbol = %symbol_cfg.symbol,
            required = required_margin,
            free = pool.free_margin(),
            "skipping entry, insufficient free margin"
        );
        return None;
    }

    let position = Position {
        symbol: symbol_cfg.symbol.clone(),
        side,
        entry_price: fill_price,
        qty: symbol_cfg.notional / fill_price,
        notional: symbol_cfg.notional,
        margin: required_margin,
        stop_loss_pct: config.stop_loss_pct,
        entry_time,
        entry_index,
    };

    info!(
        symbol = %position.symbol,
        side = %position.side,
        entry = position.entry_price,
        margin = position.margin,
        "opened position"
    );

    Some(position)
}

/// Settle a close against the pool and produce the ledger record.
///
/// `fee_rate` is the round-trip fee fraction applied to the notional.
pub fn settle_close(
    pool: &mut CapitalPool,
    position: &Position,
    exit_price: f64,
    reason: CloseReason,
    fee_rate: f64,
    exit_time: DateTime<Utc>,
    exit_index: usize,
) -> ClosedTrade {
    let price_move = position.price_move(exit_price);
    let leverage = position.notional / position.margin;
    let pnl_on_margin = price_move * leverage;
    let gross = position.margin * pnl_on_margin;
    let fees = position.notional * fee_rate;
    let net = gross - fees;

    pool.release(position.margin, net);

    let trade = ClosedTrade {
        id: Uuid::new_v4().to_string(),
        symbol: position.symbol.clone(),
        side: position.side,
        entry_price: position.entry_price,
        exit_price,
        pnl_pct: net / position.margin * 100.0,
        pnl_usd: net,
        reason,
        bars_held: exit_index.saturating_sub(position.entry_index),
        entry_time: position.entry_time,
        exit_time,
        margin: position.margin,
        fees,
    };

    info!(
        symbol = %trade.symbol,
        side = %trade.side,
        reason = %trade.reason,
        pnl_usd = trade.pnl_usd,
        pnl_pct = trade.pnl_pct,
        equity = pool.equity(),
        "closed position"
    );

    trade
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::config::TradingConfig;

    fn cfg() -> TradingConfig {
        TradingConfig::default()
    }

    fn symbol_cfg(config: &TradingConfig) -> &SymbolConfig {
        config.symbol("IP/USDT:USDT").unwrap()
    }

    fn long_position(entry: f64) -> Position {
        Position {
            symbol: "IP/USDT:USDT".to_string(),
            side: PositionSide::Long,
            entry_price: entry,
            qty: 1250.0 / entry,
            notional: 1250.0,
            margin: 250.0,
            stop_loss_pct: 0.22,
            entry_time: Utc::now(),
            entry_index: 10,
        }
    }

    #[test]
    fn test_plan_idle_without_cross_or_position() {
        let plan = plan_bar(TradeMode::LongShort, None, Cross::None, 100.0);
        assert_eq!(plan, BarPlan::idle());
    }

    #[test]
    fn test_plan_opens_long_on_bull() {
        let plan = plan_bar(TradeMode::LongOnly, None, Cross::Bull, 100.0);
        assert_eq!(plan.close, None);
        assert_eq!(plan.open, Some(PositionSide::Long));
    }

    #[test]
    fn test_long_only_ignores_bear_entry() {
        let plan = plan_bar(TradeMode::LongOnly, None, Cross::Bear, 100.0);
        assert_eq!(plan, BarPlan::idle());
    }

    #[test]
    fn test_stop_takes_priority_and_blocks_reentry() {
        let pos = long_position(100.0);
        // price breached the stop and a bull cross fired on the same bar
        let plan = plan_bar(TradeMode::LongOnly, Some(&pos), Cross::Bull, 70.0);
        assert_eq!(plan.close, Some(CloseReason::StopLoss));
        assert_eq!(plan.open, None);
    }

    #[test]
    fn test_flip_closes_long_on_bear() {
        let pos = long_position(100.0);
        let plan = plan_bar(TradeMode::LongShort, Some(&pos), Cross::Bear, 95.0);
        assert_eq!(plan.close, Some(CloseReason::SignalFlip));
        assert_eq!(plan.open, Some(PositionSide::Short));
    }

    #[test]
    fn test_flip_close_without_reentry_when_long_only() {
        let pos = long_position(100.0);
        let plan = plan_bar(TradeMode::LongOnly, Some(&pos), Cross::Bear, 95.0);
        assert_eq!(plan.close, Some(CloseReason::SignalFlip));
        assert_eq!(plan.open, None);
    }

    #[test]
    fn test_same_side_cross_is_ignored_while_open() {
        let pos = long_position(100.0);
        let plan = plan_bar(TradeMode::LongShort, Some(&pos), Cross::Bull, 105.0);
        assert_eq!(plan, BarPlan::idle());
    }

    #[test]
    fn test_slippage_direction() {
        let s = 0.0002;
        assert!(entry_fill_price(PositionSide::Long, 100.0, s) > 100.0);
        assert!(entry_fill_price(PositionSide::Short, 100.0, s) < 100.0);
        assert!(stop_fill_price(PositionSide::Long, 100.0, s) < 100.0);
        assert!(stop_fill_price(PositionSide::Short, 100.0, s) > 100.0);
        assert!(flip_fill_price(PositionSide::Long, 100.0, s) > 100.0);
        assert!(flip_fill_price(PositionSide::Short, 100.0, s) < 100.0);
        // the forced end-of-window close prices like a stop
        assert!(
            exit_fill_price(PositionSide::Long, CloseReason::ForceCloseEnd, 100.0, s) < 100.0
        );
    }

    #[test]
    fn test_open_reserves_margin() {
        let config = cfg();
        let mut pool = CapitalPool::new(config.start_capital);
        let pos = open_position(
            &mut pool,
            symbol_cfg(&config),
            &config,
            PositionSide::Long,
            2.0,
            Utc::now(),
            0,
        )
        .unwrap();
        assert_eq!(pos.margin, 250.0);
        assert_eq!(pos.qty, 625.0);
        assert_eq!(pool.used_margin(), 250.0);
    }

    #[test]
    fn test_open_denied_when_pool_exhausted() {
        let config = cfg();
        let mut pool = CapitalPool::new(config.start_capital);
        assert!(pool.reserve(900.0));
        let pos = open_position(
            &mut pool,
            symbol_cfg(&config),
            &config,
            PositionSide::Long,
            2.0,
            Utc::now(),
            0,
        );
        assert!(pos.is_none());
        assert_eq!(pool.used_margin(), 900.0);
    }

    #[test]
    fn test_settle_close_math_long() {
        let config = cfg();
        let mut pool = CapitalPool::new(1000.0);
        assert!(pool.reserve(250.0));
        let pos = long_position(100.0);

        // +10% price move at 5x leverage on 250 margin
        let trade = settle_close(
            &mut pool,
            &pos,
            110.0,
            CloseReason::SignalFlip,
            config.round_trip_fee_rate(),
            Utc::now(),
            15,
        );

        let gross = 250.0 * 0.10 * 5.0;
        let fees = 1250.0 * 0.0008;
        assert!((trade.pnl_usd - (gross - fees)).abs() < 1e-9);
        assert!((trade.pnl_pct - trade.pnl_usd / 250.0 * 100.0).abs() < 1e-9);
        assert!((trade.fees - fees).abs() < 1e-12);
        assert_eq!(trade.bars_held, 5);
        assert_eq!(pool.used_margin(), 0.0);
        assert!((pool.equity() - (1000.0 + gross - fees)).abs() < 1e-9);
    }

    #[test]
    fn test_settle_close_math_short_loss() {
        let mut pool = CapitalPool::new(1000.0);
        assert!(pool.reserve(150.0));
        let pos = Position {
            symbol: "PEOPLE/USDT:USDT".to_string(),
            side: PositionSide::Short,
            entry_price: 0.02,
            qty: 750.0 / 0.02,
            notional: 750.0,
            margin: 150.0,
            stop_loss_pct: 0.22,
            entry_time: Utc::now(),
            entry_index: 0,
        };

        // price rose 4% against the short
        let trade = settle_close(
            &mut pool,
            &pos,
            0.0208,
            CloseReason::SignalFlip,
            0.0008,
            Utc::now(),
            3,
        );

        let gross = 150.0 * -0.04 * 5.0;
        let fees = 750.0 * 0.0008;
        assert!((trade.pnl_usd - (gross - fees)).abs() < 1e-9);
        assert!(!trade.is_win());
        assert!((pool.equity() - (1000.0 + gross - fees)).abs() < 1e-9);
    }
}
