//! Live trading orchestration: one evaluation pass per symbol per poll.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db::Store;
use crate::exchange::{
    account_health, order_qty, retry_with_timeout, ExchangeGateway, ExchangePosition,
    HealthStatus, RetryPolicy,
};
use crate::history::TradeLedger;
use crate::models::{CloseReason, ClosedTrade, Position, PositionSide};
use crate::notify::Notifier;
use crate::signal::{detect_cross, oscillator};
use crate::trading::{
    entry_fill_price, exit_fill_price, open_position, plan_bar, settle_close, CapitalPool,
    SharedCapitalPool, SymbolConfig, TradingConfig,
};

/// Minimum closed candles required before a symbol is evaluated at all.
const MIN_CANDLES: usize = 50;

/// What one evaluation pass did for a symbol.
#[derive(Debug, Clone)]
pub enum TradeOutcome {
    Opened {
        symbol: String,
        side: PositionSide,
        entry_price: f64,
    },
    Closed(ClosedTrade),
}

/// Live trader. Holds the local position book and the shared capital pool;
/// the exchange gateway is only consulted for data and order submission.
pub struct Trader<G: ExchangeGateway> {
    gateway: G,
    config: TradingConfig,
    pool: SharedCapitalPool,
    positions: Mutex<HashMap<String, Position>>,
    store: Store,
    notifier: Arc<Notifier>,
    retry: RetryPolicy,
}

impl<G: ExchangeGateway> Trader<G> {
    pub fn new(
        gateway: G,
        config: TradingConfig,
        pool: SharedCapitalPool,
        store: Store,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            gateway,
            config,
            pool,
            positions: Mutex::new(HashMap::new()),
            store,
            notifier,
            retry: RetryPolicy::default(),
        }
    }

    pub fn config(&self) -> &TradingConfig {
        &self.config
    }

    /// Adopt positions already open on the exchange so a restart does not
    /// double-open or orphan them.
    pub async fn reconcile(&self) -> Result<()> {
        let mut positions = self.positions.lock().await;
        let mut pool = self.pool.lock().await;

        for sym in &self.config.symbols {
            let existing = retry_with_timeout("position_for", &self.retry, || {
                self.gateway.position_for(&sym.symbol)
            })
            .await?;

            if let Some(remote) = existing {
                self.adopt_position(&mut positions, &mut pool, sym, &remote);
            }
        }

        Ok(())
    }

    /// Track an exchange-side position in the local book, reserving its
    /// margin from the pool.
    fn adopt_position(
        &self,
        positions: &mut HashMap<String, Position>,
        pool: &mut CapitalPool,
        sym: &SymbolConfig,
        remote: &ExchangePosition,
    ) {
        let margin = sym.margin_target(self.config.leverage);
        if !pool.reserve(margin) {
            warn!(symbol = %sym.symbol, "cannot reserve margin for existing exchange position");
            return;
        }

        info!(
            symbol = %sym.symbol,
            side = %remote.side,
            entry = remote.entry_price,
            "adopted exchange position"
        );
        positions.insert(
            sym.symbol.clone(),
            Position {
                symbol: sym.symbol.clone(),
                side: remote.side,
                entry_price: remote.entry_price,
                qty: remote.contracts,
                notional: sym.notional,
                margin,
                stop_loss_pct: self.config.stop_loss_pct,
                entry_time: Utc::now(),
                entry_index: 0,
            },
        );
    }

    /// Log the exchange-side account health, notifying on anything unusual.
    pub async fn check_account_health(&self) -> Result<()> {
        let info = retry_with_timeout("account_info", &self.retry, || self.gateway.account_info())
            .await?;
        let report = account_health(&info);

        match report.status {
            HealthStatus::Ok => {
                debug!(
                    equity = report.equity,
                    margin_ratio = report.margin_ratio,
                    "account health ok"
                );
            }
            HealthStatus::Warning => {
                warn!(
                    equity = report.equity,
                    margin_ratio = report.margin_ratio,
                    "margin usage elevated"
                );
                self.notifier.notify(format!(
                    "Margin usage elevated: {:.0}% of equity in use",
                    report.margin_ratio * 100.0
                ));
            }
            HealthStatus::Critical => {
                warn!(
                    equity = report.equity,
                    margin_ratio = report.margin_ratio,
                    "account health critical"
                );
                self.notifier.notify(format!(
                    "Account health CRITICAL: equity {:.2}, margin ratio {:.0}%",
                    report.equity,
                    report.margin_ratio * 100.0
                ));
            }
        }

        Ok(())
    }

    /// Evaluate one symbol against its latest closed candle.
    pub async fn run_symbol(&self, sym: &SymbolConfig) -> Result<Option<TradeOutcome>> {
        let candles = retry_with_timeout("fetch_candles", &self.retry, || {
            self.gateway
                .fetch_candles(&sym.symbol, &self.config.timeframe, self.config.history_limit)
        })
        .await?;

        // the final row is the still-forming candle
        let closed = &candles[..candles.len().saturating_sub(1)];
        let min_needed = MIN_CANDLES.max(sym.slow + sym.signal + 2);
        if closed.len() < min_needed {
            anyhow::bail!(
                "insufficient history for {}: {} closed candles, need {}",
                sym.symbol,
                closed.len(),
                min_needed
            );
        }

        let closes: Vec<f64> = closed.iter().map(|c| c.close).collect();
        let series = oscillator(&closes, sym.fast, sym.slow, sym.signal);
        let last = closes.len() - 1;
        let cross = detect_cross(
            series.main[last - 1],
            series.signal[last - 1],
            series.main[last],
            series.signal[last],
        );
        let price = closes[last];
        let bar_time = closed[last].time;

        debug!(
            symbol = %sym.symbol,
            price,
            cross = %cross,
            histogram = series.histogram[last],
            "evaluated bar"
        );

        let account = retry_with_timeout("account_info", &self.retry, || {
            self.gateway.account_info()
        })
        .await?;
        debug!(
            symbol = %sym.symbol,
            equity = account.equity,
            available = account.available,
            "account state"
        );
        let remote = retry_with_timeout("position_for", &self.retry, || {
            self.gateway.position_for(&sym.symbol)
        })
        .await?;

        let mut positions = self.positions.lock().await;
        let mut outcome = None;

        if let Some(remote) = &remote {
            if !positions.contains_key(&sym.symbol) {
                let mut pool = self.pool.lock().await;
                self.adopt_position(&mut positions, &mut pool, sym, remote);
            }
        } else if let Some(position) = positions.remove(&sym.symbol) {
            // closed out-of-band on the exchange; settle the book without an order
            warn!(symbol = %sym.symbol, "tracked position missing on the exchange, settling locally");
            let exit_price =
                exit_fill_price(position.side, CloseReason::Error, price, self.config.slippage);
            let mut pool = self.pool.lock().await;
            let trade = settle_close(
                &mut pool,
                &position,
                exit_price,
                CloseReason::Error,
                self.config.round_trip_fee_rate(),
                Utc::now(),
                0,
            );
            drop(pool);
            self.record_trade(&trade).await;
            outcome = Some(TradeOutcome::Closed(trade));
        }

        let plan = plan_bar(sym.mode, positions.get(&sym.symbol), cross, price);

        if let Some(reason) = plan.close {
            let position = positions
                .remove(&sym.symbol)
                .context("close planned without a tracked position")?;
            match self.execute_close(&position, reason, price).await {
                Ok(trade) => outcome = Some(TradeOutcome::Closed(trade)),
                Err(err) => {
                    // the position stays tracked and retries on the next tick
                    positions.insert(sym.symbol.clone(), position);
                    return Err(err);
                }
            }
        }

        if let Some(side) = plan.open {
            if let Some(position) = self.execute_open(sym, side, price, bar_time).await? {
                let opened = TradeOutcome::Opened {
                    symbol: position.symbol.clone(),
                    side: position.side,
                    entry_price: position.entry_price,
                };
                positions.insert(sym.symbol.clone(), position);
                if outcome.is_none() {
                    outcome = Some(opened);
                }
            }
        }

        if outcome.is_none() {
            self.notifier.notify(format!(
                "No action for {} at {:.6} ({})",
                sym.symbol, price, cross
            ));
        }

        Ok(outcome)
    }

    /// Submit the reduce-only close, then settle it locally. The pool is
    /// only touched once the gateway has confirmed the order; a submission
    /// failure leaves the position tracked for the next tick.
    async fn execute_close(
        &self,
        position: &Position,
        reason: CloseReason,
        price: f64,
    ) -> Result<ClosedTrade> {
        let fee_rate = match retry_with_timeout("fee_rates", &self.retry, || {
            self.gateway.fee_rates(&position.symbol)
        })
        .await
        {
            // market in, market out
            Ok(rates) => rates.taker * 2.0,
            Err(err) => {
                warn!(symbol = %position.symbol, error = %err, "fee lookup failed, using static rates");
                self.config.round_trip_fee_rate()
            }
        };

        let close_side = match position.side {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        };
        retry_with_timeout("close_order", &self.retry, || {
            self.gateway
                .place_market_order(&position.symbol, close_side, position.qty, true)
        })
        .await
        .with_context(|| format!("close order for {} failed", position.symbol))?;

        let exit_price = exit_fill_price(position.side, reason, price, self.config.slippage);
        let mut pool = self.pool.lock().await;
        let trade = settle_close(&mut pool, position, exit_price, reason, fee_rate, Utc::now(), 0);
        drop(pool);

        self.record_trade(&trade).await;
        Ok(trade)
    }

    async fn execute_open(
        &self,
        sym: &SymbolConfig,
        side: PositionSide,
        price: f64,
        bar_time: chrono::DateTime<Utc>,
    ) -> Result<Option<Position>> {
        if let Err(err) = retry_with_timeout("set_leverage", &self.retry, || {
            self.gateway.set_leverage(&sym.symbol, self.config.leverage)
        })
        .await
        {
            warn!(symbol = %sym.symbol, error = %err, "failed to set leverage, skipping entry");
            return Ok(None);
        }

        let fill_price = entry_fill_price(side, price, self.config.slippage);
        let qty = order_qty(sym.notional, fill_price)?;

        let mut pool = self.pool.lock().await;
        let Some(position) = open_position(
            &mut pool,
            sym,
            &self.config,
            side,
            fill_price,
            bar_time,
            0,
        ) else {
            return Ok(None);
        };

        let submitted = retry_with_timeout("open_order", &self.retry, || {
            self.gateway
                .place_market_order(&sym.symbol, side, qty, false)
        })
        .await;

        if let Err(err) = submitted {
            // roll the reservation back, nothing was filled
            pool.release(position.margin, 0.0);
            warn!(symbol = %sym.symbol, error = %err, "open order failed");
            return Ok(None);
        }
        drop(pool);

        self.notifier.notify(format!(
            "Opened {} {} @ {:.6}",
            position.side, position.symbol, position.entry_price
        ));

        Ok(Some(position))
    }

    async fn record_trade(&self, trade: &ClosedTrade) {
        if let Err(err) = self.store.save_trade(trade).await {
            warn!(error = %err, "failed to persist trade");
        }
        match self.store.recompute_metrics(self.config.start_capital).await {
            Ok(snapshot) => {
                debug!(
                    total_trades = snapshot.total_trades,
                    total_pnl = snapshot.total_pnl,
                    "metrics refreshed"
                );
            }
            Err(err) => warn!(error = %err, "failed to refresh metrics"),
        }

        match self.store.load_trades().await {
            Ok(trades) => {
                let mut ledger = TradeLedger::new();
                for t in trades {
                    ledger.append(t);
                }
                if let Some(point) = ledger.equity_curve(self.config.start_capital).last() {
                    if let Err(err) = self.store.record_equity_point(point).await {
                        warn!(error = %err, "failed to persist equity point");
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to extend equity curve"),
        }

        self.notifier.notify(format!(
            "Closed {} {} @ {:.6} ({}) PnL {:.2} USDT ({:.2}%)",
            trade.side, trade.symbol, trade.exit_price, trade.reason, trade.pnl_usd, trade.pnl_pct
        ));
    }
}

/// Poll loop driving the trader until ctrl-c.
pub struct Bot<G: ExchangeGateway> {
    trader: Trader<G>,
    poll_interval: Duration,
}

impl<G: ExchangeGateway> Bot<G> {
    pub fn new(trader: Trader<G>, poll_interval: Duration) -> Self {
        Self {
            trader,
            poll_interval,
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            symbols = self.trader.config.symbols.len(),
            "bot started"
        );

        self.trader.reconcile().await?;

        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll_once().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn poll_once(&self) {
        if let Err(err) = self.trader.check_account_health().await {
            warn!(error = %err, "account health check failed");
        }

        let symbols = self.trader.config.symbols.clone();
        for sym in &symbols {
            match self.trader.run_symbol(sym).await {
                Ok(Some(TradeOutcome::Opened { symbol, side, entry_price })) => {
                    info!(%symbol, %side, entry_price, "entry executed");
                }
                Ok(Some(TradeOutcome::Closed(trade))) => {
                    info!(
                        symbol = %trade.symbol,
                        reason = %trade.reason,
                        pnl_usd = trade.pnl_usd,
                        "exit executed"
                    );
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(symbol = %sym.symbol, error = %err, "symbol evaluation failed");
                    self.trader
                        .notifier
                        .notify(format!("Error evaluating {}: {}", sym.symbol, err));
                }
            }
        }
    }
}
