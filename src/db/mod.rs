//! Durable persistence for trades, metric snapshots, and the equity curve.
//!
//! Persistence is best-effort: when no database is reachable the bot keeps
//! running against an in-memory store and only the history survives less.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::sync::Mutex;
use tracing::warn;

use crate::metrics::MetricsCalculator;
use crate::models::{CloseReason, ClosedTrade, EquitySnapshot, MetricsSnapshot, PositionSide};

/// Database connection pool for trade and metrics state.
pub struct Database {
    pool: SqlitePool,
}

/// Stored trade row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredTrade {
    id: String,
    symbol: String,
    side: String,
    entry_price: f64,
    exit_price: f64,
    pnl_pct: f64,
    pnl_usd: f64,
    reason: String,
    bars_held: i64,
    entry_time: String,
    exit_time: String,
    margin: f64,
    fees: f64,
}

/// Stored metrics snapshot row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredSnapshot {
    computed_at: String,
    total_trades: i64,
    winning_trades: i64,
    losing_trades: i64,
    win_rate: f64,
    total_pnl: f64,
    average_win: f64,
    average_loss: f64,
    profit_factor: f64,
    max_drawdown: f64,
    sharpe_ratio: f64,
    max_consecutive_wins: i64,
    max_consecutive_losses: i64,
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp: {:?}", s))
}

fn parse_side(s: &str) -> Result<PositionSide> {
    match s {
        "LONG" => Ok(PositionSide::Long),
        "SHORT" => Ok(PositionSide::Short),
        other => anyhow::bail!("unknown stored side: {}", other),
    }
}

/// Snapshots within the same wall-clock second overwrite each other.
fn snapshot_bucket(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S+00:00").to_string()
}

impl StoredTrade {
    fn into_trade(self) -> Result<ClosedTrade> {
        Ok(ClosedTrade {
            entry_time: parse_time(&self.entry_time)?,
            exit_time: parse_time(&self.exit_time)?,
            side: parse_side(&self.side)?,
            reason: CloseReason::from_str(&self.reason)
                .with_context(|| format!("unknown stored close reason: {}", self.reason))?,
            id: self.id,
            symbol: self.symbol,
            entry_price: self.entry_price,
            exit_price: self.exit_price,
            pnl_pct: self.pnl_pct,
            pnl_usd: self.pnl_usd,
            bars_held: self.bars_held as usize,
            margin: self.margin,
            fees: self.fees,
        })
    }
}

impl StoredSnapshot {
    fn into_snapshot(self) -> Result<MetricsSnapshot> {
        Ok(MetricsSnapshot {
            computed_at: parse_time(&self.computed_at)?,
            total_trades: self.total_trades as u32,
            winning_trades: self.winning_trades as u32,
            losing_trades: self.losing_trades as u32,
            win_rate: self.win_rate,
            total_pnl: self.total_pnl,
            average_win: self.average_win,
            average_loss: self.average_loss,
            profit_factor: self.profit_factor,
            max_drawdown: self.max_drawdown,
            sharpe_ratio: self.sharpe_ratio,
            max_consecutive_wins: self.max_consecutive_wins as u32,
            max_consecutive_losses: self.max_consecutive_losses as u32,
        })
    }
}

impl Database {
    /// Create a new database connection and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        // A single connection keeps in-memory URLs coherent
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                pnl_pct REAL NOT NULL,
                pnl_usd REAL NOT NULL,
                reason TEXT NOT NULL,
                bars_held INTEGER NOT NULL DEFAULT 0,
                entry_time TEXT NOT NULL,
                exit_time TEXT NOT NULL,
                margin REAL NOT NULL,
                fees REAL NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metric_snapshots (
                computed_at TEXT PRIMARY KEY,
                total_trades INTEGER NOT NULL,
                winning_trades INTEGER NOT NULL,
                losing_trades INTEGER NOT NULL,
                win_rate REAL NOT NULL,
                total_pnl REAL NOT NULL,
                average_win REAL NOT NULL,
                average_loss REAL NOT NULL,
                profit_factor REAL NOT NULL,
                max_drawdown REAL NOT NULL,
                sharpe_ratio REAL NOT NULL,
                max_consecutive_wins INTEGER NOT NULL,
                max_consecutive_losses INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS equity_curve (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                equity REAL NOT NULL,
                drawdown REAL NOT NULL DEFAULT 0,
                total_pnl REAL NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_exit_time ON trades(exit_time)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_equity_curve_time ON equity_curve(timestamp)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Append a settled trade. Replays of the same id are ignored.
    pub async fn save_trade(&self, trade: &ClosedTrade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO trades (
                id, symbol, side, entry_price, exit_price, pnl_pct, pnl_usd,
                reason, bars_held, entry_time, exit_time, margin, fees
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.entry_price)
        .bind(trade.exit_price)
        .bind(trade.pnl_pct)
        .bind(trade.pnl_usd)
        .bind(trade.reason.as_str())
        .bind(trade.bars_held as i64)
        .bind(trade.entry_time.to_rfc3339())
        .bind(trade.exit_time.to_rfc3339())
        .bind(trade.margin)
        .bind(trade.fees)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All trades in close order (oldest first).
    pub async fn load_trades(&self) -> Result<Vec<ClosedTrade>> {
        let rows = sqlx::query_as::<_, StoredTrade>("SELECT * FROM trades ORDER BY exit_time ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch trades")?;

        rows.into_iter().map(StoredTrade::into_trade).collect()
    }

    /// Upsert a metrics snapshot, deduplicated per wall-clock second.
    pub async fn save_snapshot(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metric_snapshots (
                computed_at, total_trades, winning_trades, losing_trades, win_rate,
                total_pnl, average_win, average_loss, profit_factor,
                max_drawdown, sharpe_ratio, max_consecutive_wins, max_consecutive_losses
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(computed_at) DO UPDATE SET
                total_trades = excluded.total_trades,
                winning_trades = excluded.winning_trades,
                losing_trades = excluded.losing_trades,
                win_rate = excluded.win_rate,
                total_pnl = excluded.total_pnl,
                average_win = excluded.average_win,
                average_loss = excluded.average_loss,
                profit_factor = excluded.profit_factor,
                max_drawdown = excluded.max_drawdown,
                sharpe_ratio = excluded.sharpe_ratio,
                max_consecutive_wins = excluded.max_consecutive_wins,
                max_consecutive_losses = excluded.max_consecutive_losses
            "#,
        )
        .bind(snapshot_bucket(snapshot.computed_at))
        .bind(snapshot.total_trades as i64)
        .bind(snapshot.winning_trades as i64)
        .bind(snapshot.losing_trades as i64)
        .bind(snapshot.win_rate)
        .bind(snapshot.total_pnl)
        .bind(snapshot.average_win)
        .bind(snapshot.average_loss)
        .bind(snapshot.profit_factor)
        .bind(snapshot.max_drawdown)
        .bind(snapshot.sharpe_ratio)
        .bind(snapshot.max_consecutive_wins as i64)
        .bind(snapshot.max_consecutive_losses as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recently computed snapshot, if any.
    pub async fn latest_snapshot(&self) -> Result<Option<MetricsSnapshot>> {
        let row = sqlx::query_as::<_, StoredSnapshot>(
            "SELECT * FROM metric_snapshots ORDER BY computed_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredSnapshot::into_snapshot).transpose()
    }

    /// Record one equity curve point.
    pub async fn record_equity_point(&self, point: &EquitySnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO equity_curve (timestamp, equity, drawdown, total_pnl) VALUES (?, ?, ?, ?)",
        )
        .bind(point.timestamp.to_rfc3339())
        .bind(point.equity)
        .bind(point.drawdown)
        .bind(point.total_pnl)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// In-memory stand-in used when no database is configured or reachable.
#[derive(Default)]
pub struct MemoryStore {
    trades: Mutex<Vec<ClosedTrade>>,
    snapshots: Mutex<Vec<MetricsSnapshot>>,
    equity: Mutex<Vec<EquitySnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn save_trade(&self, trade: &ClosedTrade) {
        let mut trades = self.trades.lock().unwrap();
        if !trades.iter().any(|t| t.id == trade.id) {
            trades.push(trade.clone());
        }
    }

    fn load_trades(&self) -> Vec<ClosedTrade> {
        let mut trades = self.trades.lock().unwrap().clone();
        trades.sort_by_key(|t| t.exit_time);
        trades
    }

    fn save_snapshot(&self, snapshot: &MetricsSnapshot) {
        let mut snapshots = self.snapshots.lock().unwrap();
        let bucket = snapshot_bucket(snapshot.computed_at);
        if let Some(last) = snapshots
            .iter_mut()
            .find(|s| snapshot_bucket(s.computed_at) == bucket)
        {
            *last = snapshot.clone();
        } else {
            snapshots.push(snapshot.clone());
        }
    }

    fn latest_snapshot(&self) -> Option<MetricsSnapshot> {
        self.snapshots.lock().unwrap().last().cloned()
    }

    fn record_equity_point(&self, point: &EquitySnapshot) {
        self.equity.lock().unwrap().push(*point);
    }
}

/// Storage backend selected at startup.
pub enum Store {
    Sqlite(Database),
    Memory(MemoryStore),
}

impl Store {
    /// Open the configured database, falling back to the in-memory store
    /// when the URL is missing or the connection fails.
    pub async fn open(database_url: Option<&str>) -> Self {
        match database_url {
            Some(url) => match Database::new(url).await {
                Ok(db) => Store::Sqlite(db),
                Err(err) => {
                    warn!(error = %err, "database unavailable, using in-memory store");
                    Store::Memory(MemoryStore::new())
                }
            },
            None => Store::Memory(MemoryStore::new()),
        }
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, Store::Sqlite(_))
    }

    pub async fn save_trade(&self, trade: &ClosedTrade) -> Result<()> {
        match self {
            Store::Sqlite(db) => db.save_trade(trade).await,
            Store::Memory(mem) => {
                mem.save_trade(trade);
                Ok(())
            }
        }
    }

    pub async fn load_trades(&self) -> Result<Vec<ClosedTrade>> {
        match self {
            Store::Sqlite(db) => db.load_trades().await,
            Store::Memory(mem) => Ok(mem.load_trades()),
        }
    }

    pub async fn save_snapshot(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        match self {
            Store::Sqlite(db) => db.save_snapshot(snapshot).await,
            Store::Memory(mem) => {
                mem.save_snapshot(snapshot);
                Ok(())
            }
        }
    }

    pub async fn latest_snapshot(&self) -> Result<Option<MetricsSnapshot>> {
        match self {
            Store::Sqlite(db) => db.latest_snapshot().await,
            Store::Memory(mem) => Ok(mem.latest_snapshot()),
        }
    }

    pub async fn record_equity_point(&self, point: &EquitySnapshot) -> Result<()> {
        match self {
            Store::Sqlite(db) => db.record_equity_point(point).await,
            Store::Memory(mem) => {
                mem.record_equity_point(point);
                Ok(())
            }
        }
    }

    /// Recompute metrics over the stored trades and persist the snapshot.
    /// Persistence failures are logged and swallowed; the snapshot is always
    /// returned so callers can still report it.
    pub async fn recompute_metrics(&self, initial_equity: f64) -> Result<MetricsSnapshot> {
        let trades = self.load_trades().await?;
        let snapshot = MetricsCalculator::calculate(&trades, initial_equity);

        if let Err(err) = self.save_snapshot(&snapshot).await {
            warn!(error = %err, "failed to persist metrics snapshot");
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionSide;
    use chrono::Duration;

    fn trade(id: &str, pnl_usd: f64, offset_secs: i64) -> ClosedTrade {
        ClosedTrade {
            id: id.to_string(),
            symbol: "IP/USDT:USDT".to_string(),
            side: PositionSide::Long,
            entry_price: 1.0,
            exit_price: 1.1,
            pnl_pct: pnl_usd / 250.0 * 100.0,
            pnl_usd,
            reason: CloseReason::SignalFlip,
            bars_held: 2,
            entry_time: Utc::now() - Duration::hours(1),
            exit_time: Utc::now() + Duration::seconds(offset_secs),
            margin: 250.0,
            fees: 1.0,
        }
    }

    #[tokio::test]
    async fn test_sqlite_trade_round_trip() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.save_trade(&trade("t1", 12.5, 0)).await.unwrap();
        db.save_trade(&trade("t2", -4.0, 10)).await.unwrap();
        // duplicate id is ignored
        db.save_trade(&trade("t1", 99.0, 20)).await.unwrap();

        let trades = db.load_trades().await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].id, "t1");
        assert!((trades[0].pnl_usd - 12.5).abs() < 1e-9);
        assert_eq!(trades[0].reason, CloseReason::SignalFlip);
        assert_eq!(trades[0].side, PositionSide::Long);
    }

    #[tokio::test]
    async fn test_sqlite_snapshot_dedup_per_second() {
        let db = Database::new("sqlite::memory:").await.unwrap();

        let mut first = MetricsSnapshot::empty();
        first.total_trades = 1;
        db.save_snapshot(&first).await.unwrap();

        let mut second = first.clone();
        second.total_trades = 2;
        // same second bucket overwrites the first row
        second.computed_at = first.computed_at;
        db.save_snapshot(&second).await.unwrap();

        let latest = db.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.total_trades, 2);
    }

    #[tokio::test]
    async fn test_memory_store_fallback_on_bad_url() {
        let store = Store::open(Some("sqlite:///nonexistent-dir/never/bot.db")).await;
        assert!(!store.is_durable());

        store.save_trade(&trade("t1", 5.0, 0)).await.unwrap();
        let trades = store.load_trades().await.unwrap();
        assert_eq!(trades.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_recompute_metrics() {
        let store = Store::open(None).await;
        store.save_trade(&trade("t1", 100.0, 0)).await.unwrap();
        store.save_trade(&trade("t2", -50.0, 5)).await.unwrap();

        let snapshot = store.recompute_metrics(1000.0).await.unwrap();
        assert_eq!(snapshot.total_trades, 2);
        assert_eq!(snapshot.winning_trades, 1);
        assert!((snapshot.total_pnl - 50.0).abs() < 1e-9);

        let latest = store.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.total_trades, 2);
    }
}
