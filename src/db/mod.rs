//! Audit persistence for TP-continuation re-entries.
//!
//! One append-only table: every TP-continuation fire writes a row with the
//! chain, level, accumulated profit, trigger price, and SL reduction used.

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

/// Database connection pool for the audit trail.
pub struct Database {
    pool: SqlitePool,
}

/// One recorded TP-continuation re-entry.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TpReentryEvent {
    pub id: i64,
    pub chain_id: String,
    pub symbol: String,
    pub level: i64,
    pub chain_profit: f64,
    pub trigger_price: f64,
    pub sl_reduction_pct: f64,
    pub created_at: String,
}

impl Database {
    /// Create a new database connection and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
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
            CREATE TABLE IF NOT EXISTS tp_reentry_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chain_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                level INTEGER NOT NULL,
                chain_profit REAL NOT NULL DEFAULT 0,
                trigger_price REAL NOT NULL,
                sl_reduction_pct REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tp_reentry_chain ON tp_reentry_events(chain_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append one TP-continuation audit row.
    pub async fn record_tp_reentry(
        &self,
        chain_id: &str,
        symbol: &str,
        level: i64,
        chain_profit: f64,
        trigger_price: f64,
        sl_reduction_pct: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tp_reentry_events
                (chain_id, symbol, level, chain_profit, trigger_price, sl_reduction_pct, created_at)
            VALUES (?, ?, ?, ?, ?, ?, datetime('now'))
            "#,
        )
        .bind(chain_id)
        .bind(symbol)
        .bind(level)
        .bind(chain_profit)
        .bind(trigger_price)
        .bind(sl_reduction_pct)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent audit rows, newest first.
    pub async fn recent_tp_reentries(&self, limit: i64) -> Result<Vec<TpReentryEvent>> {
        let events = sqlx::query_as::<_, TpReentryEvent>(
            "SELECT * FROM tp_reentry_events ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}
