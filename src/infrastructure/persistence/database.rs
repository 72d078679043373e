use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                current_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                leverage INTEGER NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit_1 TEXT NOT NULL,
                take_profit_2 TEXT,
                take_profit_3 TEXT,
                status TEXT NOT NULL DEFAULT 'open',
                pnl TEXT NOT NULL DEFAULT '0',
                pnl_percentage REAL NOT NULL DEFAULT 0,
                opened_at INTEGER NOT NULL,
                closed_at INTEGER,
                order_id TEXT,
                exit_price TEXT,
                exit_time INTEGER,
                max_pnl_percentage REAL NOT NULL DEFAULT 0,
                trailing_peak_price TEXT,
                pyramided INTEGER NOT NULL DEFAULT 0,
                partial_taken INTEGER NOT NULL DEFAULT 0,
                dca_count INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create trades table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_trades_symbol_status
            ON trades (symbol, status);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create trades index")?;

        Ok(())
    }
}
