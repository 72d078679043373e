//! SQLite-backed `TradeRepository`. Money values are stored as TEXT and
//! parsed back to `Decimal`; timestamps are UTC millis.

use super::database::Database;
use crate::domain::ports::TradeRepository;
use crate::domain::types::{Direction, NewTrade, Trade, TradeStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;

pub struct SqliteTradeStore {
    db: Database,
}

impl SqliteTradeStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn get_decimal(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let raw: String = row.try_get(column)?;
    raw.parse::<Decimal>()
        .with_context(|| format!("corrupt decimal in column {column}: {raw}"))
}

fn get_opt_decimal(row: &SqliteRow, column: &str) -> Result<Option<Decimal>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|r| {
        r.parse::<Decimal>()
            .with_context(|| format!("corrupt decimal in column {column}: {r}"))
    })
    .transpose()
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

fn row_to_trade(row: &SqliteRow) -> Result<Trade> {
    let direction_raw: String = row.try_get("direction")?;
    let status_raw: String = row.try_get("status")?;
    let closed_at: Option<i64> = row.try_get("closed_at")?;
    let exit_time: Option<i64> = row.try_get("exit_time")?;

    Ok(Trade {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        direction: Direction::from_str(&direction_raw)
            .map_err(|e| anyhow::anyhow!("corrupt direction: {e}"))?,
        entry_price: get_decimal(row, "entry_price")?,
        current_price: get_decimal(row, "current_price")?,
        quantity: get_decimal(row, "quantity")?,
        leverage: row.try_get::<i64, _>("leverage")? as u32,
        stop_loss: get_decimal(row, "stop_loss")?,
        take_profit_1: get_decimal(row, "take_profit_1")?,
        take_profit_2: get_opt_decimal(row, "take_profit_2")?,
        take_profit_3: get_opt_decimal(row, "take_profit_3")?,
        status: TradeStatus::from_str(&status_raw)
            .map_err(|e| anyhow::anyhow!("corrupt status: {e}"))?,
        pnl: get_decimal(row, "pnl")?,
        pnl_percentage: row.try_get("pnl_percentage")?,
        opened_at: ms_to_datetime(row.try_get("opened_at")?),
        closed_at: closed_at.map(ms_to_datetime),
        order_id: row.try_get("order_id")?,
        exit_price: get_opt_decimal(row, "exit_price")?,
        exit_time: exit_time.map(ms_to_datetime),
        max_pnl_percentage: row.try_get("max_pnl_percentage")?,
        trailing_peak_price: get_opt_decimal(row, "trailing_peak_price")?,
        pyramided: row.try_get::<i64, _>("pyramided")? != 0,
        partial_taken: row.try_get::<i64, _>("partial_taken")? != 0,
        dca_count: row.try_get::<i64, _>("dca_count")? as u32,
    })
}

#[async_trait]
impl TradeRepository for SqliteTradeStore {
    async fn insert(&self, trade: &NewTrade) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                symbol, direction, entry_price, current_price, quantity, leverage,
                stop_loss, take_profit_1, take_profit_2, take_profit_3,
                status, opened_at, order_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'open', ?, ?)
            "#,
        )
        .bind(&trade.symbol)
        .bind(trade.direction.to_string())
        .bind(trade.entry_price.to_string())
        .bind(trade.entry_price.to_string())
        .bind(trade.quantity.to_string())
        .bind(trade.leverage as i64)
        .bind(trade.stop_loss.to_string())
        .bind(trade.take_profit_1.to_string())
        .bind(trade.take_profit_2.map(|d| d.to_string()))
        .bind(trade.take_profit_3.map(|d| d.to_string()))
        .bind(Utc::now().timestamp_millis())
        .bind(&trade.order_id)
        .execute(&self.db.pool)
        .await
        .context("Failed to insert trade")?;

        Ok(result.last_insert_rowid())
    }

    async fn update(&self, trade: &Trade) -> Result<()> {
        // A closed row never reopens: the status predicate below makes the
        // open -> closed transition one-way at the storage layer.
        let result = sqlx::query(
            r#"
            UPDATE trades SET
                entry_price = ?, current_price = ?, quantity = ?, leverage = ?,
                stop_loss = ?, take_profit_1 = ?, take_profit_2 = ?, take_profit_3 = ?,
                status = ?, pnl = ?, pnl_percentage = ?, opened_at = ?, closed_at = ?, order_id = ?,
                exit_price = ?, exit_time = ?, max_pnl_percentage = ?,
                trailing_peak_price = ?, pyramided = ?, partial_taken = ?, dca_count = ?
            WHERE id = ? AND status = 'open'
            "#,
        )
        .bind(trade.entry_price.to_string())
        .bind(trade.current_price.to_string())
        .bind(trade.quantity.to_string())
        .bind(trade.leverage as i64)
        .bind(trade.stop_loss.to_string())
        .bind(trade.take_profit_1.to_string())
        .bind(trade.take_profit_2.map(|d| d.to_string()))
        .bind(trade.take_profit_3.map(|d| d.to_string()))
        .bind(trade.status.to_string())
        .bind(trade.pnl.to_string())
        .bind(trade.pnl_percentage)
        .bind(trade.opened_at.timestamp_millis())
        .bind(trade.closed_at.map(|t| t.timestamp_millis()))
        .bind(&trade.order_id)
        .bind(trade.exit_price.map(|d| d.to_string()))
        .bind(trade.exit_time.map(|t| t.timestamp_millis()))
        .bind(trade.max_pnl_percentage)
        .bind(trade.trailing_peak_price.map(|d| d.to_string()))
        .bind(trade.pyramided as i64)
        .bind(trade.partial_taken as i64)
        .bind(trade.dca_count as i64)
        .bind(trade.id)
        .execute(&self.db.pool)
        .await
        .context("Failed to update trade")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("trade {} is not open, refusing update", trade.id);
        }
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Trade>> {
        let row = sqlx::query("SELECT * FROM trades WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await?;
        row.as_ref().map(row_to_trade).transpose()
    }

    async fn open_trades(&self) -> Result<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE status = 'open' ORDER BY opened_at")
            .fetch_all(&self.db.pool)
            .await?;
        rows.iter().map(row_to_trade).collect()
    }

    async fn open_trade_for_symbol(&self, symbol: &str) -> Result<Option<Trade>> {
        let row = sqlx::query("SELECT * FROM trades WHERE symbol = ? AND status = 'open' LIMIT 1")
            .bind(symbol)
            .fetch_optional(&self.db.pool)
            .await?;
        row.as_ref().map(row_to_trade).transpose()
    }

    async fn recent_closed(&self, limit: usize) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            "SELECT * FROM trades WHERE status = 'closed' ORDER BY closed_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.db.pool)
        .await?;
        rows.iter().map(row_to_trade).collect()
    }

    async fn closed_today_count(&self) -> Result<usize> {
        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc().timestamp_millis())
            .unwrap_or(0);
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM trades WHERE status = 'closed' AND closed_at >= ?",
        )
        .bind(midnight)
        .fetch_one(&self.db.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_new_trade() -> NewTrade {
        NewTrade {
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            entry_price: dec!(100),
            quantity: dec!(0.5),
            leverage: 10,
            stop_loss: dec!(95),
            take_profit_1: dec!(105),
            take_profit_2: Some(dec!(110)),
            take_profit_3: None,
            order_id: Some("42".into()),
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_roundtrip() {
        let store = SqliteTradeStore::new(Database::in_memory().await.unwrap());
        let id = store.insert(&sample_new_trade()).await.unwrap();
        let trade = store.get(id).await.unwrap().unwrap();
        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.entry_price, dec!(100));
        assert_eq!(trade.status, TradeStatus::Open);
        assert_eq!(trade.take_profit_2, Some(dec!(110)));
        assert_eq!(trade.take_profit_3, None);
    }

    #[tokio::test]
    async fn test_closed_trade_never_reopens() {
        let store = SqliteTradeStore::new(Database::in_memory().await.unwrap());
        let id = store.insert(&sample_new_trade()).await.unwrap();
        let mut trade = store.get(id).await.unwrap().unwrap();

        trade.status = TradeStatus::Closed;
        trade.closed_at = Some(Utc::now());
        trade.exit_price = Some(dec!(107));
        store.update(&trade).await.unwrap();

        // Any further update, including one claiming "open", must fail.
        trade.status = TradeStatus::Open;
        assert!(store.update(&trade).await.is_err());

        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TradeStatus::Closed);
    }

    #[tokio::test]
    async fn test_open_trades_filter() {
        let store = SqliteTradeStore::new(Database::in_memory().await.unwrap());
        let id_a = store.insert(&sample_new_trade()).await.unwrap();
        let mut other = sample_new_trade();
        other.symbol = "ETHUSDT".into();
        store.insert(&other).await.unwrap();

        let mut trade_a = store.get(id_a).await.unwrap().unwrap();
        trade_a.status = TradeStatus::Closed;
        trade_a.closed_at = Some(Utc::now());
        store.update(&trade_a).await.unwrap();

        let open = store.open_trades().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].symbol, "ETHUSDT");
        assert!(
            store
                .open_trade_for_symbol("ETHUSDT")
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            store
                .open_trade_for_symbol("BTCUSDT")
                .await
                .unwrap()
                .is_none()
        );
    }
}
