//! Collaborator contracts. Infrastructure provides the live implementations,
//! tests substitute in-memory mocks.

use crate::domain::errors::ExchangeError;
use crate::domain::types::{
    AccountBalance, ExchangePosition, Interval, Kline, LeverageBracket, NewTrade,
    OpenInterestPoint, OrderAck, OrderBookTop, OrderParams, PremiumIndex, SymbolInfo, TakerRatioPoint,
    Ticker24h, Trade, UserTrade,
};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;

/// Capability surface of the futures venue. Every call executes off the
/// scheduling loop; transient failures are retried inside the implementation
/// (3 attempts, 1-2-4 s), fatal codes surface immediately.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn account_balance(&self) -> Result<AccountBalance, ExchangeError>;
    async fn symbol_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;
    async fn klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Kline>, ExchangeError>;
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, ExchangeError>;
    async fn exchange_symbols(&self) -> Result<Vec<SymbolInfo>, ExchangeError>;
    async fn ticker_24h_all(&self) -> Result<Vec<Ticker24h>, ExchangeError>;
    async fn open_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError>;
    async fn position_risk(&self, symbol: &str) -> Result<Option<ExchangePosition>, ExchangeError>;

    async fn create_order(&self, params: OrderParams) -> Result<OrderAck, ExchangeError>;
    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<(), ExchangeError>;
    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<(), ExchangeError>;
    async fn get_order(&self, symbol: &str, order_id: i64) -> Result<OrderAck, ExchangeError>;

    async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;
    async fn ensure_margin_type(&self, symbol: &str, isolated: bool) -> Result<(), ExchangeError>;
    async fn ensure_position_mode(&self, dual_side: bool) -> Result<(), ExchangeError>;
    async fn leverage_brackets(&self, symbol: &str) -> Result<Vec<LeverageBracket>, ExchangeError>;

    async fn premium_index(&self, symbol: &str) -> Result<PremiumIndex, ExchangeError>;
    async fn open_interest_history(
        &self,
        symbol: &str,
        period: &str,
        limit: usize,
    ) -> Result<Vec<OpenInterestPoint>, ExchangeError>;
    async fn taker_long_short_ratio(
        &self,
        symbol: &str,
        period: &str,
        limit: usize,
    ) -> Result<Vec<TakerRatioPoint>, ExchangeError>;
    async fn order_book(&self, symbol: &str, limit: usize) -> Result<OrderBookTop, ExchangeError>;
    async fn recent_user_trades(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<UserTrade>, ExchangeError>;

    /// Remaining ban duration, if the venue has rate-banned us (code -1003).
    fn ban_remaining(&self) -> Option<Duration>;
}

/// Persistent store for trade records. Writes within a single trade's
/// lifecycle are transactional per trade.
#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn insert(&self, trade: &NewTrade) -> Result<i64>;
    async fn update(&self, trade: &Trade) -> Result<()>;
    async fn get(&self, id: i64) -> Result<Option<Trade>>;
    async fn open_trades(&self) -> Result<Vec<Trade>>;
    async fn open_trade_for_symbol(&self, symbol: &str) -> Result<Option<Trade>>;
    async fn recent_closed(&self, limit: usize) -> Result<Vec<Trade>>;
    async fn closed_today_count(&self) -> Result<usize>;
}

/// TTL key/value cache. Source of truth for rate-limited data and for
/// cross-restart recovery of daily-risk markers and DCA counters.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get_raw(&self, key: &str) -> Option<String>;
    async fn set_raw(&self, key: &str, value: String, ttl: Duration);
    /// Atomic increment; initializes to 1 with `ttl` when absent.
    async fn incr(&self, key: &str, ttl: Duration) -> i64;
    async fn scan_prefix(&self, prefix: &str) -> Vec<(String, String)>;
    async fn invalidate(&self, key: &str);
}

/// Typed read through the cache.
pub async fn cache_get<T: serde::de::DeserializeOwned>(
    cache: &dyn KvCache,
    key: &str,
) -> Option<T> {
    let raw = cache.get_raw(key).await?;
    serde_json::from_str(&raw).ok()
}

/// Typed write through the cache.
pub async fn cache_set<T: serde::Serialize>(
    cache: &dyn KvCache,
    key: &str,
    value: &T,
    ttl: Duration,
) {
    if let Ok(raw) = serde_json::to_string(value) {
        cache.set_raw(key, raw, ttl).await;
    }
}

/// Outbound notification channel. Fire-and-forget: implementations must not
/// block the caller and must swallow delivery failures (logging them).
pub trait Notifier: Send + Sync {
    fn notify(&self, message: String);
}
