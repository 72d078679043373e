//! Binance USDT-M futures adapter: signed REST core, typed endpoint wrappers
//! and the two WebSocket streams.

mod account;
mod client;
mod market;
mod orders;
pub mod streams;

pub use client::BinanceClient;
pub use streams::{MiniTickerStream, UserDataStream, UserStreamEvent};

use crate::domain::errors::ExchangeError;
use crate::domain::ports::{ExchangeClient, KvCache};
use crate::domain::types::{
    AccountBalance, ExchangePosition, Interval, Kline, LeverageBracket, OpenInterestPoint,
    OrderAck, OrderBookTop, OrderParams, PremiumIndex, SymbolInfo, TakerRatioPoint, Ticker24h,
    UserTrade,
};
use crate::infrastructure::cache::keys;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;

impl BinanceClient {
    pub fn ws_base(&self) -> &str {
        &self.ws_base_url
    }

    pub async fn invalidate_balance_cache(&self) {
        self.cache.invalidate(keys::ACCOUNT_BALANCE).await;
    }

    pub async fn user_stream_start(&self) -> Result<String, ExchangeError> {
        self.start_user_stream().await
    }

    pub async fn user_stream_keepalive(&self) -> Result<(), ExchangeError> {
        self.keepalive_user_stream().await
    }

    pub async fn user_stream_close(&self) -> Result<(), ExchangeError> {
        self.close_user_stream().await
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn account_balance(&self) -> Result<AccountBalance, ExchangeError> {
        self.fetch_account_balance().await
    }

    async fn symbol_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.fetch_symbol_price(symbol).await
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Kline>, ExchangeError> {
        self.fetch_klines(symbol, interval, limit).await
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, ExchangeError> {
        self.fetch_symbol_info(symbol).await
    }

    async fn exchange_symbols(&self) -> Result<Vec<SymbolInfo>, ExchangeError> {
        self.fetch_exchange_symbols().await
    }

    async fn ticker_24h_all(&self) -> Result<Vec<Ticker24h>, ExchangeError> {
        self.fetch_ticker_24h_all().await
    }

    async fn open_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        self.fetch_open_positions().await
    }

    async fn position_risk(&self, symbol: &str) -> Result<Option<ExchangePosition>, ExchangeError> {
        self.fetch_position_risk(symbol).await
    }

    async fn create_order(&self, params: OrderParams) -> Result<OrderAck, ExchangeError> {
        self.submit_order(params).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<(), ExchangeError> {
        self.do_cancel_order(symbol, order_id).await
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        self.do_cancel_all(symbol).await
    }

    async fn get_order(&self, symbol: &str, order_id: i64) -> Result<OrderAck, ExchangeError> {
        self.fetch_order(symbol, order_id).await
    }

    async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.do_change_leverage(symbol, leverage).await
    }

    async fn ensure_margin_type(&self, symbol: &str, isolated: bool) -> Result<(), ExchangeError> {
        self.do_ensure_margin_type(symbol, isolated).await
    }

    async fn ensure_position_mode(&self, dual_side: bool) -> Result<(), ExchangeError> {
        self.do_ensure_position_mode(dual_side).await
    }

    async fn leverage_brackets(&self, symbol: &str) -> Result<Vec<LeverageBracket>, ExchangeError> {
        self.fetch_leverage_brackets(symbol).await
    }

    async fn premium_index(&self, symbol: &str) -> Result<PremiumIndex, ExchangeError> {
        self.fetch_premium_index(symbol).await
    }

    async fn open_interest_history(
        &self,
        symbol: &str,
        period: &str,
        limit: usize,
    ) -> Result<Vec<OpenInterestPoint>, ExchangeError> {
        self.fetch_open_interest_history(symbol, period, limit).await
    }

    async fn taker_long_short_ratio(
        &self,
        symbol: &str,
        period: &str,
        limit: usize,
    ) -> Result<Vec<TakerRatioPoint>, ExchangeError> {
        self.fetch_taker_ratio(symbol, period, limit).await
    }

    async fn order_book(&self, symbol: &str, limit: usize) -> Result<OrderBookTop, ExchangeError> {
        self.fetch_order_book(symbol, limit).await
    }

    async fn recent_user_trades(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<UserTrade>, ExchangeError> {
        self.fetch_user_trades(symbol, limit).await
    }

    fn ban_remaining(&self) -> Option<Duration> {
        self.ban_remaining_duration()
    }
}
