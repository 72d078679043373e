//! In-memory exchange used by integration tests. Orders fill
//! deterministically: MARKET at the current price, LIMIT at the limit price
//! when `fill_limit_orders` is set, protective orders rest as NEW.

use crate::domain::errors::ExchangeError;
use crate::domain::ports::ExchangeClient;
use crate::domain::types::{
    AccountBalance, Direction, ExchangePosition, Interval, Kline, LeverageBracket,
    OpenInterestPoint, OrderAck, OrderBookTop, OrderParams, OrderSide, OrderStatus, OrderType,
    PremiumIndex, SymbolInfo, TakerRatioPoint, Ticker24h, UserTrade,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone)]
pub struct SubmittedOrder {
    pub ack: OrderAck,
    pub params: OrderParams,
}

#[derive(Default)]
pub struct MockExchange {
    pub prices: RwLock<HashMap<String, Decimal>>,
    pub books: RwLock<HashMap<String, OrderBookTop>>,
    pub klines: RwLock<HashMap<(String, Interval), Vec<Kline>>>,
    pub symbol_infos: RwLock<HashMap<String, SymbolInfo>>,
    pub tickers: RwLock<Vec<Ticker24h>>,
    pub balance: RwLock<Option<AccountBalance>>,
    pub positions: RwLock<HashMap<String, ExchangePosition>>,
    pub brackets: RwLock<HashMap<String, Vec<LeverageBracket>>>,
    pub premium: RwLock<HashMap<String, PremiumIndex>>,
    pub user_trades: RwLock<HashMap<String, Vec<UserTrade>>>,
    pub orders: Mutex<Vec<SubmittedOrder>>,
    pub leverage_changes: Mutex<Vec<(String, u32)>>,
    pub margin_changes: Mutex<Vec<(String, bool)>>,
    pub cancelled_all: Mutex<Vec<String>>,
    pub fill_limit_orders: AtomicBool,
    pub apply_fills_to_positions: AtomicBool,
    next_order_id: AtomicI64,
}

impl MockExchange {
    pub fn new() -> Self {
        let mock = Self::default();
        mock.fill_limit_orders.store(true, Ordering::Relaxed);
        mock.apply_fills_to_positions.store(true, Ordering::Relaxed);
        mock.next_order_id.store(1, Ordering::Relaxed);
        mock
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
        // Keep the book consistent with a one-tick spread unless a test
        // installed an explicit book.
        let mut books = self.books.write().await;
        books
            .entry(symbol.to_string())
            .or_insert_with(|| OrderBookTop {
                bid: price * dec!(0.9999),
                ask: price * dec!(1.0001),
            });
    }

    pub async fn set_book(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        self.books
            .write()
            .await
            .insert(symbol.to_string(), OrderBookTop { bid, ask });
    }

    pub async fn set_balance(&self, total: Decimal, available: Decimal) {
        *self.balance.write().await = Some(AccountBalance { total, available });
    }

    pub async fn set_symbol_info(&self, info: SymbolInfo) {
        self.symbol_infos
            .write()
            .await
            .insert(info.symbol.clone(), info);
    }

    pub async fn set_klines(&self, symbol: &str, interval: Interval, klines: Vec<Kline>) {
        self.klines
            .write()
            .await
            .insert((symbol.to_string(), interval), klines);
    }

    pub async fn set_position(&self, position: ExchangePosition) {
        self.positions
            .write()
            .await
            .insert(position.symbol.clone(), position);
    }

    pub async fn submitted_orders(&self) -> Vec<SubmittedOrder> {
        self.orders.lock().await.clone()
    }

    /// Standard symbol rules used across tests.
    pub fn default_symbol_info(symbol: &str) -> SymbolInfo {
        SymbolInfo {
            symbol: symbol.to_string(),
            status: "TRADING".into(),
            contract_type: "PERPETUAL".into(),
            quote_asset: "USDT".into(),
            tick_size: dec!(0.01),
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            max_qty: dec!(100000),
            min_notional: dec!(5),
            quantity_precision: 3,
            price_precision: 2,
        }
    }

    async fn apply_fill(&self, params: &OrderParams, fill_price: Decimal, qty: Decimal) {
        if !self.apply_fills_to_positions.load(Ordering::Relaxed) {
            return;
        }
        let mut positions = self.positions.write().await;
        let signed = match params.side {
            OrderSide::Buy => qty,
            OrderSide::Sell => -qty,
        };
        let entry = positions
            .entry(params.symbol.clone())
            .or_insert_with(|| ExchangePosition {
                symbol: params.symbol.clone(),
                position_amt: Decimal::ZERO,
                entry_price: fill_price,
                mark_price: fill_price,
                unrealized_pnl: Decimal::ZERO,
                leverage: 10,
                isolated: false,
                // Default liquidation far away so headroom checks pass
                // unless a test says otherwise.
                liquidation_price: fill_price * dec!(0.5),
                isolated_margin: Decimal::ZERO,
            });
        entry.position_amt += signed;
        entry.mark_price = fill_price;
        if entry.position_amt == Decimal::ZERO {
            positions.remove(&params.symbol);
        }
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn account_balance(&self) -> Result<AccountBalance, ExchangeError> {
        self.balance
            .read()
            .await
            .ok_or_else(|| ExchangeError::DataQuality("no balance configured".into()))
    }

    async fn symbol_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::DataQuality(format!("no price for {symbol}")))
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Kline>, ExchangeError> {
        let map = self.klines.read().await;
        let series = map
            .get(&(symbol.to_string(), interval))
            .cloned()
            .unwrap_or_default();
        let start = series.len().saturating_sub(limit);
        Ok(series[start..].to_vec())
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, ExchangeError> {
        self.symbol_infos
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::DataQuality(format!("unknown symbol {symbol}")))
    }

    async fn exchange_symbols(&self) -> Result<Vec<SymbolInfo>, ExchangeError> {
        Ok(self.symbol_infos.read().await.values().cloned().collect())
    }

    async fn ticker_24h_all(&self) -> Result<Vec<Ticker24h>, ExchangeError> {
        Ok(self.tickers.read().await.clone())
    }

    async fn open_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        Ok(self.positions.read().await.values().cloned().collect())
    }

    async fn position_risk(&self, symbol: &str) -> Result<Option<ExchangePosition>, ExchangeError> {
        Ok(self.positions.read().await.get(symbol).cloned())
    }

    async fn create_order(&self, params: OrderParams) -> Result<OrderAck, ExchangeError> {
        let order_id = self.next_order_id.fetch_add(1, Ordering::Relaxed);
        let price = self
            .prices
            .read()
            .await
            .get(&params.symbol)
            .copied()
            .unwrap_or(Decimal::ZERO);

        let (status, avg_price) = match params.order_type {
            OrderType::Market => (OrderStatus::Filled, price),
            OrderType::Limit => {
                if self.fill_limit_orders.load(Ordering::Relaxed) {
                    (OrderStatus::Filled, params.price.unwrap_or(price))
                } else {
                    (OrderStatus::New, Decimal::ZERO)
                }
            }
            OrderType::StopMarket | OrderType::TrailingStopMarket => {
                (OrderStatus::New, Decimal::ZERO)
            }
        };

        let qty = params.quantity.unwrap_or(Decimal::ZERO);
        let executed_qty = if status == OrderStatus::Filled {
            qty
        } else {
            Decimal::ZERO
        };
        if status == OrderStatus::Filled {
            self.apply_fill(&params, avg_price, qty).await;
        }

        let ack = OrderAck {
            order_id,
            client_order_id: params
                .new_client_order_id
                .clone()
                .unwrap_or_else(|| format!("mock-{order_id}")),
            symbol: params.symbol.clone(),
            status,
            avg_price,
            executed_qty,
            cum_quote: avg_price * executed_qty,
        };
        self.orders.lock().await.push(SubmittedOrder {
            ack: ack.clone(),
            params,
        });
        Ok(ack)
    }

    async fn cancel_order(&self, _symbol: &str, order_id: i64) -> Result<(), ExchangeError> {
        let mut orders = self.orders.lock().await;
        if let Some(o) = orders.iter_mut().find(|o| o.ack.order_id == order_id) {
            if !o.ack.status.is_terminal() {
                o.ack.status = OrderStatus::Canceled;
            }
        }
        Ok(())
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        self.cancelled_all.lock().await.push(symbol.to_string());
        let mut orders = self.orders.lock().await;
        for o in orders.iter_mut().filter(|o| o.ack.symbol == symbol) {
            if !o.ack.status.is_terminal() {
                o.ack.status = OrderStatus::Canceled;
            }
        }
        Ok(())
    }

    async fn get_order(&self, _symbol: &str, order_id: i64) -> Result<OrderAck, ExchangeError> {
        self.orders
            .lock()
            .await
            .iter()
            .find(|o| o.ack.order_id == order_id)
            .map(|o| o.ack.clone())
            .ok_or_else(|| ExchangeError::DataQuality(format!("unknown order {order_id}")))
    }

    async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.leverage_changes
            .lock()
            .await
            .push((symbol.to_string(), leverage));
        Ok(())
    }

    async fn ensure_margin_type(&self, symbol: &str, isolated: bool) -> Result<(), ExchangeError> {
        self.margin_changes
            .lock()
            .await
            .push((symbol.to_string(), isolated));
        Ok(())
    }

    async fn ensure_position_mode(&self, _dual_side: bool) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn leverage_brackets(&self, symbol: &str) -> Result<Vec<LeverageBracket>, ExchangeError> {
        Ok(self
            .brackets
            .read()
            .await
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| {
                vec![LeverageBracket {
                    notional_floor: Decimal::ZERO,
                    notional_cap: dec!(10000000),
                    max_initial_leverage: 125,
                }]
            }))
    }

    async fn premium_index(&self, symbol: &str) -> Result<PremiumIndex, ExchangeError> {
        if let Some(p) = self.premium.read().await.get(symbol) {
            return Ok(p.clone());
        }
        let price = self.symbol_price(symbol).await.unwrap_or(dec!(1));
        Ok(PremiumIndex {
            symbol: symbol.to_string(),
            mark_price: price,
            index_price: price,
            last_funding_rate: 0.0001,
            next_funding_time: chrono::Utc::now().timestamp_millis() + 4 * 3600 * 1000,
        })
    }

    async fn open_interest_history(
        &self,
        _symbol: &str,
        _period: &str,
        limit: usize,
    ) -> Result<Vec<OpenInterestPoint>, ExchangeError> {
        Ok((0..limit)
            .map(|i| OpenInterestPoint {
                timestamp: i as i64,
                open_interest: dec!(1000000),
            })
            .collect())
    }

    async fn taker_long_short_ratio(
        &self,
        _symbol: &str,
        _period: &str,
        limit: usize,
    ) -> Result<Vec<TakerRatioPoint>, ExchangeError> {
        Ok((0..limit)
            .map(|i| TakerRatioPoint {
                timestamp: i as i64,
                buy_sell_ratio: 1.0,
            })
            .collect())
    }

    async fn order_book(&self, symbol: &str, _limit: usize) -> Result<OrderBookTop, ExchangeError> {
        self.books
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::DataQuality(format!("no book for {symbol}")))
    }

    async fn recent_user_trades(
        &self,
        symbol: &str,
        _limit: usize,
    ) -> Result<Vec<UserTrade>, ExchangeError> {
        Ok(self
            .user_trades
            .read()
            .await
            .get(symbol)
            .cloned()
            .unwrap_or_default())
    }

    fn ban_remaining(&self) -> Option<Duration> {
        None
    }
}

/// Convenience builder for exchange positions in tests.
pub fn mock_position(symbol: &str, direction: Direction, qty: Decimal, entry: Decimal) -> ExchangePosition {
    let amt = match direction {
        Direction::Long => qty,
        Direction::Short => -qty,
    };
    ExchangePosition {
        symbol: symbol.to_string(),
        position_amt: amt,
        entry_price: entry,
        mark_price: entry,
        unrealized_pnl: Decimal::ZERO,
        leverage: 10,
        isolated: false,
        liquidation_price: match direction {
            Direction::Long => entry * dec!(0.5),
            Direction::Short => entry * dec!(1.5),
        },
        isolated_margin: Decimal::ZERO,
    }
}
