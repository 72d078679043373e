use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Side of the order that opens a position in this direction.
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Side of the order that reduces/closes a position in this direction.
    pub fn exit_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Sell,
            Direction::Short => OrderSide::Buy,
        }
    }

    /// Direction implied by a signed exchange position amount.
    pub fn from_position_amt(amt: Decimal) -> Option<Self> {
        if amt > Decimal::ZERO {
            Some(Direction::Long)
        } else if amt < Decimal::ZERO {
            Some(Direction::Short)
        } else {
            None
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    TrailingStopMarket,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::StopMarket => write!(f, "STOP_MARKET"),
            OrderType::TrailingStopMarket => write!(f, "TRAILING_STOP_MARKET"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till cancelled.
    Gtc,
    /// Post-only: cancelled by the venue if it would execute as a taker.
    Gtx,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeInForce::Gtc => write!(f, "GTC"),
            TimeInForce::Gtx => write!(f, "GTX"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkingType {
    MarkPrice,
    ContractPrice,
}

impl fmt::Display for WorkingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkingType::MarkPrice => write!(f, "MARK_PRICE"),
            WorkingType::ContractPrice => write!(f, "CONTRACT_PRICE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Interval::M1),
            "5m" => Ok(Interval::M5),
            "15m" => Ok(Interval::M15),
            "1h" => Ok(Interval::H1),
            "4h" => Ok(Interval::H4),
            "1d" => Ok(Interval::D1),
            other => Err(format!("unknown interval: {other}")),
        }
    }
}

/// One candle of a fixed-interval series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub trades: u64,
}

impl Kline {
    pub fn close_f64(&self) -> f64 {
        self.close.to_f64().unwrap_or(0.0)
    }

    pub fn high_f64(&self) -> f64 {
        self.high.to_f64().unwrap_or(0.0)
    }

    pub fn low_f64(&self) -> f64 {
        self.low.to_f64().unwrap_or(0.0)
    }

    pub fn open_f64(&self) -> f64 {
        self.open.to_f64().unwrap_or(0.0)
    }

    pub fn volume_f64(&self) -> f64 {
        self.volume.to_f64().unwrap_or(0.0)
    }
}

/// Exchange trading rules for one symbol. Immutable within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub contract_type: String,
    pub quote_asset: String,
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub min_notional: Decimal,
    pub quantity_precision: u32,
    pub price_precision: u32,
}

impl SymbolInfo {
    pub fn is_tradable_perpetual(&self) -> bool {
        self.status == "TRADING" && self.contract_type == "PERPETUAL" && self.quote_asset == "USDT"
    }

    /// Round a quantity down to the symbol's step size.
    pub fn round_qty_down(&self, qty: Decimal) -> Decimal {
        if self.step_size <= Decimal::ZERO {
            return qty;
        }
        let steps = (qty / self.step_size).floor();
        (steps * self.step_size).normalize()
    }

    /// Round a price to the symbol's tick size (toward zero).
    pub fn round_price(&self, price: Decimal) -> Decimal {
        if self.tick_size <= Decimal::ZERO {
            return price;
        }
        let ticks = (price / self.tick_size).floor();
        (ticks * self.tick_size).normalize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker24h {
    pub symbol: String,
    pub last_price: Decimal,
    pub price_change_pct: f64,
    pub quote_volume: Decimal,
}

/// Best bid/ask snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderBookTop {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl OrderBookTop {
    /// Spread relative to the ask, in percent.
    pub fn spread_pct(&self) -> f64 {
        let ask = self.ask.to_f64().unwrap_or(0.0);
        let bid = self.bid.to_f64().unwrap_or(0.0);
        if ask <= 0.0 {
            return f64::MAX;
        }
        (ask - bid) / ask * 100.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremiumIndex {
    pub symbol: String,
    pub mark_price: Decimal,
    pub index_price: Decimal,
    pub last_funding_rate: f64,
    pub next_funding_time: i64,
}

impl PremiumIndex {
    pub fn minutes_to_funding(&self, now_ms: i64) -> i64 {
        ((self.next_funding_time - now_ms).max(0)) / 60_000
    }
}

/// One row of the venue's leverage bracket table, ascending notional floor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeverageBracket {
    pub notional_floor: Decimal,
    pub notional_cap: Decimal,
    pub max_initial_leverage: u32,
}

/// Maximum initial leverage allowed for a given notional.
pub fn bracket_max_leverage(brackets: &[LeverageBracket], notional: Decimal) -> Option<u32> {
    brackets
        .iter()
        .find(|b| notional >= b.notional_floor && notional < b.notional_cap)
        .or_else(|| brackets.last())
        .map(|b| b.max_initial_leverage)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenInterestPoint {
    pub timestamp: i64,
    pub open_interest: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakerRatioPoint {
    pub timestamp: i64,
    pub buy_sell_ratio: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountBalance {
    pub total: Decimal,
    pub available: Decimal,
}

/// Position mirror from the venue. Ephemeral, re-read each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: u32,
    pub isolated: bool,
    pub liquidation_price: Decimal,
    pub isolated_margin: Decimal,
}

impl ExchangePosition {
    pub fn direction(&self) -> Option<Direction> {
        Direction::from_position_amt(self.position_amt)
    }

    pub fn quantity(&self) -> Decimal {
        self.position_amt.abs()
    }

    /// Distance from entry to liquidation, in percent of entry.
    pub fn headroom_pct(&self) -> Option<f64> {
        let entry = self.entry_price.to_f64()?;
        let liq = self.liquidation_price.to_f64()?;
        if entry <= 0.0 || liq <= 0.0 {
            return None;
        }
        Some((entry - liq).abs() / entry * 100.0)
    }
}

/// Enrichment facts carried along with a signal for scoring context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalEnrichment {
    pub rsi: f64,
    pub volume_ratio: f64,
    pub atr: f64,
    pub rr: f64,
    pub funding_rate: Option<f64>,
    pub minutes_to_funding: Option<i64>,
    pub oi_change_pct: Option<f64>,
    pub taker_ratio: Option<f64>,
    pub is_reversal: bool,
    pub market_sentiment_score: Option<f64>,
}

/// A scored trading signal. Consumed by the executor, discarded after one
/// admission attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit_1: Decimal,
    pub take_profit_2: Option<Decimal>,
    pub take_profit_3: Option<Decimal>,
    pub leverage: u32,
    pub score: u32,
    pub risk_pct: f64,
    pub force: bool,
    pub sniper: bool,
    pub enrichment: SignalEnrichment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Open => write!(f, "open"),
            TradeStatus::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TradeStatus::Open),
            "closed" => Ok(TradeStatus::Closed),
            other => Err(format!("unknown trade status: {other}")),
        }
    }
}

/// Persistent trade record. Status transitions monotonically open -> closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub quantity: Decimal,
    pub leverage: u32,
    pub stop_loss: Decimal,
    pub take_profit_1: Decimal,
    pub take_profit_2: Option<Decimal>,
    pub take_profit_3: Option<Decimal>,
    pub status: TradeStatus,
    pub pnl: Decimal,
    pub pnl_percentage: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub order_id: Option<String>,
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    pub max_pnl_percentage: f64,
    pub trailing_peak_price: Option<Decimal>,
    pub pyramided: bool,
    pub partial_taken: bool,
    pub dca_count: u32,
}

impl Trade {
    /// Size-weighted average entry after adding `add_qty` at `add_price`.
    pub fn weighted_entry(&self, add_qty: Decimal, add_price: Decimal) -> Decimal {
        let total = self.quantity + add_qty;
        if total <= Decimal::ZERO {
            return self.entry_price;
        }
        (self.entry_price * self.quantity + add_price * add_qty) / total
    }

    pub fn held_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.opened_at).num_seconds() as f64 / 3600.0
    }
}

/// Insert form of a trade record, before an id is assigned.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub leverage: u32,
    pub stop_loss: Decimal,
    pub take_profit_1: Decimal,
    pub take_profit_2: Option<Decimal>,
    pub take_profit_3: Option<Decimal>,
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(OrderStatus::New),
            "PARTIALLY_FILLED" => Some(OrderStatus::PartiallyFilled),
            "FILLED" => Some(OrderStatus::Filled),
            "CANCELED" => Some(OrderStatus::Canceled),
            "REJECTED" => Some(OrderStatus::Rejected),
            "EXPIRED" | "EXPIRED_IN_MATCH" => Some(OrderStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }
}

/// Parameters for a new order, covering every order type the bot submits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderParams {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub reduce_only: bool,
    pub close_position: bool,
    pub working_type: Option<WorkingType>,
    pub callback_rate: Option<f64>,
    pub new_client_order_id: Option<String>,
}

impl OrderParams {
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity: Some(quantity),
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: false,
            close_position: false,
            working_type: None,
            callback_rate: None,
            new_client_order_id: None,
        }
    }

    pub fn limit(
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        tif: TimeInForce,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity: Some(quantity),
            price: Some(price),
            stop_price: None,
            time_in_force: Some(tif),
            reduce_only: false,
            close_position: false,
            working_type: None,
            callback_rate: None,
            new_client_order_id: None,
        }
    }

    pub fn stop_market(
        symbol: &str,
        side: OrderSide,
        stop_price: Decimal,
        working_type: WorkingType,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::StopMarket,
            quantity: None,
            price: None,
            stop_price: Some(stop_price),
            time_in_force: None,
            reduce_only: true,
            close_position: true,
            working_type: Some(working_type),
            callback_rate: None,
            new_client_order_id: None,
        }
    }

    pub fn trailing_stop(
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        callback_rate: f64,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::TrailingStopMarket,
            quantity: Some(quantity),
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: true,
            close_position: false,
            working_type: None,
            callback_rate: Some(callback_rate),
            new_client_order_id: None,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

/// Acknowledgement returned by the venue when an order is created or queried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: i64,
    pub client_order_id: String,
    pub symbol: String,
    pub status: OrderStatus,
    pub avg_price: Decimal,
    pub executed_qty: Decimal,
    pub cum_quote: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTrade {
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    pub maker: bool,
    pub time: i64,
}

/// Scanner output for one symbol, with klines pre-fetched.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub symbol: String,
    pub klines_1h: Vec<Kline>,
    pub klines_4h: Vec<Kline>,
    pub price_change_pct: f64,
    pub volatility: f64,
    pub movement_score: f64,
}

#[derive(Debug, Clone)]
pub struct SniperCandidate {
    pub symbol: String,
    pub price_change_pct: f64,
    pub quote_volume: Decimal,
    pub rank_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn info(step: Decimal, tick: Decimal) -> SymbolInfo {
        SymbolInfo {
            symbol: "BTCUSDT".into(),
            status: "TRADING".into(),
            contract_type: "PERPETUAL".into(),
            quote_asset: "USDT".into(),
            tick_size: tick,
            step_size: step,
            min_qty: dec!(0.001),
            max_qty: dec!(1000),
            min_notional: dec!(5),
            quantity_precision: 3,
            price_precision: 2,
        }
    }

    #[test]
    fn test_round_qty_down_to_step() {
        let i = info(dec!(0.001), dec!(0.01));
        assert_eq!(i.round_qty_down(dec!(0.12345)), dec!(0.123));
        assert_eq!(i.round_qty_down(dec!(0.0009)), dec!(0));
    }

    #[test]
    fn test_spread_pct() {
        let top = OrderBookTop {
            bid: dec!(100),
            ask: dec!(100.5),
        };
        let spread = top.spread_pct();
        assert!((spread - 0.4975).abs() < 1e-4);
    }

    #[test]
    fn test_bracket_max_leverage_lookup() {
        let brackets = vec![
            LeverageBracket {
                notional_floor: dec!(0),
                notional_cap: dec!(50000),
                max_initial_leverage: 20,
            },
            LeverageBracket {
                notional_floor: dec!(50000),
                notional_cap: dec!(250000),
                max_initial_leverage: 10,
            },
        ];
        assert_eq!(bracket_max_leverage(&brackets, dec!(1000)), Some(20));
        assert_eq!(bracket_max_leverage(&brackets, dec!(60000)), Some(10));
        assert_eq!(bracket_max_leverage(&brackets, dec!(999999)), Some(10));
    }

    #[test]
    fn test_weighted_entry_after_dca() {
        let trade = Trade {
            id: 1,
            symbol: "ETHUSDT".into(),
            direction: Direction::Long,
            entry_price: dec!(100),
            current_price: dec!(97.5),
            quantity: dec!(10),
            leverage: 10,
            stop_loss: dec!(95),
            take_profit_1: dec!(105),
            take_profit_2: None,
            take_profit_3: None,
            status: TradeStatus::Open,
            pnl: Decimal::ZERO,
            pnl_percentage: -2.5,
            opened_at: Utc::now(),
            closed_at: None,
            order_id: None,
            exit_price: None,
            exit_time: None,
            max_pnl_percentage: 0.0,
            trailing_peak_price: None,
            pyramided: false,
            partial_taken: false,
            dca_count: 0,
        };
        assert_eq!(trade.weighted_entry(dec!(15), dec!(97.5)), dec!(98.5));
    }

    #[test]
    fn test_direction_from_position_amt() {
        assert_eq!(Direction::from_position_amt(dec!(0.5)), Some(Direction::Long));
        assert_eq!(Direction::from_position_amt(dec!(-0.5)), Some(Direction::Short));
        assert_eq!(Direction::from_position_amt(dec!(0)), None);
    }
}
