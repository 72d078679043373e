//! Shared fixtures for integration tests: a tuned config, the in-memory
//! exchange and a fresh SQLite store per test.

use perpbot::application::events::EventBus;
use perpbot::application::execution::{ExecutionMetrics, OrderExecutor};
use perpbot::application::monitor::Blacklist;
use perpbot::application::risk::{RiskManager, TradingCircuitBreaker};
use perpbot::config::{Config, ConfigHandle};
use perpbot::domain::ports::{KvCache, Notifier, TradeRepository};
use perpbot::domain::types::{Direction, Kline, Signal, SignalEnrichment};
use perpbot::infrastructure::cache::MemoryCache;
use perpbot::infrastructure::mock::MockExchange;
use perpbot::infrastructure::persistence::{Database, SqliteTradeStore};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub exchange: Arc<MockExchange>,
    pub trades: Arc<dyn TradeRepository>,
    pub cache: Arc<dyn KvCache>,
    pub config: ConfigHandle,
    pub breaker: Arc<TradingCircuitBreaker>,
    pub blacklist: Arc<Blacklist>,
    pub risk_manager: Arc<RiskManager>,
    pub executor: Arc<OrderExecutor>,
    pub events: EventBus,
    pub notifier: Arc<dyn Notifier>,
}

pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _message: String) {}
}

/// Live-trading config with deterministic knobs for tests.
pub fn test_config() -> Config {
    let mut config = Config::from_env().expect("default config parses");
    config.execution.dry_run = false;
    config.execution.virtual_balance = 0.0;
    config.execution.order_timeout_sec = 1;
    config.risk.circuit_breaker_cooldown_secs = 1;
    config
}

pub async fn harness_with(config: Config) -> Harness {
    let exchange = Arc::new(MockExchange::new());
    let db = Database::in_memory().await.expect("in-memory db");
    let trades: Arc<dyn TradeRepository> = Arc::new(SqliteTradeStore::new(db));
    let cache: Arc<dyn KvCache> = Arc::new(MemoryCache::new());
    let config = ConfigHandle::new(config);
    let snapshot = config.snapshot();

    let breaker = Arc::new(TradingCircuitBreaker::new(
        snapshot.risk.consecutive_loss_limit as u32,
        Duration::from_secs(snapshot.risk.circuit_breaker_cooldown_secs),
    ));
    let blacklist = Arc::new(Blacklist::new());
    let risk_manager = Arc::new(RiskManager::new(
        cache.clone(),
        config.clone(),
        breaker.clone(),
        blacklist.clone(),
    ));
    let events = EventBus::default();
    let notifier: Arc<dyn Notifier> = Arc::new(SilentNotifier);
    let executor = Arc::new(OrderExecutor::new(
        exchange.clone(),
        trades.clone(),
        risk_manager.clone(),
        notifier.clone(),
        config.clone(),
        Arc::new(ExecutionMetrics::new()),
        events.clone(),
    ));

    Harness {
        exchange,
        trades,
        cache,
        config,
        breaker,
        blacklist,
        risk_manager,
        executor,
        events,
        notifier,
    }
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

pub fn signal(symbol: &str, direction: Direction, entry: f64, stop: f64, score: u32) -> Signal {
    let entry_dec = Decimal::from_f64(entry).unwrap();
    let stop_dec = Decimal::from_f64(stop).unwrap();
    let risk = (entry - stop).abs() / entry;
    Signal {
        symbol: symbol.to_string(),
        direction,
        entry_price: entry_dec,
        stop_loss: stop_dec,
        take_profit_1: Decimal::from_f64(entry * (1.0 + risk * 2.0)).unwrap(),
        take_profit_2: Some(Decimal::from_f64(entry * (1.0 + risk * 3.0)).unwrap()),
        take_profit_3: Some(Decimal::from_f64(entry * (1.0 + risk * 4.0)).unwrap()),
        leverage: 10,
        score,
        risk_pct: 2.5,
        force: false,
        sniper: false,
        enrichment: SignalEnrichment {
            atr: entry * 0.01,
            ..Default::default()
        },
    }
}

pub fn kline(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Kline {
    Kline {
        open_time: 0,
        open: Decimal::from_f64(open).unwrap(),
        high: Decimal::from_f64(high).unwrap(),
        low: Decimal::from_f64(low).unwrap(),
        close: Decimal::from_f64(close).unwrap(),
        volume: Decimal::from_f64(volume).unwrap(),
        quote_volume: Decimal::from_f64(volume * close).unwrap(),
        trades: 100,
    }
}
