//! DCA, pyramiding and time-exit loop behavior against the mock venue.

mod common;

use common::{harness, kline};
use perpbot::application::loops::{DcaLoop, PyramidingLoop, TimeExitLoop};
use perpbot::application::monitor::PositionMonitor;
use perpbot::application::supervisor::HeartbeatRegistry;
use perpbot::domain::ports::KvCache;
use perpbot::domain::types::{Direction, Interval, NewTrade, TradeStatus};
use perpbot::infrastructure::cache::keys;
use perpbot::infrastructure::mock::{MockExchange, mock_position};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

async fn open_long(
    h: &common::Harness,
    symbol: &str,
    entry: Decimal,
    qty: Decimal,
    pnl_pct: f64,
) -> i64 {
    h.exchange
        .set_symbol_info(MockExchange::default_symbol_info(symbol))
        .await;
    let id = h
        .trades
        .insert(&NewTrade {
            symbol: symbol.to_string(),
            direction: Direction::Long,
            entry_price: entry,
            quantity: qty,
            leverage: 10,
            stop_loss: entry * dec!(0.95),
            take_profit_1: entry * dec!(1.05),
            take_profit_2: None,
            take_profit_3: None,
            order_id: None,
        })
        .await
        .unwrap();
    // The monitor normally keeps pnl_percentage current; tests set it directly.
    let mut trade = h.trades.get(id).await.unwrap().unwrap();
    trade.pnl_percentage = pnl_pct;
    h.trades.update(&trade).await.unwrap();
    id
}

/// S6: -2.5% with oversold hourly RSI triggers a 1.5x add and blends the
/// entry to the size-weighted average.
#[tokio::test]
async fn test_dca_trigger_blends_entry() {
    let h = harness().await;
    let dca = DcaLoop::new(
        h.exchange.clone(),
        h.trades.clone(),
        h.cache.clone(),
        h.notifier.clone(),
        h.config.clone(),
        Arc::new(HeartbeatRegistry::new()),
    );

    let id = open_long(&h, "ETHUSDT", dec!(100), dec!(10), -2.5).await;
    h.exchange.set_price("ETHUSDT", dec!(97.5)).await;
    // Steadily falling closes push RSI deep below 35.
    let klines = (0..50)
        .map(|i| {
            let price = 110.0 - i as f64 * 0.25;
            kline(price, price + 0.1, price - 0.3, price - 0.25, 1000.0)
        })
        .collect();
    h.exchange.set_klines("ETHUSDT", Interval::H1, klines).await;

    dca.tick().await.unwrap();

    let trade = h.trades.get(id).await.unwrap().unwrap();
    assert_eq!(trade.quantity, dec!(25), "10 + 1.5x add of 15");
    assert_eq!(trade.entry_price, dec!(98.5), "(100*10 + 97.5*15) / 25");
    assert_eq!(trade.dca_count, 1);
    assert_eq!(
        h.cache.get_raw("dca_count:ETHUSDT").await.as_deref(),
        Some("1"),
        "persisted DCA counter"
    );
}

#[tokio::test]
async fn test_dca_respects_max_count_and_rsi() {
    let h = harness().await;
    let dca = DcaLoop::new(
        h.exchange.clone(),
        h.trades.clone(),
        h.cache.clone(),
        h.notifier.clone(),
        h.config.clone(),
        Arc::new(HeartbeatRegistry::new()),
    );

    // Counter at the cap: no add even though the loss qualifies. The gate
    // reads the TTL counter, so the budget returns when the entry expires.
    let id = open_long(&h, "ETHUSDT", dec!(100), dec!(10), -5.0).await;
    let max = h.config.snapshot().monitor.max_dca_count;
    h.cache
        .set_raw(
            &keys::dca_count("ETHUSDT"),
            max.to_string(),
            Duration::from_secs(3600),
        )
        .await;
    h.exchange.set_price("ETHUSDT", dec!(95)).await;

    dca.tick().await.unwrap();
    assert_eq!(h.trades.get(id).await.unwrap().unwrap().quantity, dec!(10));

    // RSI neutral (flat series): no add either.
    let id2 = open_long(&h, "SOLUSDT", dec!(100), dec!(10), -3.0).await;
    h.exchange.set_price("SOLUSDT", dec!(97)).await;
    let flat = (0..50)
        .map(|i| kline(100.0 + (i % 2) as f64 * 0.2, 100.5, 99.5, 100.0, 1000.0))
        .collect();
    h.exchange.set_klines("SOLUSDT", Interval::H1, flat).await;

    dca.tick().await.unwrap();
    assert_eq!(h.trades.get(id2).await.unwrap().unwrap().quantity, dec!(10));
}

#[tokio::test]
async fn test_pyramiding_adds_once_and_tightens_stop() {
    let h = harness().await;
    let pyramiding = PyramidingLoop::new(
        h.exchange.clone(),
        h.trades.clone(),
        h.notifier.clone(),
        h.config.clone(),
        Arc::new(HeartbeatRegistry::new()),
    );

    let id = open_long(&h, "LINKUSDT", dec!(100), dec!(10), 6.0).await;
    h.exchange.set_price("LINKUSDT", dec!(106)).await;

    pyramiding.tick().await.unwrap();

    let trade = h.trades.get(id).await.unwrap().unwrap();
    assert!(trade.pyramided);
    assert_eq!(trade.quantity, dec!(15), "0.5x add on a winner");
    assert_eq!(trade.entry_price, dec!(102), "(100*10 + 106*5) / 15");
    assert!(
        trade.stop_loss >= trade.entry_price,
        "stop at breakeven-or-better, got {}",
        trade.stop_loss
    );

    // Second pass is a no-op: pyramided is latched.
    pyramiding.tick().await.unwrap();
    assert_eq!(h.trades.get(id).await.unwrap().unwrap().quantity, dec!(15));
}

#[tokio::test]
async fn test_time_exit_closes_stagnant_trades() {
    let h = harness().await;
    let monitor = Arc::new(PositionMonitor::new(
        h.exchange.clone(),
        h.trades.clone(),
        h.risk_manager.clone(),
        h.blacklist.clone(),
        h.notifier.clone(),
        h.config.clone(),
        h.events.clone(),
        Arc::new(HeartbeatRegistry::new()),
    ));
    let time_exit = TimeExitLoop::new(
        h.trades.clone(),
        monitor,
        h.config.clone(),
        Arc::new(HeartbeatRegistry::new()),
    );

    h.exchange.set_balance(dec!(1000), dec!(1000)).await;
    let id = open_long(&h, "ATOMUSDT", dec!(100), dec!(10), 0.1).await;
    h.exchange.set_price("ATOMUSDT", dec!(100.1)).await;
    h.exchange
        .set_position(mock_position("ATOMUSDT", Direction::Long, dec!(10), dec!(100)))
        .await;

    // Backdate the open to five hours ago (limit is four).
    let mut trade = h.trades.get(id).await.unwrap().unwrap();
    trade.opened_at = chrono::Utc::now() - chrono::Duration::hours(5);
    trade.current_price = dec!(100.1);
    h.trades.update(&trade).await.unwrap();

    time_exit.tick().await.unwrap();

    let trade = h.trades.get(id).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Closed);

    // A fresh profitable trade stays open.
    let id2 = open_long(&h, "NEARUSDT", dec!(100), dec!(10), 2.0).await;
    h.exchange.set_price("NEARUSDT", dec!(102)).await;
    time_exit.tick().await.unwrap();
    assert_eq!(
        h.trades.get(id2).await.unwrap().unwrap().status,
        TradeStatus::Open
    );
}
