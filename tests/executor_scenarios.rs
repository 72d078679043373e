//! Executor pipeline scenarios against the in-memory exchange: the happy
//! path with protections, the spread gate, leverage bracket capping and
//! iceberg chunking.

mod common;

use common::{harness, harness_with, signal, test_config};
use perpbot::domain::errors::ExecutionError;
use perpbot::domain::types::{
    Direction, LeverageBracket, OrderSide, OrderType, TimeInForce, TradeStatus,
};
use perpbot::infrastructure::mock::MockExchange;
use rust_decimal_macros::dec;

async fn prepare_symbol(h: &common::Harness, symbol: &str, price: f64) {
    h.exchange
        .set_symbol_info(MockExchange::default_symbol_info(symbol))
        .await;
    h.exchange
        .set_price(symbol, rust_decimal::Decimal::try_from(price).unwrap())
        .await;
    h.exchange.set_balance(dec!(1000), dec!(1000)).await;
}

/// S1: happy-path LONG. Filled entry, trade persisted, SL as STOP_MARKET
/// and a 50/30/20 TP ladder of reduce-only LIMITs.
#[tokio::test]
async fn test_happy_path_long() {
    let h = harness().await;
    prepare_symbol(&h, "BTCUSDT", 100.0).await;
    let s = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);

    let outcome = h
        .executor
        .execute_signal(&s, dec!(1000), 0, false)
        .await
        .expect("execution succeeds");

    // 30% margin x10 leverage at 100 = 30 units.
    assert_eq!(outcome.quantity, dec!(30));
    let trade_id = outcome.trade_id.expect("trade persisted");
    let trade = h.trades.get(trade_id).await.unwrap().unwrap();
    assert_eq!(trade.direction, Direction::Long);
    assert_eq!(trade.status, TradeStatus::Open);
    assert_eq!(trade.stop_loss, dec!(95));
    // Entry within the slippage allowance of the limit buffer.
    assert!((trade.entry_price - dec!(100)).abs() / dec!(100) < dec!(0.002));

    let orders = h.exchange.submitted_orders().await;
    let stops: Vec<_> = orders
        .iter()
        .filter(|o| o.params.order_type == OrderType::StopMarket)
        .collect();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].params.side, OrderSide::Sell);
    assert_eq!(stops[0].params.stop_price, Some(dec!(95)));

    let tps: Vec<_> = orders
        .iter()
        .filter(|o| o.params.order_type == OrderType::Limit && o.params.reduce_only)
        .collect();
    assert_eq!(tps.len(), 3, "three-part TP ladder");
    let qtys: Vec<_> = tps.iter().map(|o| o.params.quantity.unwrap()).collect();
    assert_eq!(qtys, vec![dec!(15), dec!(9), dec!(6)], "50/30/20 split");
    assert!(tps.iter().all(|o| o.params.time_in_force == Some(TimeInForce::Gtc)));

    // Leverage applied before entry.
    let levs = h.exchange.leverage_changes.lock().await.clone();
    assert_eq!(levs, vec![("BTCUSDT".to_string(), 10)]);
}

/// S7: spread above the core limit blocks with the literal reason string.
#[tokio::test]
async fn test_spread_block_reason() {
    let h = harness().await;
    prepare_symbol(&h, "BTCUSDT", 100.0).await;
    h.exchange.set_book("BTCUSDT", dec!(100), dec!(100.5)).await;

    let s = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);
    let err = h
        .executor
        .execute_signal(&s, dec!(1000), 0, false)
        .await
        .expect_err("spread must block");
    assert_eq!(err.to_string(), "Spread alto: 0.498% > 0.2%");
    assert!(h.exchange.submitted_orders().await.is_empty());
}

#[tokio::test]
async fn test_bracket_caps_leverage_and_resizes() {
    let h = harness().await;
    prepare_symbol(&h, "ETHUSDT", 100.0).await;
    h.exchange.brackets.write().await.insert(
        "ETHUSDT".into(),
        vec![LeverageBracket {
            notional_floor: dec!(0),
            notional_cap: dec!(10000000),
            max_initial_leverage: 5,
        }],
    );

    let s = signal("ETHUSDT", Direction::Long, 100.0, 95.0, 80);
    let outcome = h
        .executor
        .execute_signal(&s, dec!(1000), 0, false)
        .await
        .expect("execution succeeds at capped leverage");

    // Margin 300 at 5x / 100 = 15 units instead of 30.
    assert_eq!(outcome.quantity, dec!(15));
    let levs = h.exchange.leverage_changes.lock().await.clone();
    assert_eq!(levs.last().unwrap().1, 5);

    // The signal asked for 10x, at the forced-ISOLATED floor: the margin
    // mode follows the request even though the bracket granted only 5x.
    let margins = h.exchange.margin_changes.lock().await.clone();
    assert_eq!(margins.last(), Some(&("ETHUSDT".to_string(), true)));
}

#[tokio::test(start_paused = true)]
async fn test_iceberg_splits_large_notional() {
    let mut config = test_config();
    config.execution.iceberg_threshold = 1000.0;
    config.execution.iceberg_chunk_size = 1000.0;
    let h = harness_with(config).await;
    prepare_symbol(&h, "BTCUSDT", 100.0).await;

    let s = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);
    let outcome = h
        .executor
        .execute_signal(&s, dec!(1000), 0, false)
        .await
        .expect("iceberg execution succeeds");

    // 30 units notional 3000 split into 10-unit chunks.
    assert_eq!(outcome.quantity, dec!(30));
    assert_eq!(outcome.order_ids.len(), 3);
    let entry_limits: Vec<_> = h
        .exchange
        .submitted_orders()
        .await
        .into_iter()
        .filter(|o| o.params.order_type == OrderType::Limit && !o.params.reduce_only)
        .collect();
    assert_eq!(entry_limits.len(), 3);
    assert!(entry_limits.iter().all(|o| o.params.quantity == Some(dec!(10))));
}

#[tokio::test(start_paused = true)]
async fn test_market_fallback_after_unfilled_limits() {
    let h = harness().await;
    prepare_symbol(&h, "BTCUSDT", 100.0).await;
    // Limit orders rest unfilled; only the market fallback executes.
    h.exchange
        .fill_limit_orders
        .store(false, std::sync::atomic::Ordering::Relaxed);

    let s = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);
    let outcome = h
        .executor
        .execute_signal(&s, dec!(1000), 0, false)
        .await
        .expect("market fallback succeeds");

    assert!(!outcome.maker);
    let orders = h.exchange.submitted_orders().await;
    let limit_attempts = orders
        .iter()
        .filter(|o| o.params.order_type == OrderType::Limit && !o.params.reduce_only)
        .count();
    let markets = orders
        .iter()
        .filter(|o| o.params.order_type == OrderType::Market && !o.params.reduce_only)
        .count();
    assert_eq!(limit_attempts, 5, "all re-quote attempts exhausted");
    assert_eq!(markets, 1, "single market fallback");
}

/// P6: with the liquidation price hugging the entry, the executor issues up
/// to three reduce-only trims before accepting the position.
#[tokio::test]
async fn test_headroom_trim_reduces_position() {
    let h = harness().await;
    prepare_symbol(&h, "BTCUSDT", 100.0).await;
    // Pre-seed the venue position with a liquidation price 1% away, so every
    // headroom check fails. The entry fill lands on top of this record.
    let mut tight = perpbot::infrastructure::mock::mock_position(
        "BTCUSDT",
        Direction::Long,
        dec!(0),
        dec!(100),
    );
    tight.position_amt = dec!(0);
    tight.liquidation_price = dec!(99);
    h.exchange.set_position(tight).await;

    let s = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);
    let outcome = h
        .executor
        .execute_signal(&s, dec!(1000), 0, false)
        .await
        .expect("execution succeeds with trims");

    let trims: Vec<_> = h
        .exchange
        .submitted_orders()
        .await
        .into_iter()
        .filter(|o| o.params.order_type == OrderType::Market && o.params.reduce_only)
        .collect();
    assert_eq!(trims.len(), 3, "three trim attempts");
    assert!(outcome.quantity < dec!(30), "final quantity reduced");
    let trade = h.trades.get(outcome.trade_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(trade.quantity, outcome.quantity);
}

#[tokio::test]
async fn test_force_signal_bypasses_risk_when_configured() {
    let h = harness().await;
    prepare_symbol(&h, "BTCUSDT", 100.0).await;
    // Trip the breaker: a normal signal would be rejected.
    for _ in 0..3 {
        h.breaker.record_loss();
    }

    let mut s = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);
    let err = h.executor.execute_signal(&s, dec!(1000), 0, false).await;
    assert!(matches!(err, Err(ExecutionError::Risk(_))));

    s.force = true;
    let outcome = h.executor.execute_signal(&s, dec!(1000), 0, false).await;
    assert!(outcome.is_ok(), "forced signal bypasses admission: {outcome:?}");
}

#[tokio::test]
async fn test_dry_run_submits_nothing() {
    let mut config = test_config();
    config.execution.dry_run = true;
    let h = harness_with(config).await;
    prepare_symbol(&h, "BTCUSDT", 100.0).await;

    let s = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);
    let outcome = h
        .executor
        .execute_signal(&s, dec!(1000), 0, false)
        .await
        .expect("dry run returns an outcome");
    assert!(outcome.trade_id.is_none());
    assert!(h.exchange.submitted_orders().await.is_empty());
}
