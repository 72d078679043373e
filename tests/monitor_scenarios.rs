//! Position-monitor scenarios: kill switch, trailing stop, partial take with
//! breakeven, max-loss blacklisting and exchange-store reconciliation.

mod common;

use common::{harness, kline, signal, test_config};
use perpbot::application::events::BotEvent;
use perpbot::application::monitor::PositionMonitor;
use perpbot::application::supervisor::HeartbeatRegistry;
use perpbot::domain::errors::RiskRejection;
use perpbot::domain::types::{Direction, Interval, NewTrade, OrderType, TradeStatus};
use perpbot::infrastructure::mock::{MockExchange, mock_position};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

struct MonitorHarness {
    h: common::Harness,
    monitor: Arc<PositionMonitor>,
}

async fn monitor_harness() -> MonitorHarness {
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
    MonitorHarness { h, monitor }
}

async fn open_trade(
    m: &MonitorHarness,
    symbol: &str,
    entry: Decimal,
    qty: Decimal,
) -> i64 {
    let id = m
        .h
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
    m.h.exchange
        .set_symbol_info(MockExchange::default_symbol_info(symbol))
        .await;
    id
}

/// S3: balance dropping 15% from the monitor's baseline halts everything.
#[tokio::test]
async fn test_kill_switch_halts_monitor_and_admissions() {
    let m = monitor_harness().await;
    let mut events = m.h.events.subscribe();

    m.h.exchange.set_balance(dec!(1000), dec!(1000)).await;
    m.monitor.tick().await.unwrap(); // baseline snapshot
    assert!(!m.monitor.is_halted());

    m.h.exchange.set_balance(dec!(849), dec!(849)).await;
    m.monitor.tick().await.unwrap();
    assert!(m.monitor.is_halted());

    // Kill switch event was published.
    let mut fired = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, BotEvent::KillSwitchFired { .. }) {
            fired = true;
        }
    }
    assert!(fired, "kill switch event expected");

    // No new admissions while halted.
    let s = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);
    let result = m
        .h
        .risk_manager
        .validate_trade(&s, dec!(849), 0, false)
        .await;
    assert!(matches!(result, Err(RiskRejection::KillSwitch)));
}

/// S4: profit peaks at 10%, retraces to 7%; the adaptive threshold closes
/// the trade with reason "Trailing Stop".
#[tokio::test]
async fn test_trailing_stop_fires_on_retracement() {
    let m = monitor_harness().await;
    let mut events = m.h.events.subscribe();
    m.h.exchange.set_balance(dec!(1000), dec!(1000)).await;

    let id = open_trade(&m, "ETHUSDT", dec!(100), dec!(10)).await;
    // Partial take already happened; this scenario isolates the trailing exit.
    let mut trade = m.h.trades.get(id).await.unwrap().unwrap();
    trade.partial_taken = true;
    m.h.trades.update(&trade).await.unwrap();

    // Peak: +10%.
    let mut position = mock_position("ETHUSDT", Direction::Long, dec!(10), dec!(100));
    position.mark_price = dec!(110);
    position.unrealized_pnl = dec!(100);
    m.h.exchange.set_position(position.clone()).await;
    m.h.exchange.set_price("ETHUSDT", dec!(110)).await;
    m.monitor.tick().await.unwrap();
    let trade = m.h.trades.get(id).await.unwrap().unwrap();
    assert!((trade.max_pnl_percentage - 10.0).abs() < 1e-6);
    assert_eq!(trade.status, TradeStatus::Open);

    // Retrace to +7%: (10-7)/10 = 30% retracement, far above the threshold.
    position.mark_price = dec!(107);
    position.unrealized_pnl = dec!(70);
    m.h.exchange.set_position(position).await;
    m.h.exchange.set_price("ETHUSDT", dec!(107)).await;
    m.monitor.tick().await.unwrap();

    let trade = m.h.trades.get(id).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Closed);
    assert_eq!(trade.exit_price, Some(dec!(107)));
    assert!((trade.pnl_percentage - 7.0).abs() < 1e-6);

    let mut reason = None;
    while let Ok(event) = events.try_recv() {
        if let BotEvent::TradeClosed { reason: r, .. } = event {
            reason = Some(r);
        }
    }
    assert_eq!(reason.as_deref(), Some("Trailing Stop"));
}

/// S5: +5% with mid volatility takes half off and moves the stop to entry.
#[tokio::test]
async fn test_partial_take_half_and_breakeven() {
    let m = monitor_harness().await;
    m.h.exchange.set_balance(dec!(1000), dec!(1000)).await;

    let id = open_trade(&m, "SOLUSDT", dec!(100), dec!(10)).await;
    // 14 hourly bars with a 5% range put the fraction at 0.50.
    let klines = (0..15).map(|_| kline(102.0, 105.0, 100.0, 102.0, 1000.0)).collect();
    m.h.exchange.set_klines("SOLUSDT", Interval::H1, klines).await;

    let mut position = mock_position("SOLUSDT", Direction::Long, dec!(10), dec!(100));
    position.mark_price = dec!(105);
    position.unrealized_pnl = dec!(50);
    m.h.exchange.set_position(position).await;
    m.h.exchange.set_price("SOLUSDT", dec!(105)).await;

    m.monitor.tick().await.unwrap();

    let trade = m.h.trades.get(id).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Open);
    assert!(trade.partial_taken);
    assert_eq!(trade.quantity, dec!(5));
    assert_eq!(trade.stop_loss, dec!(100), "stop at breakeven");

    let partials: Vec<_> = m
        .h
        .exchange
        .submitted_orders()
        .await
        .into_iter()
        .filter(|o| o.params.order_type == OrderType::Market && o.params.reduce_only)
        .collect();
    assert_eq!(partials.len(), 1);
    assert_eq!(partials[0].params.quantity, Some(dec!(5)));
}

#[tokio::test]
async fn test_max_loss_closes_and_blacklists() {
    let m = monitor_harness().await;
    m.h.exchange.set_balance(dec!(1000), dec!(1000)).await;

    let id = open_trade(&m, "DOGEUSDT", dec!(100), dec!(10)).await;
    let mut position = mock_position("DOGEUSDT", Direction::Long, dec!(10), dec!(100));
    position.mark_price = dec!(91);
    position.unrealized_pnl = dec!(-90); // -9%, through the -8% max loss
    m.h.exchange.set_position(position).await;
    m.h.exchange.set_price("DOGEUSDT", dec!(91)).await;

    m.monitor.tick().await.unwrap();

    let trade = m.h.trades.get(id).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Closed);
    assert!(m.h.blacklist.is_blacklisted("DOGEUSDT"));
    assert!(trade.pnl < Decimal::ZERO);
}

#[tokio::test]
async fn test_emergency_stop_precedes_max_loss() {
    let m = monitor_harness().await;
    let mut events = m.h.events.subscribe();
    m.h.exchange.set_balance(dec!(1000), dec!(1000)).await;

    let id = open_trade(&m, "AVAXUSDT", dec!(100), dec!(10)).await;
    let mut position = mock_position("AVAXUSDT", Direction::Long, dec!(10), dec!(100));
    position.mark_price = dec!(84);
    position.unrealized_pnl = dec!(-160); // -16%, beyond the emergency stop
    m.h.exchange.set_position(position).await;
    m.h.exchange.set_price("AVAXUSDT", dec!(84)).await;

    m.monitor.tick().await.unwrap();

    assert_eq!(
        m.h.trades.get(id).await.unwrap().unwrap().status,
        TradeStatus::Closed
    );
    let mut reason = None;
    while let Ok(event) = events.try_recv() {
        if let BotEvent::TradeClosed { reason: r, .. } = event {
            reason = Some(r);
        }
    }
    assert_eq!(reason.as_deref(), Some("Emergency Stop"));
}

/// Invariant healing both ways: untracked venue positions become trades,
/// trades without venue positions get closed.
#[tokio::test]
async fn test_reconciliation_heals_both_directions() {
    let m = monitor_harness().await;
    m.h.exchange.set_balance(dec!(1000), dec!(1000)).await;

    // Venue has a position the store does not know about.
    m.h.exchange
        .set_symbol_info(MockExchange::default_symbol_info("INJUSDT"))
        .await;
    m.h.exchange
        .set_position(mock_position("INJUSDT", Direction::Short, dec!(5), dec!(20)))
        .await;
    m.h.exchange.set_price("INJUSDT", dec!(20)).await;

    // Store has an open trade the venue does not.
    let orphan_id = open_trade(&m, "LTCUSDT", dec!(100), dec!(2)).await;

    m.monitor.tick().await.unwrap();

    let reconstructed = m
        .h
        .trades
        .open_trade_for_symbol("INJUSDT")
        .await
        .unwrap()
        .expect("venue position reconstructed");
    assert_eq!(reconstructed.direction, Direction::Short);
    assert_eq!(reconstructed.quantity, dec!(5));

    let orphan = m.h.trades.get(orphan_id).await.unwrap().unwrap();
    assert_eq!(orphan.status, TradeStatus::Closed);
}

/// Funding-aware exit (opt-in): profitable position, adverse funding inside
/// the window, closes with reason "Funding Exit".
#[tokio::test]
async fn test_funding_exit_when_enabled() {
    let mut config = test_config();
    config.monitor.enable_funding_exits = true;
    let h = common::harness_with(config).await;
    let m = MonitorHarness {
        monitor: Arc::new(PositionMonitor::new(
            h.exchange.clone(),
            h.trades.clone(),
            h.risk_manager.clone(),
            h.blacklist.clone(),
            h.notifier.clone(),
            h.config.clone(),
            h.events.clone(),
            Arc::new(HeartbeatRegistry::new()),
        )),
        h,
    };
    let mut events = m.h.events.subscribe();
    m.h.exchange.set_balance(dec!(1000), dec!(1000)).await;

    let id = open_trade(&m, "APTUSDT", dec!(100), dec!(10)).await;
    let mut position = mock_position("APTUSDT", Direction::Long, dec!(10), dec!(100));
    position.mark_price = dec!(102);
    position.unrealized_pnl = dec!(20); // +2%, above the 0.5% exit floor
    m.h.exchange.set_position(position).await;
    m.h.exchange.set_price("APTUSDT", dec!(102)).await;
    m.h.exchange.premium.write().await.insert(
        "APTUSDT".into(),
        perpbot::domain::types::PremiumIndex {
            symbol: "APTUSDT".into(),
            mark_price: dec!(102),
            index_price: dec!(102),
            last_funding_rate: 0.001, // longs pay heavily
            next_funding_time: chrono::Utc::now().timestamp_millis() + 10 * 60_000,
        },
    );

    m.monitor.tick().await.unwrap();

    assert_eq!(
        m.h.trades.get(id).await.unwrap().unwrap().status,
        TradeStatus::Closed
    );
    let mut reason = None;
    while let Ok(event) = events.try_recv() {
        if let BotEvent::TradeClosed { reason: r, .. } = event {
            reason = Some(r);
        }
    }
    assert_eq!(reason.as_deref(), Some("Funding Exit"));
}
