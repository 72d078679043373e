//! Admission laws: capacity and portfolio caps under concurrency, daily and
//! intraday hard stops, circuit breaker and blacklist honouring.

mod common;

use common::{harness, harness_with, signal, test_config};
use perpbot::domain::errors::RiskRejection;
use perpbot::domain::types::Direction;
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test]
async fn test_capacity_cap_core_positions() {
    let h = harness().await;
    let max = h.config.snapshot().risk.max_positions;

    let s = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);
    let result = h.risk_manager.validate_trade(&s, dec!(1000), max, false).await;
    assert!(matches!(result, Err(RiskRejection::MaxPositions { .. })));

    // One slot below the cap admits.
    let result = h
        .risk_manager
        .validate_trade(&s, dec!(1000), max - 1, false)
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_sniper_lane_gets_extra_slots() {
    let mut config = test_config();
    config.sniper.extra_slots = 2;
    let h = harness_with(config).await;
    let max = h.config.snapshot().risk.max_positions;

    let mut s = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);
    s.sniper = true;
    s.risk_pct = 1.0;
    // Core lane is full but the sniper lane still admits.
    let result = h.risk_manager.validate_trade(&s, dec!(1000), max, false).await;
    assert!(result.is_ok(), "sniper slot should admit: {result:?}");
}

/// S2: portfolio projection exceeds the cap; the rejection reason names the
/// portfolio.
#[tokio::test]
async fn test_portfolio_cap_rejection_reason() {
    let mut config = test_config();
    config.risk.risk_per_trade = 0.025;
    config.risk.max_portfolio_risk = 0.10;
    let h = harness_with(config).await;

    // Volatility factor 1.2 lifts the per-trade ceiling to exactly 3%.
    h.risk_manager.set_volatility_factor(1.2);
    let mut s = signal("SOLUSDT", Direction::Long, 100.0, 95.0, 80);
    s.risk_pct = 3.0;

    let result = h.risk_manager.validate_trade(&s, dec!(1000), 3, false).await;
    match result {
        Err(ref e @ RiskRejection::PortfolioRisk { .. }) => {
            assert!(e.to_string().contains("portfolio"));
        }
        other => panic!("expected portfolio rejection, got {other:?}"),
    }
}

/// P3: concurrent admissions never over-allocate the portfolio budget.
#[tokio::test]
async fn test_concurrent_admissions_respect_portfolio_cap() {
    let mut config = test_config();
    config.risk.risk_per_trade = 0.025;
    config.risk.max_portfolio_risk = 0.10;
    config.risk.max_positions = 100; // capacity must not interfere here
    let h = harness_with(config).await;

    let mut tasks = Vec::new();
    for i in 0..10 {
        let rm = h.risk_manager.clone();
        let s = signal(&format!("SYM{i}USDT"), Direction::Long, 100.0, 95.0, 80);
        tasks.push(tokio::spawn(async move {
            rm.validate_trade(&s, dec!(1000), 0, false).await.is_ok()
        }));
    }

    let mut approved = 0;
    for task in tasks {
        if task.await.unwrap() {
            approved += 1;
        }
    }
    // 0 open positions, 2.5% reserved per approval, 10% cap: exactly 4 fit.
    assert_eq!(approved, 4, "reservations must serialize admissions");
}

/// P2 under concurrency: the orchestrator and the sniper loop each read
/// their own stale open-position snapshot. With one slot left, concurrent
/// admissions racing on that snapshot must not both claim it.
#[tokio::test]
async fn test_concurrent_admissions_respect_capacity_cap() {
    let mut config = test_config();
    config.risk.max_positions = 4;
    config.risk.max_portfolio_risk = 1.0; // capacity is the only gate here
    let h = harness_with(config).await;

    let mut tasks = Vec::new();
    for i in 0..5 {
        let rm = h.risk_manager.clone();
        let s = signal(&format!("SYM{i}USDT"), Direction::Long, 100.0, 95.0, 80);
        // Every caller believes three positions are open and one slot is free.
        tasks.push(tokio::spawn(async move {
            rm.validate_trade(&s, dec!(1000), 3, false).await.is_ok()
        }));
    }

    let mut approved = 0;
    for task in tasks {
        if task.await.unwrap() {
            approved += 1;
        }
    }
    assert_eq!(approved, 1, "only one admission may take the last slot");
}

#[tokio::test]
async fn test_released_admission_frees_budget() {
    let mut config = test_config();
    config.risk.max_portfolio_risk = 0.04;
    let h = harness_with(config).await;

    let a = signal("AUSDT", Direction::Long, 100.0, 95.0, 80);
    let b = signal("BUSDT", Direction::Long, 100.0, 95.0, 80);
    assert!(h.risk_manager.validate_trade(&a, dec!(1000), 0, false).await.is_ok());
    // Budget exhausted while A is in flight.
    assert!(h.risk_manager.validate_trade(&b, dec!(1000), 0, false).await.is_err());

    h.risk_manager.release_admission("AUSDT").await;
    assert!(h.risk_manager.validate_trade(&b, dec!(1000), 0, false).await.is_ok());
}

/// P4: once the daily loss limit is hit, nothing is admitted until the next
/// UTC day.
#[tokio::test]
async fn test_daily_hard_stop() {
    let h = harness().await;
    let s = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);

    // Baseline snapshot at 1000.
    assert!(h.risk_manager.validate_trade(&s, dec!(1000), 0, false).await.is_ok());
    h.risk_manager.release_admission("BTCUSDT").await;

    // 6% down on the day (default limit 5%).
    let result = h.risk_manager.validate_trade(&s, dec!(940), 0, false).await;
    assert!(matches!(result, Err(RiskRejection::DailyLossLimit { .. })));

    // Still blocked after a partial recovery below the limit boundary.
    let result = h.risk_manager.validate_trade(&s, dec!(945), 0, false).await;
    assert!(matches!(result, Err(RiskRejection::DailyLossLimit { .. })));
}

#[tokio::test]
async fn test_intraday_drawdown_hard_stop() {
    let mut config = test_config();
    config.risk.daily_max_loss_pct = 0.50; // keep the daily stop out of the way
    config.risk.intraday_drawdown_hard_stop_pct = 0.25;
    let h = harness_with(config).await;
    let s = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);

    assert!(h.risk_manager.validate_trade(&s, dec!(1000), 0, false).await.is_ok());
    h.risk_manager.release_admission("BTCUSDT").await;

    // 26% off the intraday peak.
    let result = h.risk_manager.validate_trade(&s, dec!(740), 0, false).await;
    assert!(matches!(result, Err(RiskRejection::IntradayDrawdown { .. })));
}

/// Restart mid-day: checkpoints hydrate from the cache, so the baseline is
/// the original morning balance, not the post-loss one.
#[tokio::test]
async fn test_checkpoints_survive_restart_via_cache() {
    let h = harness().await;
    let s = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);
    assert!(h.risk_manager.validate_trade(&s, dec!(1000), 0, false).await.is_ok());
    h.risk_manager.release_admission("BTCUSDT").await;

    // A fresh manager over the same cache sees the same daily baseline.
    let rm2 = perpbot::application::risk::RiskManager::new(
        h.cache.clone(),
        h.config.clone(),
        h.breaker.clone(),
        h.blacklist.clone(),
    );
    let result = rm2.validate_trade(&s, dec!(940), 0, false).await;
    assert!(
        matches!(result, Err(RiskRejection::DailyLossLimit { .. })),
        "hydrated baseline must still block: {result:?}"
    );
}

/// P10: three consecutive losing closes trip the breaker for the cooldown.
#[tokio::test]
async fn test_circuit_breaker_trips_and_recovers() {
    let h = harness().await; // cooldown tuned to 1s in test config
    let s = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);

    for _ in 0..3 {
        h.risk_manager.on_trade_closed(false, dec!(990)).await;
    }
    let result = h.risk_manager.validate_trade(&s, dec!(990), 0, false).await;
    assert!(matches!(result, Err(RiskRejection::CircuitBreaker { .. })));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let result = h.risk_manager.validate_trade(&s, dec!(990), 0, false).await;
    assert!(result.is_ok(), "admissions resume after cooldown: {result:?}");
}

/// P11: a blacklisted symbol is inadmissible until expiry.
#[tokio::test]
async fn test_blacklist_honoured() {
    let h = harness().await;
    h.blacklist.insert("PEPEUSDT", Duration::from_secs(7200));

    let s = signal("PEPEUSDT", Direction::Long, 100.0, 95.0, 80);
    let result = h.risk_manager.validate_trade(&s, dec!(1000), 0, false).await;
    assert!(matches!(result, Err(RiskRejection::Blacklisted { .. })));

    // Other symbols are unaffected.
    let other = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);
    assert!(h.risk_manager.validate_trade(&other, dec!(1000), 0, false).await.is_ok());
}

#[tokio::test]
async fn test_per_trade_risk_ceiling() {
    let h = harness().await;
    let mut s = signal("BTCUSDT", Direction::Long, 100.0, 95.0, 80);
    s.risk_pct = 10.0; // way over the 2.5% budget

    let result = h.risk_manager.validate_trade(&s, dec!(1000), 0, false).await;
    assert!(matches!(result, Err(RiskRejection::PerTradeRisk { .. })));
}
