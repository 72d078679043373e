//! Trade admissibility. Admissions are serialized behind one mutex so
//! concurrent cycles cannot double-count capacity; in-flight approvals are
//! reserved until the executor reports the outcome. Daily and intraday
//! checkpoints are hydrated from the cache so a mid-day restart keeps the
//! same hard-stop baseline.

use crate::application::monitor::blacklist::Blacklist;
use crate::application::risk::calculator::PerformanceState;
use crate::application::risk::circuit_breaker::TradingCircuitBreaker;
use crate::config::ConfigHandle;
use crate::domain::errors::RiskRejection;
use crate::domain::ports::{KvCache, cache_get, cache_set};
use crate::domain::types::Signal;
use crate::infrastructure::cache::keys;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

const CHECKPOINT_TTL: Duration = Duration::from_secs(48 * 3600);

#[derive(Debug, Clone)]
struct DailyRiskState {
    date: NaiveDate,
    daily_start: Decimal,
    intraday_peak: Decimal,
    intraday_trough: Decimal,
    initialized: bool,
    /// Risk fractions of approvals whose orders are still in flight.
    in_flight: HashMap<String, f64>,
}

impl DailyRiskState {
    fn empty() -> Self {
        Self {
            date: NaiveDate::MIN,
            daily_start: Decimal::ZERO,
            intraday_peak: Decimal::ZERO,
            intraday_trough: Decimal::ZERO,
            initialized: false,
            in_flight: HashMap::new(),
        }
    }
}

pub struct RiskManager {
    cache: Arc<dyn KvCache>,
    config: ConfigHandle,
    perf: StdMutex<PerformanceState>,
    breaker: Arc<TradingCircuitBreaker>,
    blacklist: Arc<Blacklist>,
    daily: Mutex<DailyRiskState>,
    /// Market volatility factor in [0.5, 1.5], f64 bits.
    volatility_factor: AtomicU64,
}

impl RiskManager {
    pub fn new(
        cache: Arc<dyn KvCache>,
        config: ConfigHandle,
        breaker: Arc<TradingCircuitBreaker>,
        blacklist: Arc<Blacklist>,
    ) -> Self {
        Self {
            cache,
            config,
            perf: StdMutex::new(PerformanceState::default()),
            breaker,
            blacklist,
            daily: Mutex::new(DailyRiskState::empty()),
            volatility_factor: AtomicU64::new(1.0f64.to_bits()),
        }
    }

    pub fn breaker(&self) -> Arc<TradingCircuitBreaker> {
        self.breaker.clone()
    }

    pub fn set_volatility_factor(&self, factor: f64) {
        let clamped = factor.clamp(0.5, 1.5);
        self.volatility_factor
            .store(clamped.to_bits(), Ordering::Relaxed);
    }

    pub fn volatility_factor(&self) -> f64 {
        f64::from_bits(self.volatility_factor.load(Ordering::Relaxed))
    }

    pub fn performance_snapshot(&self) -> PerformanceState {
        self.perf.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Admit or reject a signal. Serialized: only one admission runs at a
    /// time, and an approval reserves both its slot and its risk fraction
    /// until [`release_admission`](Self::release_admission).
    pub async fn validate_trade(
        &self,
        signal: &Signal,
        balance: Decimal,
        open_positions: usize,
        sniper_open: bool,
    ) -> Result<(), RiskRejection> {
        self.breaker.check()?;

        if self.blacklist.is_blacklisted(&signal.symbol) {
            let remaining = self
                .blacklist
                .remaining(&signal.symbol)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            return Err(RiskRejection::Blacklisted {
                symbol: signal.symbol.clone(),
                remaining_secs: remaining,
            });
        }

        let config = self.config.snapshot();

        // Single-writer section: capacity, checkpoints, hard stops, risk
        // budgets. In-flight reservations count toward capacity so two loops
        // working from the same stale open-position snapshot cannot both
        // claim the last slot.
        let mut daily = self.daily.lock().await;

        let max = if signal.sniper || sniper_open {
            config.risk.max_positions + config.sniper.extra_slots
        } else {
            config.risk.max_positions
        };
        if open_positions + daily.in_flight.len() >= max {
            return Err(RiskRejection::MaxPositions {
                open: open_positions + daily.in_flight.len(),
                max,
            });
        }

        self.rollover_checkpoints(&mut daily, balance).await;
        self.update_extrema(&mut daily, balance).await;

        if daily.daily_start > Decimal::ZERO {
            let loss = ((daily.daily_start - balance) / daily.daily_start)
                .to_f64()
                .unwrap_or(0.0);
            if loss >= config.risk.daily_max_loss_pct {
                return Err(RiskRejection::DailyLossLimit {
                    loss_pct: loss * 100.0,
                    limit_pct: config.risk.daily_max_loss_pct * 100.0,
                });
            }
        }
        if daily.intraday_peak > Decimal::ZERO {
            let drawdown = ((daily.intraday_peak - balance) / daily.intraday_peak)
                .to_f64()
                .unwrap_or(0.0);
            if drawdown >= config.risk.intraday_drawdown_hard_stop_pct {
                return Err(RiskRejection::IntradayDrawdown {
                    drawdown_pct: drawdown * 100.0,
                    limit_pct: config.risk.intraday_drawdown_hard_stop_pct * 100.0,
                });
            }
        }

        // Per-trade budget: base for the lane, streak- and volatility-adjusted.
        let base = if signal.sniper {
            config.sniper.risk_per_trade
        } else {
            config.risk.risk_per_trade
        };
        let perf = self.performance_snapshot();
        let streak_mult = if perf.consecutive_wins >= 3 {
            1.2
        } else if perf.consecutive_losses >= 2 {
            0.8
        } else {
            1.0
        };
        let allowed = base * streak_mult * self.volatility_factor();
        let signal_risk = signal.risk_pct / 100.0;
        if signal_risk > allowed {
            return Err(RiskRejection::PerTradeRisk {
                risk_pct: signal.risk_pct,
                max_pct: allowed * 100.0,
            });
        }

        let reserved: f64 = daily.in_flight.values().sum();
        let projected =
            open_positions as f64 * config.risk.risk_per_trade + reserved + signal_risk;
        if projected > config.risk.max_portfolio_risk {
            return Err(RiskRejection::PortfolioRisk {
                projected,
                max: config.risk.max_portfolio_risk,
            });
        }

        daily.in_flight.insert(signal.symbol.clone(), signal_risk);
        Ok(())
    }

    /// Release the in-flight reservation once the executor finished (the open
    /// position count covers the trade from then on).
    pub async fn release_admission(&self, symbol: &str) {
        self.daily.lock().await.in_flight.remove(symbol);
    }

    /// Performance and checkpoint bookkeeping on every trade close.
    pub async fn on_trade_closed(&self, win: bool, balance: Decimal) {
        {
            let mut perf = self.perf.lock().unwrap_or_else(|p| p.into_inner());
            perf.update_performance(win);
        }
        if win {
            self.breaker.record_win();
        } else {
            self.breaker.record_loss();
        }

        let mut daily = self.daily.lock().await;
        if daily.initialized {
            self.update_extrema(&mut daily, balance).await;
        }
    }

    /// Reset checkpoints on a UTC date change, preferring cached markers for
    /// today so restarts do not re-baseline mid-day.
    async fn rollover_checkpoints(&self, daily: &mut DailyRiskState, balance: Decimal) {
        let today = Utc::now().date_naive();
        if daily.initialized && daily.date == today {
            return;
        }

        let date_str = today.format("%Y-%m-%d").to_string();
        let cached_start =
            cache_get::<Decimal>(self.cache.as_ref(), &keys::daily_balance(&date_str)).await;
        let cached_peak =
            cache_get::<Decimal>(self.cache.as_ref(), &keys::intraday_peak(&date_str)).await;
        let cached_trough =
            cache_get::<Decimal>(self.cache.as_ref(), &keys::intraday_trough(&date_str)).await;

        daily.date = today;
        daily.daily_start = cached_start.unwrap_or(balance);
        daily.intraday_peak = cached_peak.unwrap_or(balance);
        daily.intraday_trough = cached_trough.unwrap_or(balance);
        daily.initialized = true;

        if cached_start.is_none() {
            info!(
                "new UTC day {}: daily baseline snapshot at {}",
                date_str, balance
            );
            self.persist_checkpoints(daily).await;
        } else {
            info!(
                "hydrated daily checkpoints for {} from cache (start {})",
                date_str, daily.daily_start
            );
        }
    }

    async fn update_extrema(&self, daily: &mut DailyRiskState, balance: Decimal) {
        if balance <= Decimal::ZERO {
            warn!("skipping extrema update for non-positive balance {balance}");
            return;
        }
        let mut changed = false;
        if balance > daily.intraday_peak {
            daily.intraday_peak = balance;
            changed = true;
        }
        if daily.intraday_trough == Decimal::ZERO || balance < daily.intraday_trough {
            daily.intraday_trough = balance;
            changed = true;
        }
        if changed {
            self.persist_checkpoints(daily).await;
        }
    }

    async fn persist_checkpoints(&self, daily: &DailyRiskState) {
        let date_str = daily.date.format("%Y-%m-%d").to_string();
        cache_set(
            self.cache.as_ref(),
            &keys::daily_balance(&date_str),
            &daily.daily_start,
            CHECKPOINT_TTL,
        )
        .await;
        cache_set(
            self.cache.as_ref(),
            &keys::intraday_peak(&date_str),
            &daily.intraday_peak,
            CHECKPOINT_TTL,
        )
        .await;
        cache_set(
            self.cache.as_ref(),
            &keys::intraday_trough(&date_str),
            &daily.intraday_trough,
            CHECKPOINT_TTL,
        )
        .await;
    }
}
