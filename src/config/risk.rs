//! Risk, sniper and correlation limits.

use super::{parse_f64, parse_u64, parse_usize};
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Cap on concurrent core trades.
    pub max_positions: usize,
    /// Risk budget per trade, fraction of balance.
    pub risk_per_trade: f64,
    /// Portfolio-wide risk ceiling, fraction of balance.
    pub max_portfolio_risk: f64,
    /// Fraction of balance ever allowed as margin in aggregate.
    pub max_total_capital_usage: f64,
    /// Daily loss fraction at which new admissions stop until next UTC day.
    pub daily_max_loss_pct: f64,
    /// Intraday peak-to-current drawdown fraction that hard-stops admissions.
    pub intraday_drawdown_hard_stop_pct: f64,
    /// Account drawdown percent that fires the kill switch.
    pub max_drawdown_pct: f64,
    /// Consecutive losses before the circuit breaker trips.
    pub consecutive_loss_limit: usize,
    /// Circuit-breaker cooldown in seconds.
    pub circuit_breaker_cooldown_secs: u64,
    /// Hours a symbol stays blacklisted after a max-loss close.
    pub blacklist_hours: u64,
}

impl RiskConfig {
    pub(super) fn from_env() -> Result<Self> {
        Ok(Self {
            max_positions: parse_usize("MAX_POSITIONS", 4)?,
            risk_per_trade: parse_f64("RISK_PER_TRADE", 0.025)?,
            max_portfolio_risk: parse_f64("MAX_PORTFOLIO_RISK", 0.15)?,
            max_total_capital_usage: parse_f64("MAX_TOTAL_CAPITAL_USAGE", 0.90)?,
            daily_max_loss_pct: parse_f64("DAILY_MAX_LOSS_PCT", 0.05)?,
            intraday_drawdown_hard_stop_pct: parse_f64("INTRADAY_DRAWDOWN_HARD_STOP_PCT", 0.25)?,
            max_drawdown_pct: parse_f64("MAX_DRAWDOWN_PCT", 15.0)?,
            consecutive_loss_limit: parse_usize("CONSECUTIVE_LOSS_LIMIT", 3)?,
            circuit_breaker_cooldown_secs: parse_u64("CIRCUIT_BREAKER_COOLDOWN_SECS", 3600)?,
            blacklist_hours: parse_u64("BLACKLIST_HOURS", 2)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SniperConfig {
    pub risk_per_trade: f64,
    pub tp_pct: f64,
    pub sl_pct: f64,
    pub extra_slots: usize,
    pub default_leverage: u32,
    pub max_spread_pct: f64,
    /// Mid-cap 24h quote-volume band for candidate selection, USDT.
    pub min_quote_volume: f64,
    pub max_quote_volume: f64,
    pub min_abs_change_pct: f64,
}

impl SniperConfig {
    pub(super) fn from_env() -> Result<Self> {
        Ok(Self {
            risk_per_trade: parse_f64("SNIPER_RISK_PER_TRADE", 0.02)?,
            tp_pct: parse_f64("SNIPER_TP_PCT", 1.2)?,
            sl_pct: parse_f64("SNIPER_SL_PCT", 0.8)?,
            extra_slots: parse_usize("SNIPER_EXTRA_SLOTS", 0)?,
            default_leverage: super::parse_u32("SNIPER_DEFAULT_LEVERAGE", 5)?,
            max_spread_pct: parse_f64("MAX_SPREAD_PCT_SNIPER", 0.30)?,
            min_quote_volume: parse_f64("SNIPER_MIN_QUOTE_VOLUME", 1_000_000.0)?,
            max_quote_volume: parse_f64("SNIPER_MAX_QUOTE_VOLUME", 50_000_000.0)?,
            min_abs_change_pct: parse_f64("SNIPER_MIN_ABS_CHANGE_PCT", 2.0)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    pub window_days: usize,
    pub max_correlation: f64,
    pub max_positions_per_sector: usize,
}

impl CorrelationConfig {
    pub(super) fn from_env() -> Result<Self> {
        Ok(Self {
            window_days: parse_usize("CORR_WINDOW_DAYS", 14)?,
            max_correlation: parse_f64("MAX_CORRELATION", 0.5)?,
            max_positions_per_sector: parse_usize("MAX_POSITIONS_PER_SECTOR", 2)?,
        })
    }
}
