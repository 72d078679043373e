//! Signal generator thresholds and derivatives gates.

use super::{parse_bool, parse_f64, parse_u32, parse_usize};
use anyhow::Result;
use std::env;

#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub min_score: u32,
    pub volume_threshold: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub require_trend_confirmation: bool,
    pub min_momentum_threshold_pct: f64,
    pub rr_min_trend: f64,
    pub rr_min_range: f64,

    pub enable_adx_filter: bool,
    pub adx_min_trend_strength: f64,

    /// Stop distance clamps for the ATR chandelier, percent of entry.
    pub sl_min_distance_pct: f64,
    pub sl_max_distance_pct: f64,

    pub min_leverage: u32,
    pub max_leverage: u32,

    pub enable_funding_aware: bool,
    pub funding_adverse_threshold: f64,
    pub funding_block_window_minutes: i64,

    pub oi_change_period: String,
    pub oi_change_lookback: usize,
    pub oi_change_min_abs: f64,
    pub taker_ratio_long_min: f64,
    pub taker_ratio_short_max: f64,

    pub enable_top_trader_filter: bool,
    pub top_trader_min_bullish_ratio: f64,
    pub top_trader_max_bearish_ratio: f64,
    pub top_trader_score_bonus: u32,
}

impl SignalConfig {
    pub(super) fn from_env() -> Result<Self> {
        Ok(Self {
            min_score: parse_u32("PROD_MIN_SCORE", 30)?,
            volume_threshold: parse_f64("PROD_VOLUME_THRESHOLD", 0.1)?,
            rsi_oversold: parse_f64("PROD_RSI_OVERSOLD", 40.0)?,
            rsi_overbought: parse_f64("PROD_RSI_OVERBOUGHT", 60.0)?,
            require_trend_confirmation: parse_bool("REQUIRE_TREND_CONFIRMATION", false),
            min_momentum_threshold_pct: parse_f64("MIN_MOMENTUM_THRESHOLD_PCT", 0.05)?,
            rr_min_trend: parse_f64("RR_MIN_TREND", 1.0)?,
            rr_min_range: parse_f64("RR_MIN_RANGE", 1.0)?,
            enable_adx_filter: parse_bool("ENABLE_ADX_FILTER", false),
            adx_min_trend_strength: parse_f64("ADX_MIN_TREND_STRENGTH", 10.0)?,
            sl_min_distance_pct: parse_f64("SL_MIN_DISTANCE_PCT", 1.0)?,
            sl_max_distance_pct: parse_f64("SL_MAX_DISTANCE_PCT", 10.0)?,
            min_leverage: parse_u32("MIN_LEVERAGE", 3)?,
            max_leverage: parse_u32("MAX_LEVERAGE", 20)?,
            enable_funding_aware: parse_bool("ENABLE_FUNDING_AWARE", true),
            funding_adverse_threshold: parse_f64("FUNDING_ADVERSE_THRESHOLD", 0.0003)?,
            funding_block_window_minutes: parse_usize("FUNDING_BLOCK_WINDOW_MINUTES", 20)? as i64,
            oi_change_period: env::var("OI_CHANGE_PERIOD").unwrap_or_else(|_| "5m".to_string()),
            oi_change_lookback: parse_usize("OI_CHANGE_LOOKBACK", 12)?,
            oi_change_min_abs: parse_f64("OI_CHANGE_MIN_ABS", 0.5)?,
            taker_ratio_long_min: parse_f64("TAKER_RATIO_LONG_MIN", 1.02)?,
            taker_ratio_short_max: parse_f64("TAKER_RATIO_SHORT_MAX", 0.98)?,
            enable_top_trader_filter: parse_bool("ENABLE_TOP_TRADER_FILTER", true),
            top_trader_min_bullish_ratio: parse_f64("TOP_TRADER_MIN_BULLISH_RATIO", 1.15)?,
            top_trader_max_bearish_ratio: parse_f64("TOP_TRADER_MAX_BEARISH_RATIO", 0.85)?,
            top_trader_score_bonus: parse_u32("TOP_TRADER_SCORE_BONUS", 15)?,
        })
    }
}
