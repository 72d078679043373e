//! Order executor knobs: spread limits, leverage, margin mode, entry path,
//! protective orders and headroom management.

use super::{parse_bool, parse_f64, parse_u32, parse_u64};
use crate::domain::types::Interval;
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub default_leverage: u32,
    pub auto_isolate_min_leverage: u32,
    pub max_spread_pct_core: f64,
    pub default_margin_crossed: bool,
    pub allow_margin_mode_override: bool,

    pub enable_trailing_stop: bool,
    pub tsl_callback_pct_min: f64,
    pub tsl_callback_pct_max: f64,
    pub tsl_atr_lookback_interval: Interval,

    pub enable_bracket_batch: bool,
    pub use_mark_price_for_stops: bool,
    pub order_timeout_sec: u64,
    pub use_post_only_entries: bool,
    pub auto_post_only_entries: bool,
    pub auto_maker_spread_bps: f64,
    /// Fractions for the TP ladder; must sum to 1.
    pub take_profit_parts: Vec<f64>,
    /// Price improvement applied to plain LIMIT entries, percent.
    pub limit_buffer_pct: f64,
    pub limit_max_attempts: u32,

    pub headroom_min_pct: f64,
    pub reduce_step_pct: f64,
    pub allow_risk_bypass_for_force: bool,

    /// Notional above which an entry is split into iceberg chunks, USDT.
    pub iceberg_threshold: f64,
    /// Notional per iceberg chunk, USDT.
    pub iceberg_chunk_size: f64,

    pub dry_run: bool,
    /// Size against a fixed virtual balance instead of the live account.
    pub virtual_balance_enabled: bool,
    pub virtual_balance: f64,
}

impl ExecutionConfig {
    pub(super) fn from_env() -> Result<Self> {
        let parts_raw = env::var("TAKE_PROFIT_PARTS").unwrap_or_else(|_| "0.5,0.3,0.2".to_string());
        let take_profit_parts: Vec<f64> = parts_raw
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<f64>()
                    .with_context(|| format!("failed to parse TAKE_PROFIT_PARTS part {p}"))
            })
            .collect::<Result<_>>()?;
        let sum: f64 = take_profit_parts.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            anyhow::bail!("TAKE_PROFIT_PARTS must sum to 1, got {sum}");
        }

        let tsl_interval_raw =
            env::var("TSL_ATR_LOOKBACK_INTERVAL").unwrap_or_else(|_| "15m".to_string());
        let tsl_atr_lookback_interval = Interval::from_str(&tsl_interval_raw)
            .map_err(|e| anyhow::anyhow!("TSL_ATR_LOOKBACK_INTERVAL: {e}"))?;

        Ok(Self {
            default_leverage: parse_u32("DEFAULT_LEVERAGE", 10)?,
            auto_isolate_min_leverage: parse_u32("AUTO_ISOLATE_MIN_LEVERAGE", 10)?,
            max_spread_pct_core: parse_f64("MAX_SPREAD_PCT_CORE", 0.20)?,
            default_margin_crossed: parse_bool("DEFAULT_MARGIN_CROSSED", true),
            allow_margin_mode_override: parse_bool("ALLOW_MARGIN_MODE_OVERRIDE", true),
            enable_trailing_stop: parse_bool("ENABLE_TRAILING_STOP", true),
            tsl_callback_pct_min: parse_f64("TSL_CALLBACK_PCT_MIN", 0.4)?,
            tsl_callback_pct_max: parse_f64("TSL_CALLBACK_PCT_MAX", 1.2)?,
            tsl_atr_lookback_interval,
            enable_bracket_batch: parse_bool("ENABLE_BRACKET_BATCH", false),
            use_mark_price_for_stops: parse_bool("USE_MARK_PRICE_FOR_STOPS", true),
            order_timeout_sec: parse_u64("ORDER_TIMEOUT_SEC", 3)?,
            use_post_only_entries: parse_bool("USE_POST_ONLY_ENTRIES", false),
            auto_post_only_entries: parse_bool("AUTO_POST_ONLY_ENTRIES", false),
            auto_maker_spread_bps: parse_f64("AUTO_MAKER_SPREAD_BPS", 3.0)?,
            take_profit_parts,
            limit_buffer_pct: parse_f64("LIMIT_BUFFER_PCT", 0.05)?,
            limit_max_attempts: parse_u32("LIMIT_MAX_ATTEMPTS", 5)?,
            headroom_min_pct: parse_f64("HEADROOM_MIN_PCT", 35.0)?,
            reduce_step_pct: parse_f64("REDUCE_STEP_PCT", 10.0)?,
            allow_risk_bypass_for_force: parse_bool("ALLOW_RISK_BYPASS_FOR_FORCE", true),
            iceberg_threshold: parse_f64("ICEBERG_THRESHOLD", 25_000.0)?,
            iceberg_chunk_size: parse_f64("ICEBERG_CHUNK_SIZE", 5_000.0)?,
            dry_run: parse_bool("BOT_DRY_RUN", true),
            virtual_balance_enabled: parse_bool("VIRTUAL_BALANCE_ENABLED", false),
            virtual_balance: parse_f64("VIRTUAL_BALANCE_USDT", 100.0)?,
        })
    }
}
