//! Position monitor and auxiliary-loop cadences and thresholds.

use super::{parse_bool, parse_f64, parse_u64};
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Seconds between monitor cycles.
    pub monitor_interval_secs: u64,
    /// Profit percent at which trailing arms.
    pub trailing_activation_pct: f64,
    /// Profit percent at which a partial take triggers.
    pub partial_tp_threshold_pct: f64,
    /// PnL percent at which a position is closed immediately.
    pub emergency_stop_pct: f64,
    /// PnL percent that closes and blacklists the symbol.
    pub max_loss_pct: f64,

    pub time_exit_hours: f64,
    pub time_exit_min_profit_pct: f64,

    pub dca_enabled: bool,
    pub max_dca_count: u32,
    pub dca_threshold_pct: f64,
    pub dca_multiplier: f64,

    pub pyramiding_threshold_pct: f64,
    pub pyramiding_multiplier: f64,

    pub positions_auto_sync_minutes: u64,

    pub enable_funding_exits: bool,
    pub funding_exit_threshold: f64,
    pub funding_exit_min_profit_pct: f64,

    /// Seconds a (symbol, kind) warning is suppressed after firing.
    pub warning_window_secs: u64,
    /// Minutes without any trading activity before the supervisor recycles
    /// the bot.
    pub inactive_mins: u64,
    /// Default SL/TP percents for trades reconstructed from exchange state.
    pub resync_default_sl_pct: f64,
    pub resync_default_tp_pct: f64,
}

impl MonitorConfig {
    pub(super) fn from_env() -> Result<Self> {
        Ok(Self {
            monitor_interval_secs: parse_u64("MONITOR_INTERVAL_SECS", 6)?,
            trailing_activation_pct: parse_f64("TRAILING_ACTIVATION_PCT", 3.0)?,
            partial_tp_threshold_pct: parse_f64("PARTIAL_TP_THRESHOLD_PCT", 5.0)?,
            emergency_stop_pct: parse_f64("EMERGENCY_STOP_PCT", -15.0)?,
            max_loss_pct: parse_f64("MAX_LOSS_PCT", -8.0)?,
            time_exit_hours: parse_f64("TIME_EXIT_HOURS", 4.0)?,
            time_exit_min_profit_pct: parse_f64("TIME_EXIT_MIN_PROFIT_PCT", 0.3)?,
            dca_enabled: parse_bool("DCA_ENABLED", true),
            max_dca_count: super::parse_u32("MAX_DCA_COUNT", 3)?,
            dca_threshold_pct: parse_f64("DCA_THRESHOLD_PCT", -2.0)?,
            dca_multiplier: parse_f64("DCA_MULTIPLIER", 1.5)?,
            pyramiding_threshold_pct: parse_f64("PYRAMIDING_THRESHOLD", 5.0)?,
            pyramiding_multiplier: parse_f64("PYRAMIDING_MULTIPLIER", 0.5)?,
            positions_auto_sync_minutes: parse_u64("POSITIONS_AUTO_SYNC_MINUTES", 10)?,
            enable_funding_exits: parse_bool("ENABLE_FUNDING_EXITS", false),
            funding_exit_threshold: parse_f64("FUNDING_EXIT_THRESHOLD", 0.0008)?,
            funding_exit_min_profit_pct: parse_f64("FUNDING_EXIT_MIN_PROFIT", 0.5)?,
            warning_window_secs: parse_u64("WARNING_WINDOW_SECS", 300)?,
            inactive_mins: parse_u64("SUPERVISOR_INACTIVE_MINS", 120)?,
            resync_default_sl_pct: parse_f64("RESYNC_DEFAULT_SL_PCT", 5.0)?,
            resync_default_tp_pct: parse_f64("RESYNC_DEFAULT_TP_PCT", 5.0)?,
        })
    }
}
