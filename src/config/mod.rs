//! Environment-driven configuration. Each concern gets its own immutable
//! struct; `Config::from_env()` builds the aggregate snapshot. The live
//! handle is swapped atomically on reload, readers clone the `Arc` once per
//! operation.

mod execution;
mod monitor;
mod risk;
mod scanner;
mod signals;

pub use execution::ExecutionConfig;
pub use monitor::MonitorConfig;
pub use risk::{CorrelationConfig, RiskConfig, SniperConfig};
pub use scanner::ScannerConfig;
pub use signals::SignalConfig;

use anyhow::{Context, Result};
use std::env;
use std::sync::{Arc, RwLock};

/// Binance connectivity settings.
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub api_key: String,
    pub api_secret: String,
    pub testnet: bool,
}

impl BinanceConfig {
    pub fn rest_base_url(&self) -> &'static str {
        if self.testnet {
            "https://testnet.binancefuture.com"
        } else {
            "https://fapi.binance.com"
        }
    }

    pub fn ws_base_url(&self) -> &'static str {
        if self.testnet {
            "wss://stream.binancefuture.com"
        } else {
            "wss://fstream.binance.com"
        }
    }

    fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: env::var("BINANCE_API_KEY").unwrap_or_default(),
            api_secret: env::var("BINANCE_API_SECRET").unwrap_or_default(),
            testnet: parse_bool("BINANCE_TESTNET", true),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub bot_token: String,
    pub chat_id: String,
}

impl TelegramConfig {
    fn from_env() -> Self {
        Self {
            enabled: parse_bool("TELEGRAM_ENABLED", false),
            bot_token: env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
            chat_id: env::var("TELEGRAM_CHAT_ID").unwrap_or_default(),
        }
    }
}

/// Aggregate configuration snapshot. Immutable once built.
#[derive(Debug, Clone)]
pub struct Config {
    pub binance: BinanceConfig,
    pub telegram: TelegramConfig,
    pub risk: RiskConfig,
    pub sniper: SniperConfig,
    pub correlation: CorrelationConfig,
    pub execution: ExecutionConfig,
    pub scanner: ScannerConfig,
    pub signals: SignalConfig,
    pub monitor: MonitorConfig,
    pub database_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            binance: BinanceConfig::from_env()?,
            telegram: TelegramConfig::from_env(),
            risk: RiskConfig::from_env()?,
            sniper: SniperConfig::from_env()?,
            correlation: CorrelationConfig::from_env()?,
            execution: ExecutionConfig::from_env()?,
            scanner: ScannerConfig::from_env()?,
            signals: SignalConfig::from_env()?,
            monitor: MonitorConfig::from_env()?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/perpbot.db".to_string()),
        })
    }
}

/// Atomically swappable configuration handle. Readers take one snapshot per
/// operation and keep it for the operation's duration.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.inner
            .read()
            .map(|g| g.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Re-read the environment and publish a new snapshot.
    pub fn reload_settings(&self) -> Result<()> {
        let fresh = Arc::new(Config::from_env()?);
        match self.inner.write() {
            Ok(mut g) => *g = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        Ok(())
    }
}

pub(crate) fn parse_f64(key: &str, default: f64) -> Result<f64> {
    match env::var(key) {
        Ok(v) => v
            .parse::<f64>()
            .with_context(|| format!("failed to parse {key}={v}")),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_usize(key: &str, default: usize) -> Result<usize> {
    match env::var(key) {
        Ok(v) => v
            .parse::<usize>()
            .with_context(|| format!("failed to parse {key}={v}")),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_u32(key: &str, default: u32) -> Result<u32> {
    match env::var(key) {
        Ok(v) => v
            .parse::<u32>()
            .with_context(|| format!("failed to parse {key}={v}")),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .with_context(|| format!("failed to parse {key}={v}")),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

pub(crate) fn parse_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        let config = Config::from_env().expect("defaults must parse");
        assert_eq!(config.risk.max_positions, 4);
        assert!((config.risk.risk_per_trade - 0.025).abs() < 1e-9);
        assert!((config.risk.max_portfolio_risk - 0.15).abs() < 1e-9);
        assert_eq!(config.execution.default_leverage, 10);
        assert_eq!(config.execution.take_profit_parts.len(), 3);
    }

    #[test]
    fn test_config_handle_snapshot_is_stable() {
        let handle = ConfigHandle::new(Config::from_env().unwrap());
        let snap_a = handle.snapshot();
        handle.reload_settings().unwrap();
        let snap_b = handle.snapshot();
        // The earlier snapshot stays usable after a reload.
        assert_eq!(snap_a.risk.max_positions, snap_b.risk.max_positions);
    }
}
