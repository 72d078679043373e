//! Market scanner universe and concurrency limits.

use super::{parse_bool, parse_f64, parse_list, parse_usize};
use anyhow::Result;

const DEFAULT_WHITELIST: &[&str] = &[
    "BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT", "XRPUSDT", "ADAUSDT", "AVAXUSDT", "DOGEUSDT",
    "LINKUSDT", "DOTUSDT", "NEARUSDT", "APTUSDT", "SUIUSDT", "INJUSDT", "ATOMUSDT", "LTCUSDT",
];

const DEFAULT_TESTNET_WHITELIST: &[&str] = &["BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT"];

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Top-N by 24h quote volume considered before scoring.
    pub top_n: usize,
    /// Cap on symbols fully processed per cycle.
    pub max_symbols: usize,
    /// 24h quote-volume floor, USDT. Ignored on testnet.
    pub min_quote_volume_usdt_24h: f64,
    /// Bound on concurrent kline/price fetches.
    pub concurrency: usize,
    pub strict_whitelist: bool,
    pub testnet_strict_whitelist: bool,
    pub whitelist: Vec<String>,
    pub testnet_whitelist: Vec<String>,
    /// Seconds klines and movement scores stay cached.
    pub klines_cache_ttl_secs: u64,
}

impl ScannerConfig {
    pub(super) fn from_env() -> Result<Self> {
        Ok(Self {
            top_n: parse_usize("SCANNER_TOP_N", 800)?,
            max_symbols: parse_usize("SCANNER_MAX_SYMBOLS", 400)?,
            min_quote_volume_usdt_24h: parse_f64("MIN_QUOTE_VOLUME_USDT_24H", 5_000_000.0)?,
            concurrency: parse_usize("SCANNER_CONCURRENCY", 8)?,
            strict_whitelist: parse_bool("SCANNER_STRICT_WHITELIST", true),
            testnet_strict_whitelist: parse_bool("SCANNER_TESTNET_STRICT_WHITELIST", false),
            whitelist: parse_list("SYMBOL_WHITELIST", DEFAULT_WHITELIST),
            testnet_whitelist: parse_list("TESTNET_WHITELIST", DEFAULT_TESTNET_WHITELIST),
            klines_cache_ttl_secs: super::parse_u64("SCANNER_KLINES_CACHE_TTL", 60)?,
        })
    }

    /// Effective whitelist for the environment, or `None` when unrestricted.
    pub fn effective_whitelist(&self, testnet: bool) -> Option<&[String]> {
        if testnet && self.testnet_strict_whitelist {
            Some(&self.testnet_whitelist)
        } else if self.strict_whitelist {
            Some(&self.whitelist)
        } else {
            None
        }
    }
}
