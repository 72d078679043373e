//! In-process TTL key/value cache backing the `KvCache` port. Every entry
//! carries an absolute expiry instant; reads purge lazily.

use crate::domain::ports::KvCache;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvCache for MemoryCache {
    async fn get_raw(&self, key: &str) -> Option<String> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(e) if e.live() => return Some(e.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: purge under the write lock.
        self.entries.write().await.remove(key);
        None
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    async fn incr(&self, key: &str, ttl: Duration) -> i64 {
        let mut entries = self.entries.write().await;
        let next = match entries.get(key) {
            Some(e) if e.live() => e.value.parse::<i64>().unwrap_or(0) + 1,
            _ => 1,
        };
        // Fresh TTL on every bump, matching counter semantics of the
        // external store.
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        next
    }

    async fn scan_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.live())
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

/// Tolerated divergence between a cached price and a fresh observation.
/// Anything above this is a gap event: the cached entry must not be trusted.
pub const PRICE_GAP_TOLERANCE_PCT: f64 = 2.0;

/// True when a fresh observation diverges from the cached value beyond the
/// per-key tolerance.
pub fn is_price_gap(cached: rust_decimal::Decimal, fresh: rust_decimal::Decimal) -> bool {
    use rust_decimal::prelude::ToPrimitive;
    let cached = cached.to_f64().unwrap_or(0.0);
    let fresh = fresh.to_f64().unwrap_or(0.0);
    if fresh <= 0.0 {
        return true;
    }
    (cached - fresh).abs() / fresh * 100.0 > PRICE_GAP_TOLERANCE_PCT
}

/// Cache key layout, kept in one place so TTLs and prefixes stay consistent.
pub mod keys {
    pub const ACCOUNT_BALANCE: &str = "binance:account:balance";

    pub fn price(symbol: &str) -> String {
        format!("binance:price:{symbol}")
    }

    pub fn symbol_info(symbol: &str) -> String {
        format!("binance:symbol_info:{symbol}")
    }

    pub fn daily_balance(date: &str) -> String {
        format!("risk:daily_balance:{date}")
    }

    pub fn intraday_peak(date: &str) -> String {
        format!("risk:intraday_peak:{date}")
    }

    pub fn intraday_trough(date: &str) -> String {
        format!("risk:intraday_trough:{date}")
    }

    pub fn dca_count(symbol: &str) -> String {
        format!("dca_count:{symbol}")
    }

    pub fn scanner_klines(symbol: &str, interval: &str) -> String {
        format!("scanner:klines:{symbol}:{interval}")
    }

    pub fn movement_score(symbol: &str) -> String {
        format!("scanner:movement:{symbol}")
    }

    pub fn correlation(a: &str, b: &str) -> String {
        // Unordered pair key.
        if a <= b {
            format!("corr:{a}:{b}")
        } else {
            format!("corr:{b}:{a}")
        }
    }
}
