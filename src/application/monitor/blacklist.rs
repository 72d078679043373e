//! Per-symbol temporary ban after max-loss events. Entries expire lazily.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct Blacklist {
    entries: Mutex<HashMap<String, Instant>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn insert(&self, symbol: &str, ttl: Duration) {
        self.lock().insert(symbol.to_string(), Instant::now() + ttl);
    }

    pub fn is_blacklisted(&self, symbol: &str) -> bool {
        let mut entries = self.lock();
        match entries.get(symbol) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                entries.remove(symbol);
                false
            }
            None => false,
        }
    }

    pub fn remaining(&self, symbol: &str) -> Option<Duration> {
        let entries = self.lock();
        entries
            .get(symbol)
            .and_then(|until| until.checked_duration_since(Instant::now()))
    }

    pub fn active_symbols(&self) -> Vec<String> {
        let now = Instant::now();
        self.lock()
            .iter()
            .filter(|(_, until)| now < **until)
            .map(|(s, _)| s.clone())
            .collect()
    }
}
