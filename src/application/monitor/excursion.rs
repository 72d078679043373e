//! Maximum adverse/favorable excursion tracking per symbol, kept in-process
//! for the life of a trade.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct Excursion {
    /// Worst PnL percent seen (MAE), <= 0.
    pub mae_pct: f64,
    /// Best PnL percent seen (MFE), >= 0.
    pub mfe_pct: f64,
}

#[derive(Default)]
pub struct ExcursionTracker {
    by_symbol: HashMap<String, Excursion>,
}

impl ExcursionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, symbol: &str, pnl_pct: f64) -> Excursion {
        let entry = self.by_symbol.entry(symbol.to_string()).or_default();
        if pnl_pct < entry.mae_pct {
            entry.mae_pct = pnl_pct;
        }
        if pnl_pct > entry.mfe_pct {
            entry.mfe_pct = pnl_pct;
        }
        *entry
    }

    pub fn get(&self, symbol: &str) -> Option<Excursion> {
        self.by_symbol.get(symbol).copied()
    }

    /// Drop tracking once the trade is closed.
    pub fn clear(&mut self, symbol: &str) {
        self.by_symbol.remove(symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excursion_tracks_extremes() {
        let mut tracker = ExcursionTracker::new();
        tracker.observe("BTCUSDT", -1.0);
        tracker.observe("BTCUSDT", 4.0);
        tracker.observe("BTCUSDT", 2.0);
        let e = tracker.get("BTCUSDT").unwrap();
        assert!((e.mae_pct + 1.0).abs() < 1e-9);
        assert!((e.mfe_pct - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_clear_on_close() {
        let mut tracker = ExcursionTracker::new();
        tracker.observe("BTCUSDT", -1.0);
        tracker.clear("BTCUSDT");
        assert!(tracker.get("BTCUSDT").is_none());
    }
}
