//! Correlation and sector exposure filter. Pearson correlation of daily
//! returns, computed pairwise with an hourly cache keyed by unordered pair;
//! sector caps counted over open plus already-selected symbols.

use crate::config::ConfigHandle;
use crate::domain::ports::{ExchangeClient, KvCache, cache_get, cache_set};
use crate::domain::sectors::{Sector, sector_of};
use crate::domain::types::{Interval, Signal};
use crate::infrastructure::cache::keys;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const PAIR_CACHE_TTL: Duration = Duration::from_secs(3600);

pub struct CorrelationFilter {
    exchange: Arc<dyn ExchangeClient>,
    cache: Arc<dyn KvCache>,
    config: ConfigHandle,
}

impl CorrelationFilter {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        cache: Arc<dyn KvCache>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            exchange,
            cache,
            config,
        }
    }

    /// Trim `signals` (already score-ordered) against open positions and
    /// each other. Deterministic for fixed inputs: running it twice yields
    /// the same admitted subset.
    pub async fn filter(
        &self,
        signals: Vec<Signal>,
        open_symbols: &[String],
        max_correlation: Option<f64>,
    ) -> Vec<Signal> {
        let config = self.config.snapshot();
        let threshold = max_correlation.unwrap_or(config.correlation.max_correlation);
        let window = config.correlation.window_days;
        let sector_cap = config.correlation.max_positions_per_sector;

        let mut sector_counts: HashMap<Sector, usize> = HashMap::new();
        for symbol in open_symbols {
            *sector_counts.entry(sector_of(symbol)).or_default() += 1;
        }

        let mut returns_memo: HashMap<String, Option<Vec<f64>>> = HashMap::new();
        let mut selected: Vec<Signal> = Vec::new();

        'candidates: for signal in signals {
            let sector = sector_of(&signal.symbol);
            // OTHER is the catch-all bucket, not a correlated grouping; it
            // is never capped.
            if sector != Sector::Other
                && sector_counts.get(&sector).copied().unwrap_or(0) >= sector_cap
            {
                debug!(
                    "{}: sector {} at cap {}, rejected",
                    signal.symbol, sector, sector_cap
                );
                continue;
            }

            let mut others: Vec<&String> = open_symbols.iter().collect();
            let selected_symbols: Vec<String> =
                selected.iter().map(|s| s.symbol.clone()).collect();
            others.extend(selected_symbols.iter());

            for other in others {
                if *other == signal.symbol {
                    continue 'candidates;
                }
                let corr = self
                    .pair_correlation(&signal.symbol, other, window, &mut returns_memo)
                    .await;
                if corr.abs() > threshold {
                    debug!(
                        "{}: correlation {:.2} with {} above {:.2}, rejected",
                        signal.symbol, corr, other, threshold
                    );
                    continue 'candidates;
                }
            }

            *sector_counts.entry(sector).or_default() += 1;
            selected.push(signal);
        }

        info!("correlation filter admitted {} signals", selected.len());
        selected
    }

    async fn pair_correlation(
        &self,
        a: &str,
        b: &str,
        window_days: usize,
        memo: &mut HashMap<String, Option<Vec<f64>>>,
    ) -> f64 {
        let key = keys::correlation(a, b);
        if let Some(cached) = cache_get::<f64>(self.cache.as_ref(), &key).await {
            return cached;
        }

        let returns_a = self.daily_returns(a, window_days, memo).await;
        let returns_b = self.daily_returns(b, window_days, memo).await;
        let corr = match (returns_a, returns_b) {
            (Some(ra), Some(rb)) => pearson(&ra, &rb),
            // Unknown history defaults to uncorrelated; the venue data will
            // be there next hour.
            _ => 0.0,
        };

        cache_set(self.cache.as_ref(), &key, &corr, PAIR_CACHE_TTL).await;
        corr
    }

    async fn daily_returns(
        &self,
        symbol: &str,
        window_days: usize,
        memo: &mut HashMap<String, Option<Vec<f64>>>,
    ) -> Option<Vec<f64>> {
        if let Some(cached) = memo.get(symbol) {
            return cached.clone();
        }
        let computed = match self
            .exchange
            .klines(symbol, Interval::D1, window_days + 1)
            .await
        {
            Ok(klines) if klines.len() >= 2 => {
                let closes: Vec<f64> = klines.iter().map(|k| k.close_f64()).collect();
                Some(
                    closes
                        .windows(2)
                        .filter(|w| w[0] > 0.0)
                        .map(|w| (w[1] - w[0]) / w[0])
                        .collect(),
                )
            }
            _ => None,
        };
        memo.insert(symbol.to_string(), computed.clone());
        computed
    }
}

/// Pearson correlation over paired samples; truncates to the shorter series.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];

    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pearson_perfect_correlation() {
        let a = vec![0.01, -0.02, 0.03, 0.01, -0.01];
        let b: Vec<f64> = a.iter().map(|x| x * 2.0).collect();
        assert!((pearson(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pearson_inverse_correlation() {
        let a = vec![0.01, -0.02, 0.03, 0.01, -0.01];
        let b: Vec<f64> = a.iter().map(|x| -x).collect();
        assert!((pearson(&a, &b) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pearson_degenerate_series() {
        assert_eq!(pearson(&[0.01], &[0.02]), 0.0);
        assert_eq!(pearson(&[0.0, 0.0, 0.0], &[0.01, 0.02, 0.03]), 0.0);
    }
}
