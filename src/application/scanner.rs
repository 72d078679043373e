//! Market scanner: universe selection, semaphore-capped kline prefetch and
//! movement-score ranking. Klines and scores are cached for one minute so
//! overlapping cycles reuse fetches.

use crate::config::ConfigHandle;
use crate::domain::ports::{ExchangeClient, KvCache, cache_get, cache_set};
use crate::domain::types::{Interval, Kline, ScanResult, SniperCandidate, Ticker24h};
use crate::infrastructure::cache::keys;
use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const KLINE_LIMIT: usize = 200;
/// Bars of (high-low)/low averaged into the volatility leg of the score.
const VOLATILITY_BARS: usize = 14;

pub struct MarketScanner {
    exchange: Arc<dyn ExchangeClient>,
    cache: Arc<dyn KvCache>,
    config: ConfigHandle,
    testnet: bool,
}

impl MarketScanner {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        cache: Arc<dyn KvCache>,
        config: ConfigHandle,
        testnet: bool,
    ) -> Self {
        Self {
            exchange,
            cache,
            config,
            testnet,
        }
    }

    /// Ranked, de-duplicated symbol list with 1h/4h klines pre-fetched.
    pub async fn scan(&self) -> Result<Vec<ScanResult>> {
        let config = self.config.snapshot();
        let scanner_cfg = &config.scanner;

        let perpetuals: HashSet<String> = self
            .exchange
            .exchange_symbols()
            .await?
            .into_iter()
            .filter(|s| s.is_tradable_perpetual())
            .map(|s| s.symbol)
            .collect();

        let mut tickers: Vec<Ticker24h> = self
            .exchange
            .ticker_24h_all()
            .await?
            .into_iter()
            .filter(|t| perpetuals.contains(&t.symbol))
            .collect();
        tickers.sort_by(|a, b| b.quote_volume.cmp(&a.quote_volume));
        tickers.truncate(scanner_cfg.top_n);

        if !self.testnet {
            let floor = Decimal::try_from(scanner_cfg.min_quote_volume_usdt_24h)
                .unwrap_or(Decimal::ZERO);
            tickers.retain(|t| t.quote_volume >= floor);
        }

        if let Some(whitelist) = scanner_cfg.effective_whitelist(self.testnet) {
            let allowed: HashSet<&String> = whitelist.iter().collect();
            tickers.retain(|t| allowed.contains(&t.symbol));
        }

        info!("scanner: {} candidates after universe filters", tickers.len());

        let semaphore = Arc::new(Semaphore::new(scanner_cfg.concurrency.max(1)));
        let kline_ttl = Duration::from_secs(scanner_cfg.klines_cache_ttl_secs);
        let mut tasks = Vec::with_capacity(tickers.len());

        for ticker in tickers {
            let exchange = self.exchange.clone();
            let cache = self.cache.clone();
            let semaphore = semaphore.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;

                // Symbols without a live price are dead listings.
                match exchange.symbol_price(&ticker.symbol).await {
                    Ok(price) if price > Decimal::ZERO => {}
                    _ => {
                        debug!("scanner: no live price for {}, skipping", ticker.symbol);
                        return None;
                    }
                }

                let klines_1h =
                    cached_klines(&*exchange, &*cache, &ticker.symbol, Interval::H1, kline_ttl)
                        .await?;
                let klines_4h =
                    cached_klines(&*exchange, &*cache, &ticker.symbol, Interval::H4, kline_ttl)
                        .await?;

                let (price_change_pct, volatility, movement_score) = movement_score(&klines_1h)?;
                cache_set(
                    &*cache,
                    &keys::movement_score(&ticker.symbol),
                    &movement_score,
                    kline_ttl,
                )
                .await;

                Some(ScanResult {
                    symbol: ticker.symbol,
                    klines_1h,
                    klines_4h,
                    price_change_pct,
                    volatility,
                    movement_score,
                })
            }));
        }

        let mut results = Vec::new();
        for task in tasks {
            match task.await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => warn!("scanner task panicked: {e}"),
            }
        }

        results.sort_by(|a, b| b.movement_score.total_cmp(&a.movement_score));
        results.truncate(scanner_cfg.max_symbols);
        info!("scanner: returning {} ranked symbols", results.len());
        Ok(results)
    }

    /// Mid-cap movers for the sniper lane: 24h quote volume inside the band,
    /// absolute 24h change above the floor, ranked by change weighted toward
    /// thinner books.
    pub async fn sniper_candidates(&self, limit: usize) -> Result<Vec<SniperCandidate>> {
        let config = self.config.snapshot();
        let sniper_cfg = &config.sniper;

        let perpetuals: HashSet<String> = self
            .exchange
            .exchange_symbols()
            .await?
            .into_iter()
            .filter(|s| s.is_tradable_perpetual())
            .map(|s| s.symbol)
            .collect();

        let min_vol = Decimal::try_from(sniper_cfg.min_quote_volume).unwrap_or(Decimal::ZERO);
        let max_vol = Decimal::try_from(sniper_cfg.max_quote_volume).unwrap_or(Decimal::MAX);

        let mut candidates: Vec<SniperCandidate> = self
            .exchange
            .ticker_24h_all()
            .await?
            .into_iter()
            .filter(|t| perpetuals.contains(&t.symbol))
            .filter(|t| t.quote_volume >= min_vol && t.quote_volume <= max_vol)
            .filter(|t| t.price_change_pct.abs() >= sniper_cfg.min_abs_change_pct)
            .map(|t| {
                let volume = t.quote_volume.to_f64().unwrap_or(f64::MAX);
                SniperCandidate {
                    rank_score: t.price_change_pct.abs() * (1e7 / (volume + 1.0)),
                    symbol: t.symbol,
                    price_change_pct: t.price_change_pct,
                    quote_volume: t.quote_volume,
                }
            })
            .collect();

        candidates.sort_by(|a, b| b.rank_score.total_cmp(&a.rank_score));
        candidates.truncate(limit);
        Ok(candidates)
    }
}

async fn cached_klines(
    exchange: &dyn ExchangeClient,
    cache: &dyn KvCache,
    symbol: &str,
    interval: Interval,
    ttl: Duration,
) -> Option<Vec<Kline>> {
    let key = keys::scanner_klines(symbol, interval.as_str());
    if let Some(klines) = cache_get::<Vec<Kline>>(cache, &key).await {
        return Some(klines);
    }
    match exchange.klines(symbol, interval, KLINE_LIMIT).await {
        Ok(klines) if !klines.is_empty() => {
            cache_set(cache, &key, &klines, ttl).await;
            Some(klines)
        }
        Ok(_) => None,
        Err(e) => {
            debug!("scanner: klines fetch failed for {symbol} {interval}: {e}");
            None
        }
    }
}

/// Movement score: 0.6 x |last 1h close change|% + 0.4 x mean((high-low)/low)%
/// over the last 14 hourly bars.
fn movement_score(klines_1h: &[Kline]) -> Option<(f64, f64, f64)> {
    if klines_1h.len() < VOLATILITY_BARS + 1 {
        return None;
    }
    let last = klines_1h.last()?;
    let prev = &klines_1h[klines_1h.len() - 2];
    let prev_close = prev.close_f64();
    if prev_close <= 0.0 {
        return None;
    }
    let price_change_pct = (last.close_f64() - prev_close) / prev_close * 100.0;

    let window = &klines_1h[klines_1h.len() - VOLATILITY_BARS..];
    let volatility = window
        .iter()
        .filter(|k| k.low_f64() > 0.0)
        .map(|k| (k.high_f64() - k.low_f64()) / k.low_f64() * 100.0)
        .sum::<f64>()
        / VOLATILITY_BARS as f64;

    let score = 0.6 * price_change_pct.abs() + 0.4 * volatility;
    Some((price_change_pct, volatility, score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromPrimitive;

    fn kline(close: f64, high: f64, low: f64) -> Kline {
        Kline {
            open_time: 0,
            open: Decimal::from_f64(close).unwrap(),
            high: Decimal::from_f64(high).unwrap(),
            low: Decimal::from_f64(low).unwrap(),
            close: Decimal::from_f64(close).unwrap(),
            volume: Decimal::from(1000),
            quote_volume: Decimal::from(100000),
            trades: 10,
        }
    }

    #[test]
    fn test_movement_score_weighting() {
        // 15 bars, constant 2% bar range, final close +1% vs previous.
        let mut klines: Vec<Kline> = (0..15).map(|_| kline(100.0, 101.0, 99.0)).collect();
        let last = klines.len() - 1;
        klines[last] = kline(101.0, 102.0, 100.0);

        let (change, vol, score) = movement_score(&klines).unwrap();
        assert!((change - 1.0).abs() < 1e-9);
        // 13 bars at (101-99)/99 and one at (102-100)/100, averaged.
        let expected_vol = (13.0 * (2.0 / 99.0 * 100.0) + 2.0) / 14.0;
        assert!((vol - expected_vol).abs() < 1e-9);
        assert!((score - (0.6 + 0.4 * expected_vol)).abs() < 1e-9);
    }

    #[test]
    fn test_movement_score_needs_history() {
        let klines: Vec<Kline> = (0..5).map(|_| kline(100.0, 101.0, 99.0)).collect();
        assert!(movement_score(&klines).is_none());
    }
}
