//! Macro market gate on the BTC regime. Consulted before correlation
//! filtering; also supplies the 24h volatility bucket that drives the
//! orchestrator's scan cadence.

use crate::domain::indicators::{closes, ema_last, volume_ratio};
use crate::domain::ports::ExchangeClient;
use crate::domain::types::{Direction, Interval, Signal};
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

const BTC: &str = "BTCUSDT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketTrend {
    Bullish,
    Bearish,
    Sideways,
}

#[derive(Debug, Clone, Copy)]
pub struct MarketSentiment {
    /// 0 = deeply bearish, 100 = euphoric.
    pub score: f64,
    pub trend: MarketTrend,
    pub change_1h_pct: f64,
    pub change_4h_pct: f64,
    pub volume_ratio: f64,
}

impl MarketSentiment {
    /// Longs are blocked in a hostile macro regime, shorts in a euphoric one.
    pub fn allows(&self, direction: Direction) -> bool {
        match direction {
            Direction::Long => self.score >= 25.0,
            Direction::Short => self.score <= 75.0,
        }
    }
}

pub struct MarketFilter {
    exchange: Arc<dyn ExchangeClient>,
}

impl MarketFilter {
    pub fn new(exchange: Arc<dyn ExchangeClient>) -> Self {
        Self { exchange }
    }

    pub async fn assess(&self) -> Result<MarketSentiment> {
        let klines_1h = self.exchange.klines(BTC, Interval::H1, 60).await?;
        let klines_4h = self.exchange.klines(BTC, Interval::H4, 60).await?;
        Ok(score_regime(&klines_1h, &klines_4h))
    }

    pub fn apply(&self, sentiment: &MarketSentiment, signals: Vec<Signal>) -> Vec<Signal> {
        let before = signals.len();
        let out: Vec<Signal> = signals
            .into_iter()
            .filter(|s| sentiment.allows(s.direction))
            .collect();
        if out.len() < before {
            debug!(
                "market filter dropped {} signals (sentiment {:.0}, {:?})",
                before - out.len(),
                sentiment.score,
                sentiment.trend
            );
        }
        out
    }

    /// BTC 24h range as a percent of price, used to bucket the scan cadence.
    pub async fn btc_volatility_24h(&self) -> Result<f64> {
        let klines = self.exchange.klines(BTC, Interval::H1, 24).await?;
        let high = klines
            .iter()
            .map(|k| k.high_f64())
            .fold(f64::MIN, f64::max);
        let low = klines.iter().map(|k| k.low_f64()).fold(f64::MAX, f64::min);
        if low <= 0.0 || high < low {
            return Ok(0.0);
        }
        Ok((high - low) / low * 100.0)
    }
}

fn score_regime(
    klines_1h: &[crate::domain::types::Kline],
    klines_4h: &[crate::domain::types::Kline],
) -> MarketSentiment {
    let change = |klines: &[crate::domain::types::Kline], bars: usize| -> f64 {
        if klines.len() <= bars {
            return 0.0;
        }
        let from = klines[klines.len() - 1 - bars].close_f64();
        let to = klines[klines.len() - 1].close_f64();
        if from <= 0.0 {
            return 0.0;
        }
        (to - from) / from * 100.0
    };

    let change_1h = change(klines_1h, 1);
    let change_4h = change(klines_4h, 1);
    let vol_ratio = volume_ratio(klines_1h, 20).unwrap_or(1.0);

    let mut score: f64 = 50.0;
    score += if change_1h > 0.0 { 10.0 } else { -10.0 };
    if change_4h > 1.0 {
        score += 15.0;
    } else if change_4h < -1.0 {
        score -= 15.0;
    }

    let close_series = closes(klines_1h);
    if let (Some(last), Some(ema50)) = (close_series.last(), ema_last(&close_series, 50)) {
        score += if *last > ema50 { 15.0 } else { -15.0 };
    }

    // Heavy volume amplifies whichever way price is leaning.
    if vol_ratio > 1.5 {
        score += if change_1h >= 0.0 { 10.0 } else { -10.0 };
    }

    let score = score.clamp(0.0, 100.0);
    let trend = if score >= 65.0 {
        MarketTrend::Bullish
    } else if score <= 35.0 {
        MarketTrend::Bearish
    } else {
        MarketTrend::Sideways
    };

    MarketSentiment {
        score,
        trend,
        change_1h_pct: change_1h,
        change_4h_pct: change_4h,
        volume_ratio: vol_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Kline;
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;

    fn series(start: f64, step: f64, n: usize) -> Vec<Kline> {
        (0..n)
            .map(|i| {
                let close = start + step * i as f64;
                Kline {
                    open_time: i as i64,
                    open: Decimal::from_f64(close - step).unwrap(),
                    high: Decimal::from_f64(close + 1.0).unwrap(),
                    low: Decimal::from_f64(close - 1.0).unwrap(),
                    close: Decimal::from_f64(close).unwrap(),
                    volume: Decimal::from(1000),
                    quote_volume: Decimal::from(100000),
                    trades: 10,
                }
            })
            .collect()
    }

    #[test]
    fn test_rising_market_is_bullish() {
        let sentiment = score_regime(&series(100.0, 1.0, 60), &series(100.0, 3.0, 60));
        assert_eq!(sentiment.trend, MarketTrend::Bullish);
        assert!(sentiment.allows(Direction::Long));
        assert!(!sentiment.allows(Direction::Short));
    }

    #[test]
    fn test_falling_market_is_bearish() {
        let sentiment = score_regime(&series(200.0, -1.0, 60), &series(300.0, -3.0, 60));
        assert_eq!(sentiment.trend, MarketTrend::Bearish);
        assert!(!sentiment.allows(Direction::Long));
        assert!(sentiment.allows(Direction::Short));
    }
}
