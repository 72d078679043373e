//! Signal generator: turns scanner output into scored signals with stop,
//! take-profit ladder and leverage attached. The indicator evaluation is
//! pure and synchronous; only the derivatives gate goes to the venue.

use crate::application::signals::derivatives::DerivativesGate;
use crate::config::{Config, ConfigHandle, SignalConfig};
use crate::domain::indicators::{
    self, CandlePattern, DivergenceKind, adx, atr, bollinger_last, closes, detect_pattern,
    ema_last, ema_series, macd_last, momentum_pct, rsi_divergence, rsi_last, rsi_series, vwap,
};
use crate::domain::types::{Direction, ScanResult, Signal, SignalEnrichment};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use tracing::debug;

const BASE_SCORE: i32 = 50;
const DIVERGENCE_WINDOW: usize = 14;
const CHANDELIER_ATR_MULT: f64 = 2.0;
const TP_ATR_MULTS: [f64; 3] = [4.0, 6.0, 8.0];
const FIB_EXTENSIONS: [f64; 3] = [1.618, 2.618, 4.236];
/// Momentum strong enough to justify Fibonacci targets, percent.
const STRONG_MOMENTUM_PCT: f64 = 1.0;

pub struct SignalGenerator {
    config: ConfigHandle,
    derivatives: DerivativesGate,
}

struct Draft {
    direction: Direction,
    entry: f64,
    stop_loss: f64,
    take_profits: [f64; 3],
    leverage: u32,
    score: i32,
    enrichment: SignalEnrichment,
}

impl SignalGenerator {
    pub fn new(config: ConfigHandle, derivatives: DerivativesGate) -> Self {
        Self {
            config,
            derivatives,
        }
    }

    /// Scored signals for a scan batch, best first. Never emits below
    /// `min_score`.
    pub async fn generate(
        &self,
        scans: &[ScanResult],
        market_sentiment_score: Option<f64>,
    ) -> Vec<Signal> {
        let config = self.config.snapshot();
        let mut signals = Vec::new();

        for scan in scans {
            let Some(mut draft) = evaluate_symbol(&config, scan) else {
                continue;
            };

            let assessment = self
                .derivatives
                .assess(&config.signals, &scan.symbol, draft.direction)
                .await;
            if let Some(reason) = assessment.blocked {
                debug!("{}: blocked by derivatives gate: {reason}", scan.symbol);
                continue;
            }
            draft.score += assessment.score_delta;
            draft.enrichment.funding_rate = assessment.funding_rate;
            draft.enrichment.minutes_to_funding = assessment.minutes_to_funding;
            draft.enrichment.oi_change_pct = assessment.oi_change_pct;
            draft.enrichment.taker_ratio = assessment.taker_ratio;
            draft.enrichment.market_sentiment_score = market_sentiment_score;

            let score = draft.score.clamp(0, 100) as u32;
            if score < config.signals.min_score {
                continue;
            }

            let Some(signal) = draft_to_signal(&config, &scan.symbol, draft, score) else {
                continue;
            };
            signals.push(signal);
        }

        signals.sort_by(|a, b| b.score.cmp(&a.score));
        signals
    }
}

fn draft_to_signal(config: &Config, symbol: &str, draft: Draft, score: u32) -> Option<Signal> {
    let to_dec = |v: f64| Decimal::from_f64(v);
    Some(Signal {
        symbol: symbol.to_string(),
        direction: draft.direction,
        entry_price: to_dec(draft.entry)?,
        stop_loss: to_dec(draft.stop_loss)?,
        take_profit_1: to_dec(draft.take_profits[0])?,
        take_profit_2: to_dec(draft.take_profits[1]),
        take_profit_3: to_dec(draft.take_profits[2]),
        leverage: draft.leverage,
        score,
        risk_pct: config.risk.risk_per_trade * 100.0,
        force: false,
        sniper: false,
        enrichment: draft.enrichment,
    })
}

/// Pure indicator evaluation for one symbol.
fn evaluate_symbol(config: &Config, scan: &ScanResult) -> Option<Draft> {
    let cfg = &config.signals;
    let klines = &scan.klines_1h;
    if klines.len() < 40 {
        return None;
    }
    let close_series = closes(klines);
    let entry = *close_series.last()?;
    if entry <= 0.0 {
        return None;
    }

    // 1. Liquidity floor.
    let volume_ratio = indicators::volume_ratio(klines, 20)?;
    if volume_ratio < cfg.volume_threshold {
        return None;
    }

    // 2. Direction from RSI extremes.
    let rsi = rsi_last(&close_series, 14)?;
    let direction = if rsi < cfg.rsi_oversold {
        Direction::Long
    } else if rsi > cfg.rsi_overbought {
        Direction::Short
    } else {
        return None;
    };

    let ema200 = ema_last(&close_series, 200);
    let rsi_extreme = rsi < 20.0 || rsi > 80.0;
    let price_extended = ema200
        .map(|e| (entry - e).abs() / e * 100.0 >= 5.0)
        .unwrap_or(false);
    let extreme = rsi_extreme || price_extended;

    // 3. ADX regime filter.
    if cfg.enable_adx_filter {
        let adx_value = adx(klines, 14)?;
        if adx_value < cfg.adx_min_trend_strength {
            return None;
        }
    }

    let mut score = BASE_SCORE;
    if extreme {
        score += 10;
    }

    // 4. VWAP displacement bonus.
    if let Some(vwap_value) = vwap(&klines[klines.len().saturating_sub(24)..]) {
        match direction {
            Direction::Long if entry < vwap_value * 0.99 => score += 5,
            Direction::Short if entry > vwap_value * 1.01 => score += 5,
            _ => {}
        }
    }

    // 5. RSI divergence.
    let rsi_full = rsi_series(&close_series, 14);
    let divergence = rsi_divergence(&close_series, &rsi_full, DIVERGENCE_WINDOW);
    let mut divergence_aligned = false;
    match (direction, divergence) {
        (Direction::Long, Some(DivergenceKind::RegularBullish))
        | (Direction::Short, Some(DivergenceKind::RegularBearish)) => {
            score += 20;
            divergence_aligned = true;
        }
        (Direction::Long, Some(DivergenceKind::HiddenBullish))
        | (Direction::Short, Some(DivergenceKind::HiddenBearish)) => {
            score += 15;
            divergence_aligned = true;
        }
        _ => {}
    }

    // 6. Multi-timeframe confirmation on 4h. Smart reversals (extreme RSI or
    // divergence) survive a contrary higher timeframe at a score penalty.
    let smart_reversal = extreme || divergence_aligned;
    let mut is_reversal = false;
    let closes_4h = closes(&scan.klines_4h);
    if let (Some(ema50_4h), Some(ema200_4h)) =
        (ema_last(&closes_4h, 50), ema_last(&closes_4h, 200))
    {
        let uptrend = ema50_4h > ema200_4h;
        let aligned = match direction {
            Direction::Long => uptrend,
            Direction::Short => !uptrend,
        };
        if aligned {
            score += 5;
        } else if cfg.require_trend_confirmation {
            if !smart_reversal {
                return None;
            }
            score -= 5;
            is_reversal = true;
        } else if smart_reversal {
            is_reversal = true;
        }
    }

    // 7. Momentum agreement over the last 3 candles.
    let momentum = momentum_pct(klines, 3)?;
    let aligned_momentum = match direction {
        Direction::Long => momentum,
        Direction::Short => -momentum,
    };
    if aligned_momentum < cfg.min_momentum_threshold_pct {
        return None;
    }
    if aligned_momentum >= cfg.min_momentum_threshold_pct * 3.0 {
        score += 10;
    } else if aligned_momentum >= cfg.min_momentum_threshold_pct * 1.5 {
        score += 5;
    }

    // 8. MACD alignment.
    if let Some((macd, macd_signal, histogram)) = macd_last(&close_series) {
        match direction {
            Direction::Long => {
                if macd > macd_signal && histogram > 0.0 && macd > 0.0 {
                    score += 15;
                } else if macd > macd_signal {
                    score += 8;
                }
            }
            Direction::Short => {
                if macd < macd_signal && histogram < 0.0 && macd < 0.0 {
                    score += 15;
                } else if macd < macd_signal {
                    score += 8;
                }
            }
        }
    }

    // 9. Bollinger band position.
    if let Some((upper, _, lower)) = bollinger_last(&close_series, 20, 2.0) {
        match direction {
            Direction::Long => {
                if entry <= lower * 0.995 {
                    score += 15;
                } else if entry <= lower {
                    score += 10;
                }
            }
            Direction::Short => {
                if entry >= upper * 1.005 {
                    score += 15;
                } else if entry >= upper {
                    score += 10;
                }
            }
        }
    }

    // 10. Candlestick confirmation.
    if let Some(pattern) = detect_pattern(klines) {
        let pattern_aligned = match (pattern.is_bullish(), direction) {
            (Some(true), Direction::Long) | (Some(false), Direction::Short) => true,
            _ => false,
        };
        if pattern_aligned && pattern != CandlePattern::Doji {
            score += 12;
        }
    }

    // 12. ATR chandelier stop and TP ladder.
    let atr_value = atr(klines, 14)?;
    let raw_distance = atr_value * CHANDELIER_ATR_MULT;
    let distance_pct = (raw_distance / entry * 100.0)
        .clamp(cfg.sl_min_distance_pct, cfg.sl_max_distance_pct);
    let distance = entry * distance_pct / 100.0;

    let strong_momentum = aligned_momentum >= STRONG_MOMENTUM_PCT;
    let (stop_loss, take_profits) = match direction {
        Direction::Long => {
            let sl = entry - distance;
            let tps = if strong_momentum {
                FIB_EXTENSIONS.map(|f| entry + distance * f)
            } else {
                TP_ATR_MULTS.map(|m| entry + atr_value * m)
            };
            (sl, tps)
        }
        Direction::Short => {
            let sl = entry + distance;
            let tps = if strong_momentum {
                FIB_EXTENSIONS.map(|f| entry - distance * f)
            } else {
                TP_ATR_MULTS.map(|m| entry - atr_value * m)
            };
            (sl, tps)
        }
    };

    let risk_distance = (entry - stop_loss).abs();
    if risk_distance <= 0.0 {
        return None;
    }
    let rr = (take_profits[0] - entry).abs() / risk_distance;

    // Regime-dependent R:R floor: trending when the EMA200 slope is moving.
    let trending = ema200_slope_pct(&close_series, entry)
        .map(|s| s.abs() > 0.1)
        .unwrap_or(false);
    let rr_floor = if trending {
        cfg.rr_min_trend
    } else {
        cfg.rr_min_range
    };
    if rr < rr_floor {
        return None;
    }

    // 13. Leverage from setup quality.
    let leverage = leverage_for(cfg, rr, volume_ratio, rsi)?;

    Some(Draft {
        direction,
        entry,
        stop_loss,
        take_profits,
        leverage,
        score,
        enrichment: SignalEnrichment {
            rsi,
            volume_ratio,
            atr: atr_value,
            rr,
            funding_rate: None,
            minutes_to_funding: None,
            oi_change_pct: None,
            taker_ratio: None,
            is_reversal,
            market_sentiment_score: None,
        },
    })
}

/// EMA200 slope over the last 10 bars, percent of price.
fn ema200_slope_pct(close_series: &[f64], price: f64) -> Option<f64> {
    if close_series.len() < 210 || price <= 0.0 {
        return None;
    }
    let series = ema_series(close_series, 200);
    let now = *series.last()?;
    let before = series[series.len() - 11];
    Some((now - before) / price * 100.0)
}

/// Start at 5x, add by volume, R:R and RSI-extremity tiers, clamp to the
/// configured band. Setups below the quality floor get no leverage at all.
fn leverage_for(cfg: &SignalConfig, rr: f64, volume_ratio: f64, rsi: f64) -> Option<u32> {
    if rr < 1.5 || volume_ratio < 0.8 {
        return None;
    }
    let mut leverage: i64 = 5;

    if volume_ratio >= 3.0 {
        leverage += 6;
    } else if volume_ratio >= 2.0 {
        leverage += 4;
    } else if volume_ratio >= 1.5 {
        leverage += 2;
    }

    if rr >= 3.0 {
        leverage += 5;
    } else if rr >= 2.5 {
        leverage += 3;
    } else if rr >= 2.0 {
        leverage += 1;
    }

    if rsi < 20.0 || rsi > 80.0 {
        leverage += 2;
    } else if rsi < 25.0 || rsi > 75.0 {
        leverage += 1;
    }

    Some((leverage as u32).clamp(cfg.min_leverage, cfg.max_leverage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Kline;
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;

    fn kline(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Kline {
        Kline {
            open_time: 0,
            open: Decimal::from_f64(open).unwrap(),
            high: Decimal::from_f64(high).unwrap(),
            low: Decimal::from_f64(low).unwrap(),
            close: Decimal::from_f64(close).unwrap(),
            volume: Decimal::from_f64(volume).unwrap(),
            quote_volume: Decimal::from_f64(volume * close).unwrap(),
            trades: 100,
        }
    }

    /// A selloff into oversold territory with a bounce on the last candles,
    /// enough volume and range to clear every liquidity and quality gate.
    fn oversold_scan() -> ScanResult {
        let mut klines = Vec::new();
        let mut price = 200.0;
        for i in 0..60 {
            let drop = 1.5;
            let next = price - drop;
            let volume = if i >= 55 { 4000.0 } else { 1000.0 };
            klines.push(kline(price, price + 1.0, next - 1.0, next, volume));
            price = next;
        }
        // Three green candles for momentum agreement with a LONG.
        for _ in 0..3 {
            let next = price + 0.6;
            klines.push(kline(price, next + 0.8, price - 0.8, next, 5000.0));
            price = next;
        }
        ScanResult {
            symbol: "TESTUSDT".into(),
            klines_4h: klines.clone(),
            klines_1h: klines,
            price_change_pct: -3.0,
            volatility: 2.0,
            movement_score: 3.0,
        }
    }

    fn test_config() -> Config {
        Config::from_env().unwrap()
    }

    #[test]
    fn test_oversold_setup_produces_long() {
        let config = test_config();
        let draft = evaluate_symbol(&config, &oversold_scan()).expect("signal expected");
        assert_eq!(draft.direction, Direction::Long);
        assert!(draft.score >= BASE_SCORE);
        assert!(draft.stop_loss < draft.entry);
        assert!(draft.take_profits[0] > draft.entry);
        assert!(draft.take_profits[2] > draft.take_profits[1]);
        assert!(draft.leverage >= config.signals.min_leverage);
        assert!(draft.leverage <= config.signals.max_leverage);
    }

    #[test]
    fn test_low_volume_is_rejected() {
        let config = test_config();
        let mut scan = oversold_scan();
        // Kill the volume spike: last bar far below the 20-bar average.
        let last = scan.klines_1h.len() - 1;
        scan.klines_1h[last].volume = Decimal::from(1);
        assert!(evaluate_symbol(&config, &scan).is_none());
    }

    #[test]
    fn test_neutral_rsi_is_rejected() {
        let config = test_config();
        // Flat series keeps RSI near 50.
        let klines: Vec<Kline> = (0..80)
            .map(|i| {
                let base = 100.0 + (i % 2) as f64 * 0.1;
                kline(base, base + 0.3, base - 0.3, base, 1000.0)
            })
            .collect();
        let scan = ScanResult {
            symbol: "FLATUSDT".into(),
            klines_4h: klines.clone(),
            klines_1h: klines,
            price_change_pct: 0.0,
            volatility: 0.1,
            movement_score: 0.1,
        };
        assert!(evaluate_symbol(&config, &scan).is_none());
    }

    #[test]
    fn test_leverage_tiers() {
        let cfg = test_config().signals;
        assert_eq!(leverage_for(&cfg, 1.0, 2.0, 30.0), None);
        assert_eq!(leverage_for(&cfg, 2.0, 0.5, 30.0), None);
        // rr 2.0 (+1), volume 1.5 (+2) from base 5 = 8.
        assert_eq!(leverage_for(&cfg, 2.0, 1.5, 30.0), Some(8));
        // Everything maxed clamps at the configured ceiling.
        assert_eq!(leverage_for(&cfg, 5.0, 5.0, 10.0), Some(18));
    }

    #[test]
    fn test_momentum_against_direction_rejected() {
        let config = test_config();
        let mut scan = oversold_scan();
        // Replace the bounce with three red candles: momentum now argues SHORT.
        let n = scan.klines_1h.len();
        let mut price = scan.klines_1h[n - 4].close_f64();
        for k in scan.klines_1h[n - 3..].iter_mut() {
            let next = price - 0.6;
            *k = kline(price, price + 0.2, next - 0.2, next, 5000.0);
            price = next;
        }
        assert!(evaluate_symbol(&config, &scan).is_none());
    }
}
