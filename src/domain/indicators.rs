//! Indicator math over kline series. Standard oscillators come from the `ta`
//! crate; ADX, VWAP, candlestick patterns and RSI divergence are computed
//! directly. All math is f64; conversion from `Decimal` happens here at the
//! edge.

use crate::domain::types::Kline;
use ta::Next;
use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex,
};

pub fn closes(klines: &[Kline]) -> Vec<f64> {
    klines.iter().map(|k| k.close_f64()).collect()
}

pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let Ok(mut ema) = ExponentialMovingAverage::new(period) else {
        return Vec::new();
    };
    values.iter().map(|v| ema.next(*v)).collect()
}

pub fn ema_last(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period {
        return None;
    }
    ema_series(values, period).last().copied()
}

pub fn rsi_series(values: &[f64], period: usize) -> Vec<f64> {
    let Ok(mut rsi) = RelativeStrengthIndex::new(period) else {
        return Vec::new();
    };
    values.iter().map(|v| rsi.next(*v)).collect()
}

pub fn rsi_last(values: &[f64], period: usize) -> Option<f64> {
    if values.len() <= period {
        return None;
    }
    rsi_series(values, period).last().copied()
}

/// Last (macd, signal, histogram) of MACD(12/26/9).
pub fn macd_last(values: &[f64]) -> Option<(f64, f64, f64)> {
    if values.len() < 35 {
        return None;
    }
    let mut macd = MovingAverageConvergenceDivergence::new(12, 26, 9).ok()?;
    let mut out = None;
    for v in values {
        out = Some(macd.next(*v));
    }
    out.map(|o| (o.macd, o.signal, o.histogram))
}

/// Last (upper, middle, lower) of Bollinger(period, k sigma).
pub fn bollinger_last(values: &[f64], period: usize, k: f64) -> Option<(f64, f64, f64)> {
    if values.len() < period {
        return None;
    }
    let mut bb = BollingerBands::new(period, k).ok()?;
    let mut out = None;
    for v in values {
        out = Some(bb.next(*v));
    }
    out.map(|o| (o.upper, o.average, o.lower))
}

/// True-range mean over the last `period` bars.
pub fn atr(klines: &[Kline], period: usize) -> Option<f64> {
    if klines.len() < period + 1 {
        return None;
    }
    let start = klines.len() - period;
    let mut sum = 0.0;
    for i in start..klines.len() {
        let high = klines[i].high_f64();
        let low = klines[i].low_f64();
        let prev_close = klines[i - 1].close_f64();
        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        sum += tr;
    }
    Some(sum / period as f64)
}

/// ATR as a percentage of the last close.
pub fn atr_pct(klines: &[Kline], period: usize) -> Option<f64> {
    let atr = atr(klines, period)?;
    let close = klines.last()?.close_f64();
    if close <= 0.0 {
        return None;
    }
    Some(atr / close * 100.0)
}

/// Wilder's ADX.
pub fn adx(klines: &[Kline], period: usize) -> Option<f64> {
    if klines.len() < 2 * period + 1 {
        return None;
    }

    let mut trs = Vec::with_capacity(klines.len() - 1);
    let mut plus_dms = Vec::with_capacity(klines.len() - 1);
    let mut minus_dms = Vec::with_capacity(klines.len() - 1);

    for i in 1..klines.len() {
        let high = klines[i].high_f64();
        let low = klines[i].low_f64();
        let prev_high = klines[i - 1].high_f64();
        let prev_low = klines[i - 1].low_f64();
        let prev_close = klines[i - 1].close_f64();

        let up = high - prev_high;
        let down = prev_low - low;
        plus_dms.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dms.push(if down > up && down > 0.0 { down } else { 0.0 });
        trs.push(
            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs()),
        );
    }

    let smooth = |xs: &[f64]| -> Vec<f64> {
        let mut out = Vec::with_capacity(xs.len());
        let mut acc: f64 = xs[..period].iter().sum();
        out.push(acc);
        for x in &xs[period..] {
            acc = acc - acc / period as f64 + x;
            out.push(acc);
        }
        out
    };

    let tr_s = smooth(&trs);
    let plus_s = smooth(&plus_dms);
    let minus_s = smooth(&minus_dms);

    let mut dxs = Vec::with_capacity(tr_s.len());
    for i in 0..tr_s.len() {
        if tr_s[i] <= 0.0 {
            dxs.push(0.0);
            continue;
        }
        let plus_di = plus_s[i] / tr_s[i] * 100.0;
        let minus_di = minus_s[i] / tr_s[i] * 100.0;
        let denom = plus_di + minus_di;
        dxs.push(if denom > 0.0 {
            (plus_di - minus_di).abs() / denom * 100.0
        } else {
            0.0
        });
    }

    if dxs.len() < period {
        return None;
    }
    let mut adx: f64 = dxs[..period].iter().sum::<f64>() / period as f64;
    for dx in &dxs[period..] {
        adx = (adx * (period as f64 - 1.0) + dx) / period as f64;
    }
    Some(adx)
}

/// Volume-weighted average price over the given window.
pub fn vwap(klines: &[Kline]) -> Option<f64> {
    let mut pv = 0.0;
    let mut vol = 0.0;
    for k in klines {
        let typical = (k.high_f64() + k.low_f64() + k.close_f64()) / 3.0;
        pv += typical * k.volume_f64();
        vol += k.volume_f64();
    }
    if vol <= 0.0 {
        return None;
    }
    Some(pv / vol)
}

/// Last bar's volume relative to its `period`-bar simple average.
pub fn volume_ratio(klines: &[Kline], period: usize) -> Option<f64> {
    if klines.len() < period + 1 {
        return None;
    }
    let last = klines.last()?.volume_f64();
    let window = &klines[klines.len() - period - 1..klines.len() - 1];
    let avg = window.iter().map(|k| k.volume_f64()).sum::<f64>() / period as f64;
    if avg <= 0.0 {
        return None;
    }
    Some(last / avg)
}

/// Close-to-close change over the last `bars` candles, in percent.
pub fn momentum_pct(klines: &[Kline], bars: usize) -> Option<f64> {
    if klines.len() < bars + 1 {
        return None;
    }
    let from = klines[klines.len() - 1 - bars].close_f64();
    let to = klines.last()?.close_f64();
    if from <= 0.0 {
        return None;
    }
    Some((to - from) / from * 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandlePattern {
    Hammer,
    ShootingStar,
    BullishEngulfing,
    BearishEngulfing,
    Doji,
}

impl CandlePattern {
    /// Direction the pattern argues for, if any.
    pub fn is_bullish(&self) -> Option<bool> {
        match self {
            CandlePattern::Hammer | CandlePattern::BullishEngulfing => Some(true),
            CandlePattern::ShootingStar | CandlePattern::BearishEngulfing => Some(false),
            CandlePattern::Doji => None,
        }
    }
}

/// Detect a reversal pattern on the last candle, requiring volume at or above
/// the 20-bar average for confirmation (doji excepted).
pub fn detect_pattern(klines: &[Kline]) -> Option<CandlePattern> {
    if klines.len() < 2 {
        return None;
    }
    let last = &klines[klines.len() - 1];
    let prev = &klines[klines.len() - 2];

    let open = last.open_f64();
    let close = last.close_f64();
    let high = last.high_f64();
    let low = last.low_f64();
    let body = (close - open).abs();
    let range = high - low;
    if range <= 0.0 {
        return None;
    }

    let upper_wick = high - open.max(close);
    let lower_wick = open.min(close) - low;
    let volume_ok = volume_ratio(klines, 20).map(|r| r >= 1.0).unwrap_or(false);

    if body / range < 0.1 {
        return Some(CandlePattern::Doji);
    }
    if !volume_ok {
        return None;
    }
    if lower_wick > 2.0 * body && upper_wick < body {
        return Some(CandlePattern::Hammer);
    }
    if upper_wick > 2.0 * body && lower_wick < body {
        return Some(CandlePattern::ShootingStar);
    }

    let prev_body = (prev.close_f64() - prev.open_f64()).abs();
    let prev_bearish = prev.close_f64() < prev.open_f64();
    let prev_bullish = prev.close_f64() > prev.open_f64();
    if close > open && prev_bearish && body > prev_body && close > prev.open_f64() && open < prev.close_f64()
    {
        return Some(CandlePattern::BullishEngulfing);
    }
    if close < open && prev_bullish && body > prev_body && close < prev.open_f64() && open > prev.close_f64()
    {
        return Some(CandlePattern::BearishEngulfing);
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceKind {
    RegularBullish,
    RegularBearish,
    HiddenBullish,
    HiddenBearish,
}

/// Regular/hidden RSI divergence over the last `window` bars, comparing the
/// extremes of the two window halves.
pub fn rsi_divergence(closes: &[f64], rsis: &[f64], window: usize) -> Option<DivergenceKind> {
    if closes.len() < window || rsis.len() < window || closes.len() != rsis.len() {
        return None;
    }
    let closes = &closes[closes.len() - window..];
    let rsis = &rsis[rsis.len() - window..];
    let half = window / 2;

    let min_idx = |xs: &[f64]| -> usize {
        xs.iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0)
    };
    let max_idx = |xs: &[f64]| -> usize {
        xs.iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0)
    };

    // Lows for bullish variants.
    let l1 = min_idx(&closes[..half]);
    let l2 = half + min_idx(&closes[half..]);
    if closes[l2] < closes[l1] && rsis[l2] > rsis[l1] {
        return Some(DivergenceKind::RegularBullish);
    }
    if closes[l2] > closes[l1] && rsis[l2] < rsis[l1] {
        return Some(DivergenceKind::HiddenBullish);
    }

    // Highs for bearish variants.
    let h1 = max_idx(&closes[..half]);
    let h2 = half + max_idx(&closes[half..]);
    if closes[h2] > closes[h1] && rsis[h2] < rsis[h1] {
        return Some(DivergenceKind::RegularBearish);
    }
    if closes[h2] < closes[h1] && rsis[h2] > rsis[h1] {
        return Some(DivergenceKind::HiddenBearish);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
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
            quote_volume: Decimal::ZERO,
            trades: 100,
        }
    }

    fn flat_series(n: usize, price: f64) -> Vec<Kline> {
        (0..n)
            .map(|_| kline(price, price + 1.0, price - 1.0, price, 1000.0))
            .collect()
    }

    #[test]
    fn test_atr_constant_range() {
        // Every bar has TR = 2 against itself, so the mean is 2.
        let klines = flat_series(20, 100.0);
        let atr = atr(&klines, 14).unwrap();
        assert!((atr - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_requires_enough_bars() {
        assert!(atr(&flat_series(10, 100.0), 14).is_none());
    }

    #[test]
    fn test_vwap_flat_market() {
        let klines = flat_series(10, 100.0);
        let v = vwap(&klines).unwrap();
        assert!((v - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_volume_ratio_spike() {
        let mut klines = flat_series(21, 100.0);
        let last = klines.len() - 1;
        klines[last].volume = Decimal::from(3000);
        let ratio = volume_ratio(&klines, 20).unwrap();
        assert!((ratio - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_momentum_pct() {
        let mut klines = flat_series(5, 100.0);
        let last = klines.len() - 1;
        klines[last].close = Decimal::from(103);
        let m = momentum_pct(&klines, 3).unwrap();
        assert!((m - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_hammer_detection() {
        let mut klines = flat_series(25, 100.0);
        // Long lower wick, modest body near the top, volume above average.
        let last = klines.len() - 1;
        klines[last] = kline(100.0, 101.3, 95.0, 101.0, 5000.0);
        assert_eq!(detect_pattern(&klines), Some(CandlePattern::Hammer));
    }

    #[test]
    fn test_doji_detection() {
        let mut klines = flat_series(25, 100.0);
        let last = klines.len() - 1;
        klines[last] = kline(100.0, 102.0, 98.0, 100.05, 1000.0);
        assert_eq!(detect_pattern(&klines), Some(CandlePattern::Doji));
    }

    #[test]
    fn test_regular_bullish_divergence() {
        // Price makes a lower low while RSI makes a higher low.
        let closes = vec![
            100.0, 98.0, 95.0, 97.0, 99.0, 98.0, 96.0, 94.0, 96.0, 97.0, 98.0, 97.5, 96.5, 97.0,
        ];
        let rsis = vec![
            50.0, 40.0, 25.0, 35.0, 45.0, 42.0, 38.0, 33.0, 40.0, 44.0, 48.0, 46.0, 43.0, 45.0,
        ];
        assert_eq!(
            rsi_divergence(&closes, &rsis, 14),
            Some(DivergenceKind::RegularBullish)
        );
    }

    #[test]
    fn test_rsi_extremes() {
        // Monotone rising closes push RSI toward 100.
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let rsi = rsi_last(&closes, 14).unwrap();
        assert!(rsi > 70.0);
    }

    #[test]
    fn test_adx_needs_history() {
        assert!(adx(&flat_series(10, 100.0), 14).is_none());
        assert!(adx(&flat_series(40, 100.0), 14).is_some());
    }
}
