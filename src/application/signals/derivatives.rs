//! Derivatives gate: funding-window blocks plus open-interest, taker-flow
//! and top-trader score adjustments. Fetch failures degrade to a neutral
//! assessment rather than dropping the signal.

use crate::config::SignalConfig;
use crate::domain::ports::ExchangeClient;
use crate::domain::types::Direction;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct DerivativesAssessment {
    /// Reason the entry must be blocked outright, if any.
    pub blocked: Option<String>,
    pub score_delta: i32,
    pub funding_rate: Option<f64>,
    pub minutes_to_funding: Option<i64>,
    pub oi_change_pct: Option<f64>,
    pub taker_ratio: Option<f64>,
}

pub struct DerivativesGate {
    exchange: Arc<dyn ExchangeClient>,
}

impl DerivativesGate {
    pub fn new(exchange: Arc<dyn ExchangeClient>) -> Self {
        Self { exchange }
    }

    pub async fn assess(
        &self,
        config: &SignalConfig,
        symbol: &str,
        direction: Direction,
    ) -> DerivativesAssessment {
        if !config.enable_funding_aware {
            return DerivativesAssessment::default();
        }

        let mut out = DerivativesAssessment::default();

        match self.exchange.premium_index(symbol).await {
            Ok(premium) => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                let minutes = premium.minutes_to_funding(now_ms);
                out.funding_rate = Some(premium.last_funding_rate);
                out.minutes_to_funding = Some(minutes);

                let adverse = match direction {
                    Direction::Long => premium.last_funding_rate >= config.funding_adverse_threshold,
                    Direction::Short => {
                        premium.last_funding_rate <= -config.funding_adverse_threshold
                    }
                };
                if adverse && minutes <= config.funding_block_window_minutes {
                    out.blocked = Some(format!(
                        "adverse funding {:.4}% with {}min to funding",
                        premium.last_funding_rate * 100.0,
                        minutes
                    ));
                    return out;
                }
            }
            Err(e) => debug!("premium index unavailable for {symbol}: {e}"),
        }

        match self
            .exchange
            .open_interest_history(symbol, &config.oi_change_period, config.oi_change_lookback)
            .await
        {
            Ok(history) if history.len() >= 2 => {
                let first = history
                    .first()
                    .map(|p| p.open_interest)
                    .unwrap_or_default();
                let last = history.last().map(|p| p.open_interest).unwrap_or_default();
                if first > rust_decimal::Decimal::ZERO {
                    let change = ((last - first) / first).to_f64().unwrap_or(0.0) * 100.0;
                    out.oi_change_pct = Some(change);
                    if change >= config.oi_change_min_abs {
                        out.score_delta += 5;
                    } else if change <= -config.oi_change_min_abs {
                        out.score_delta -= 5;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => debug!("open interest unavailable for {symbol}: {e}"),
        }

        match self
            .exchange
            .taker_long_short_ratio(symbol, &config.oi_change_period, 1)
            .await
        {
            Ok(points) => {
                if let Some(point) = points.last() {
                    let ratio = point.buy_sell_ratio;
                    out.taker_ratio = Some(ratio);
                    match direction {
                        Direction::Long => {
                            if ratio >= config.taker_ratio_long_min {
                                out.score_delta += 5;
                            } else if ratio < 1.0 {
                                out.score_delta -= 5;
                            }
                        }
                        Direction::Short => {
                            if ratio <= config.taker_ratio_short_max {
                                out.score_delta += 5;
                            } else if ratio > 1.0 {
                                out.score_delta -= 5;
                            }
                        }
                    }

                    if config.enable_top_trader_filter {
                        let strongly_aligned = match direction {
                            Direction::Long => ratio >= config.top_trader_min_bullish_ratio,
                            Direction::Short => ratio <= config.top_trader_max_bearish_ratio,
                        };
                        if strongly_aligned {
                            out.score_delta += config.top_trader_score_bonus as i32;
                        }
                    }
                }
            }
            Err(e) => debug!("taker ratio unavailable for {symbol}: {e}"),
        }

        out
    }
}
