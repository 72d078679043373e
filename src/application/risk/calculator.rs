//! Position-sizing math and the dynamic stop-loss model. Stateless except
//! for the performance streaks, which live in [`PerformanceState`].

use crate::domain::types::{Direction, SymbolInfo};
use anyhow::{Result, bail};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::collections::VecDeque;
use tracing::debug;

/// Rolling window used for the recent win rate.
const RECENT_WINDOW: usize = 20;

/// Consecutive wins/losses and recent win rate. Updated on every trade close,
/// mutually resetting.
#[derive(Debug, Default, Clone)]
pub struct PerformanceState {
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
    recent: VecDeque<bool>,
}

impl PerformanceState {
    pub fn update_performance(&mut self, win: bool) {
        if win {
            self.consecutive_wins += 1;
            self.consecutive_losses = 0;
        } else {
            self.consecutive_losses += 1;
            self.consecutive_wins = 0;
        }
        self.recent.push_back(win);
        while self.recent.len() > RECENT_WINDOW {
            self.recent.pop_front();
        }
    }

    /// Win rate over the last closed trades, absent until any close happened.
    pub fn win_rate(&self) -> Option<f64> {
        if self.recent.is_empty() {
            return None;
        }
        let wins = self.recent.iter().filter(|w| **w).count();
        Some(wins as f64 / self.recent.len() as f64)
    }
}

#[derive(Debug, Clone)]
pub struct SizingRequest<'a> {
    pub symbol_info: &'a SymbolInfo,
    pub direction: Direction,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub leverage: u32,
    pub balance: Decimal,
    pub open_margin: Decimal,
    pub score: u32,
    pub atr_pct: f64,
    pub max_total_capital_usage: f64,
}

#[derive(Debug, Clone)]
pub struct SizedPosition {
    pub quantity: Decimal,
    pub margin: Decimal,
    pub stop_loss: Decimal,
    pub potential_loss: Decimal,
    pub risk_pct: f64,
}

pub struct RiskCalculator;

impl RiskCalculator {
    /// Stop distance in percent: base 10%, tightened on winning streaks and
    /// high win rate, widened on losing streaks, scaled up in volatile
    /// markets, clamped to [5%, 15%].
    pub fn dynamic_stop_loss_pct(perf: &PerformanceState, atr_pct: f64) -> f64 {
        let mut sl = 10.0;

        if perf.consecutive_wins >= 5 {
            sl *= 0.60;
        } else if perf.consecutive_wins >= 3 {
            sl *= 0.75;
        }
        if perf.consecutive_losses >= 3 {
            sl *= 1.4;
        } else if perf.consecutive_losses >= 2 {
            sl *= 1.2;
        }
        if let Some(wr) = perf.win_rate() {
            if wr > 0.70 {
                sl *= 0.85;
            } else if wr < 0.40 {
                sl *= 1.15;
            }
        }
        if atr_pct > 3.0 {
            sl *= (1.0 + (atr_pct - 3.0) / 5.0).min(1.5);
        }

        sl.clamp(5.0, 15.0)
    }

    /// Margin fraction allowed for one position: 30% base, modulated by the
    /// current streak, floored by signal quality.
    fn margin_fraction(perf: &PerformanceState, score: u32) -> f64 {
        let mut fraction: f64 = 0.30;

        if perf.consecutive_wins >= 5 {
            fraction *= 1.3;
        } else if perf.consecutive_wins >= 3 {
            fraction *= 1.1;
        }
        if perf.consecutive_losses >= 3 {
            fraction *= 0.7;
        } else if perf.consecutive_losses >= 2 {
            fraction *= 0.9;
        }

        let floor = if score >= 80 {
            0.20
        } else if score >= 60 {
            0.15
        } else {
            0.05
        };
        fraction.max(floor).min(0.50)
    }

    /// Compute (quantity, margin) for a signal against current account state.
    pub fn position_size(perf: &PerformanceState, req: &SizingRequest<'_>) -> Result<SizedPosition> {
        if req.balance <= Decimal::ZERO {
            bail!("balance must be positive");
        }
        if req.entry <= Decimal::ZERO {
            bail!("entry price must be positive");
        }

        let usage = Decimal::from_f64(req.max_total_capital_usage).unwrap_or(Decimal::ONE);
        let available = req.balance * usage - req.open_margin;
        if available <= Decimal::ZERO {
            bail!("no capital available: open margin {} exhausts budget", req.open_margin);
        }

        // Clamp the stop to the dynamic bound when the signal's stop sits
        // further than the model allows.
        let entry_f = req.entry.to_f64().unwrap_or(0.0);
        let sl_dist_pct =
            ((req.entry - req.stop_loss).abs() / req.entry).to_f64().unwrap_or(0.0) * 100.0;
        let dynamic_sl = Self::dynamic_stop_loss_pct(perf, req.atr_pct);
        let stop_loss = if sl_dist_pct > dynamic_sl {
            let bounded = match req.direction {
                Direction::Long => entry_f * (1.0 - dynamic_sl / 100.0),
                Direction::Short => entry_f * (1.0 + dynamic_sl / 100.0),
            };
            debug!(
                "stop distance {:.2}% above dynamic bound {:.2}%, tightening",
                sl_dist_pct, dynamic_sl
            );
            Decimal::from_f64(bounded).unwrap_or(req.stop_loss)
        } else {
            req.stop_loss
        };

        let fraction = Self::margin_fraction(perf, req.score);
        let fraction_dec = Decimal::from_f64(fraction).unwrap_or(Decimal::ZERO);
        let max_margin = (req.balance * fraction_dec).min(available);

        let leverage = Decimal::from(req.leverage.max(1));
        let raw_qty = max_margin * leverage / req.entry;
        let quantity = req.symbol_info.round_qty_down(raw_qty);
        if quantity <= Decimal::ZERO {
            bail!("quantity rounds to zero at step {}", req.symbol_info.step_size);
        }
        let notional = quantity * req.entry;
        if notional < req.symbol_info.min_notional {
            bail!(
                "notional {} below venue minimum {}",
                notional,
                req.symbol_info.min_notional
            );
        }

        let margin = notional / leverage;
        let margin_share = (margin / req.balance).to_f64().unwrap_or(f64::MAX);
        // 0.2 percentage points of tolerance over the adjusted fraction.
        if margin_share > fraction + 0.002 {
            bail!(
                "margin share {:.4} exceeds allowed fraction {:.4}",
                margin_share,
                fraction
            );
        }

        let potential_loss = (req.entry - stop_loss).abs() * quantity;
        let risk_pct = (potential_loss / req.balance).to_f64().unwrap_or(0.0) * 100.0;

        Ok(SizedPosition {
            quantity,
            margin,
            stop_loss,
            potential_loss,
            risk_pct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::MockExchange;
    use rust_decimal_macros::dec;

    fn perf(wins: u32, losses: u32) -> PerformanceState {
        PerformanceState {
            consecutive_wins: wins,
            consecutive_losses: losses,
            ..Default::default()
        }
    }

    #[test]
    fn test_dynamic_sl_base() {
        let sl = RiskCalculator::dynamic_stop_loss_pct(&PerformanceState::default(), 1.0);
        assert!((sl - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_dynamic_sl_winning_streak_tightens() {
        assert!((RiskCalculator::dynamic_stop_loss_pct(&perf(3, 0), 1.0) - 7.5).abs() < 1e-9);
        assert!((RiskCalculator::dynamic_stop_loss_pct(&perf(5, 0), 1.0) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_dynamic_sl_losing_streak_widens() {
        assert!((RiskCalculator::dynamic_stop_loss_pct(&perf(0, 2), 1.0) - 12.0).abs() < 1e-9);
        assert!((RiskCalculator::dynamic_stop_loss_pct(&perf(0, 3), 1.0) - 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_dynamic_sl_clamped() {
        // Losing streak plus high volatility would push past 15% without the clamp.
        let sl = RiskCalculator::dynamic_stop_loss_pct(&perf(0, 3), 8.0);
        assert!((sl - 15.0).abs() < 1e-9);
        // Long winning streak with high win rate pushes below 5%.
        let mut hot = perf(5, 0);
        for _ in 0..10 {
            hot.update_performance(true);
        }
        let sl = RiskCalculator::dynamic_stop_loss_pct(&hot, 0.5);
        assert!(sl >= 5.0);
    }

    #[test]
    fn test_volatility_scaling_capped() {
        let base = RiskCalculator::dynamic_stop_loss_pct(&PerformanceState::default(), 1.0);
        let volatile = RiskCalculator::dynamic_stop_loss_pct(&PerformanceState::default(), 20.0);
        assert!((volatile - (base * 1.5).min(15.0)).abs() < 1e-9);
    }

    #[test]
    fn test_performance_streaks_mutually_reset() {
        let mut p = PerformanceState::default();
        p.update_performance(true);
        p.update_performance(true);
        assert_eq!(p.consecutive_wins, 2);
        p.update_performance(false);
        assert_eq!(p.consecutive_wins, 0);
        assert_eq!(p.consecutive_losses, 1);
    }

    #[test]
    fn test_position_size_happy_path() {
        let info = MockExchange::default_symbol_info("BTCUSDT");
        let req = SizingRequest {
            symbol_info: &info,
            direction: Direction::Long,
            entry: dec!(100),
            stop_loss: dec!(95),
            leverage: 10,
            balance: dec!(1000),
            open_margin: Decimal::ZERO,
            score: 80,
            atr_pct: 1.0,
            max_total_capital_usage: 0.90,
        };
        let sized = RiskCalculator::position_size(&PerformanceState::default(), &req).unwrap();
        // 30% of 1000 = 300 margin, x10 leverage / 100 = 30 units.
        assert_eq!(sized.quantity, dec!(30));
        assert_eq!(sized.margin, dec!(300));
        assert_eq!(sized.stop_loss, dec!(95));
        assert_eq!(sized.potential_loss, dec!(150));
        assert!((sized.risk_pct - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_position_size_rejects_exhausted_budget() {
        let info = MockExchange::default_symbol_info("BTCUSDT");
        let req = SizingRequest {
            symbol_info: &info,
            direction: Direction::Long,
            entry: dec!(100),
            stop_loss: dec!(95),
            leverage: 10,
            balance: dec!(1000),
            open_margin: dec!(900),
            score: 50,
            atr_pct: 1.0,
            max_total_capital_usage: 0.90,
        };
        assert!(RiskCalculator::position_size(&PerformanceState::default(), &req).is_err());
    }

    #[test]
    fn test_position_size_tightens_wide_stop() {
        let info = MockExchange::default_symbol_info("BTCUSDT");
        let req = SizingRequest {
            symbol_info: &info,
            direction: Direction::Long,
            entry: dec!(100),
            stop_loss: dec!(70), // 30% away, far beyond the 10% dynamic bound
            leverage: 10,
            balance: dec!(1000),
            open_margin: Decimal::ZERO,
            score: 80,
            atr_pct: 1.0,
            max_total_capital_usage: 0.90,
        };
        let sized = RiskCalculator::position_size(&PerformanceState::default(), &req).unwrap();
        assert_eq!(sized.stop_loss, dec!(90));
    }

    #[test]
    fn test_position_size_rejects_zero_balance() {
        let info = MockExchange::default_symbol_info("BTCUSDT");
        let req = SizingRequest {
            symbol_info: &info,
            direction: Direction::Long,
            entry: dec!(100),
            stop_loss: dec!(95),
            leverage: 10,
            balance: Decimal::ZERO,
            open_margin: Decimal::ZERO,
            score: 50,
            atr_pct: 1.0,
            max_total_capital_usage: 0.90,
        };
        assert!(RiskCalculator::position_size(&PerformanceState::default(), &req).is_err());
    }
}
