//! Global circuit breaker: consecutive losing closes pause new entries for a
//! cooldown; the kill switch latches until manual reset.

use crate::domain::errors::RiskRejection;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Normal,
    Tripped { until: Instant },
    Halted,
}

pub struct TradingCircuitBreaker {
    state: Mutex<(BreakerState, u32)>,
    loss_limit: u32,
    cooldown: Duration,
}

impl TradingCircuitBreaker {
    pub fn new(loss_limit: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new((BreakerState::Normal, 0)),
            loss_limit,
            cooldown,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, (BreakerState, u32)> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Gate consulted before every admission.
    pub fn check(&self) -> Result<(), RiskRejection> {
        let mut guard = self.lock();
        match guard.0 {
            BreakerState::Normal => Ok(()),
            BreakerState::Halted => Err(RiskRejection::KillSwitch),
            BreakerState::Tripped { until } => {
                let now = Instant::now();
                if now >= until {
                    info!("circuit breaker cooldown elapsed, resuming entries");
                    guard.0 = BreakerState::Normal;
                    guard.1 = 0;
                    Ok(())
                } else {
                    Err(RiskRejection::CircuitBreaker {
                        remaining_secs: (until - now).as_secs(),
                    })
                }
            }
        }
    }

    pub fn record_win(&self) {
        let mut guard = self.lock();
        guard.1 = 0;
    }

    pub fn record_loss(&self) {
        let mut guard = self.lock();
        guard.1 += 1;
        if guard.1 >= self.loss_limit && guard.0 == BreakerState::Normal {
            warn!(
                "{} consecutive losses, pausing entries for {:?}",
                guard.1, self.cooldown
            );
            guard.0 = BreakerState::Tripped {
                until: Instant::now() + self.cooldown,
            };
        }
    }

    /// Kill switch: latches until [`reset`](Self::reset).
    pub fn halt(&self) {
        let mut guard = self.lock();
        guard.0 = BreakerState::Halted;
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.lock().0, BreakerState::Halted)
    }

    pub fn reset(&self) {
        let mut guard = self.lock();
        guard.0 = BreakerState::Normal;
        guard.1 = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_after_limit_losses() {
        let breaker = TradingCircuitBreaker::new(3, Duration::from_secs(3600));
        breaker.record_loss();
        breaker.record_loss();
        assert!(breaker.check().is_ok());
        breaker.record_loss();
        assert!(matches!(
            breaker.check(),
            Err(RiskRejection::CircuitBreaker { .. })
        ));
    }

    #[test]
    fn test_win_resets_streak() {
        let breaker = TradingCircuitBreaker::new(3, Duration::from_secs(3600));
        breaker.record_loss();
        breaker.record_loss();
        breaker.record_win();
        breaker.record_loss();
        breaker.record_loss();
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn test_cooldown_expiry_resumes() {
        let breaker = TradingCircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_loss();
        assert!(breaker.check().is_err());
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn test_kill_switch_latches() {
        let breaker = TradingCircuitBreaker::new(3, Duration::from_millis(1));
        breaker.halt();
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(breaker.check(), Err(RiskRejection::KillSwitch)));
        assert!(breaker.is_halted());
        breaker.reset();
        assert!(breaker.check().is_ok());
    }
}
