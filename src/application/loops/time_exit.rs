//! Time-based exit: stagnant positions held past the holding limit with
//! sub-threshold profit are flattened to free the slot.

use crate::application::monitor::PositionMonitor;
use crate::application::supervisor::HeartbeatRegistry;
use crate::config::ConfigHandle;
use crate::domain::ports::TradeRepository;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info};

const CADENCE: Duration = Duration::from_secs(300);

pub struct TimeExitLoop {
    trades: Arc<dyn TradeRepository>,
    monitor: Arc<PositionMonitor>,
    config: ConfigHandle,
    heartbeats: Arc<HeartbeatRegistry>,
}

impl TimeExitLoop {
    pub fn new(
        trades: Arc<dyn TradeRepository>,
        monitor: Arc<PositionMonitor>,
        config: ConfigHandle,
        heartbeats: Arc<HeartbeatRegistry>,
    ) -> Self {
        Self {
            trades,
            monitor,
            config,
            heartbeats,
        }
    }

    pub async fn run(self: Arc<Self>, running: Arc<AtomicBool>) {
        let mut interval = tokio::time::interval(CADENCE);
        while running.load(Ordering::Relaxed) {
            interval.tick().await;
            self.heartbeats.beat("time_exit");
            if let Err(e) = self.tick().await {
                error!("time exit loop error: {e}");
            }
        }
    }

    pub async fn tick(&self) -> Result<()> {
        let config = self.config.snapshot();
        let now = Utc::now();

        for trade in self.trades.open_trades().await? {
            let held = trade.held_hours(now);
            if held < config.monitor.time_exit_hours
                || trade.pnl_percentage >= config.monitor.time_exit_min_profit_pct
            {
                continue;
            }
            info!(
                "{}: held {:.1}h with {:.2}% pnl, time exit",
                trade.symbol, held, trade.pnl_percentage
            );
            let price = trade.current_price;
            if let Err(e) = self.monitor.close_trade(trade, price, "Time Exit").await {
                error!("time exit close failed: {e}");
            }
        }
        Ok(())
    }
}
