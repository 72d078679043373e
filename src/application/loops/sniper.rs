//! Sniper loop: short-duration scalps on mid-cap movers, using the extra
//! slot budget and a reduced per-trade risk.

use crate::application::execution::{OrderExecutor, sniper_signal};
use crate::application::scanner::MarketScanner;
use crate::application::supervisor::HeartbeatRegistry;
use crate::config::ConfigHandle;
use crate::domain::ports::{ExchangeClient, TradeRepository};
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info};

const CADENCE: Duration = Duration::from_secs(120);

pub struct SniperLoop {
    exchange: Arc<dyn ExchangeClient>,
    trades: Arc<dyn TradeRepository>,
    scanner: Arc<MarketScanner>,
    executor: Arc<OrderExecutor>,
    config: ConfigHandle,
    heartbeats: Arc<HeartbeatRegistry>,
}

impl SniperLoop {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        trades: Arc<dyn TradeRepository>,
        scanner: Arc<MarketScanner>,
        executor: Arc<OrderExecutor>,
        config: ConfigHandle,
        heartbeats: Arc<HeartbeatRegistry>,
    ) -> Self {
        Self {
            exchange,
            trades,
            scanner,
            executor,
            config,
            heartbeats,
        }
    }

    pub async fn run(self: Arc<Self>, running: Arc<AtomicBool>) {
        let mut interval = tokio::time::interval(CADENCE);
        while running.load(Ordering::Relaxed) {
            interval.tick().await;
            self.heartbeats.beat("sniper");
            if let Err(e) = self.tick().await {
                error!("sniper loop error: {e}");
            }
        }
    }

    pub async fn tick(&self) -> Result<()> {
        let config = self.config.snapshot();
        let open = self.trades.open_trades().await?;
        let max = config.risk.max_positions + config.sniper.extra_slots;
        let free_slots = max.saturating_sub(open.len());
        if free_slots == 0 {
            return Ok(());
        }

        let candidates = self.scanner.sniper_candidates(free_slots).await?;
        let balance = self.exchange.account_balance().await?;
        let mut open_count = open.len();

        for candidate in candidates {
            if open.iter().any(|t| t.symbol == candidate.symbol) {
                continue;
            }
            let price = match self.exchange.symbol_price(&candidate.symbol).await {
                Ok(p) => p,
                Err(e) => {
                    error!("sniper: price unavailable for {}: {e}", candidate.symbol);
                    continue;
                }
            };
            let signal = sniper_signal(
                &candidate.symbol,
                price,
                config.sniper.default_leverage,
                config.sniper.tp_pct,
                config.sniper.sl_pct,
                config.sniper.risk_per_trade * 100.0,
            );
            match self
                .executor
                .execute_signal(&signal, balance.total, open_count, true)
                .await
            {
                Ok(outcome) => {
                    open_count += 1;
                    info!(
                        "sniper entry {} qty {} @ {} (24h change {:+.1}%)",
                        candidate.symbol,
                        outcome.quantity,
                        outcome.avg_fill,
                        candidate.price_change_pct
                    );
                }
                Err(e) => {
                    info!("sniper entry rejected for {}: {e}", candidate.symbol);
                }
            }
            if open_count >= max {
                break;
            }
        }
        Ok(())
    }
}
