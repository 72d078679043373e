//! Pyramiding loop: adds half-size to winners once, then pulls the stop to
//! breakeven-or-better on the new average entry.

use crate::application::supervisor::HeartbeatRegistry;
use crate::config::ConfigHandle;
use crate::domain::ports::{ExchangeClient, Notifier, TradeRepository};
use crate::domain::types::{Direction, OrderParams, Trade};
use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info};

const CADENCE: Duration = Duration::from_secs(120);

pub struct PyramidingLoop {
    exchange: Arc<dyn ExchangeClient>,
    trades: Arc<dyn TradeRepository>,
    notifier: Arc<dyn Notifier>,
    config: ConfigHandle,
    heartbeats: Arc<HeartbeatRegistry>,
}

impl PyramidingLoop {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        trades: Arc<dyn TradeRepository>,
        notifier: Arc<dyn Notifier>,
        config: ConfigHandle,
        heartbeats: Arc<HeartbeatRegistry>,
    ) -> Self {
        Self {
            exchange,
            trades,
            notifier,
            config,
            heartbeats,
        }
    }

    pub async fn run(self: Arc<Self>, running: Arc<AtomicBool>) {
        let mut interval = tokio::time::interval(CADENCE);
        while running.load(Ordering::Relaxed) {
            interval.tick().await;
            self.heartbeats.beat("pyramiding");
            if let Err(e) = self.tick().await {
                error!("pyramiding loop error: {e}");
            }
        }
    }

    pub async fn tick(&self) -> Result<()> {
        let config = self.config.snapshot();
        for trade in self.trades.open_trades().await? {
            if trade.pyramided
                || trade.pnl_percentage < config.monitor.pyramiding_threshold_pct
            {
                continue;
            }
            if let Err(e) = self
                .pyramid(config.monitor.pyramiding_multiplier, trade)
                .await
            {
                error!("pyramiding attempt failed: {e}");
            }
        }
        Ok(())
    }

    async fn pyramid(&self, multiplier: f64, mut trade: Trade) -> Result<()> {
        let info = self.exchange.symbol_info(&trade.symbol).await?;
        let add_qty = info.round_qty_down(
            trade.quantity * Decimal::from_f64(multiplier).unwrap_or(Decimal::ZERO),
        );
        if add_qty <= Decimal::ZERO {
            return Ok(());
        }

        let price = self.exchange.symbol_price(&trade.symbol).await?;
        let order = OrderParams::market(&trade.symbol, trade.direction.entry_side(), add_qty);
        let ack = self.exchange.create_order(order).await?;
        let fill_price = if ack.avg_price > Decimal::ZERO {
            ack.avg_price
        } else {
            price
        };

        trade.entry_price = trade.weighted_entry(add_qty, fill_price);
        trade.quantity += add_qty;
        trade.pyramided = true;
        // Stop to breakeven-or-better on the blended entry.
        trade.stop_loss = match trade.direction {
            Direction::Long => trade.stop_loss.max(trade.entry_price),
            Direction::Short => trade.stop_loss.min(trade.entry_price),
        };
        self.trades.update(&trade).await?;

        info!(
            "pyramided {}: +{} @ {}, new entry {}, stop {}",
            trade.symbol, add_qty, fill_price, trade.entry_price, trade.stop_loss
        );
        self.notifier.notify(format!(
            "Pyramided {}: added {} at {} ({:.1}% in profit)",
            trade.symbol, add_qty, fill_price, trade.pnl_percentage
        ));
        Ok(())
    }
}
