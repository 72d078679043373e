//! DCA loop: adds size to losing positions when the 1h RSI confirms the
//! knife has slowed, bounded by a per-symbol counter persisted in the cache.

use crate::application::supervisor::HeartbeatRegistry;
use crate::config::ConfigHandle;
use crate::domain::indicators::{closes, rsi_last};
use crate::domain::ports::{ExchangeClient, KvCache, Notifier, TradeRepository};
use crate::domain::types::{Direction, Interval, OrderParams, Trade};
use crate::infrastructure::cache::keys;
use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info};

const CADENCE: Duration = Duration::from_secs(60);
const DCA_COUNTER_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
const RSI_LONG_MAX: f64 = 35.0;
const RSI_SHORT_MIN: f64 = 65.0;

pub struct DcaLoop {
    exchange: Arc<dyn ExchangeClient>,
    trades: Arc<dyn TradeRepository>,
    cache: Arc<dyn KvCache>,
    notifier: Arc<dyn Notifier>,
    config: ConfigHandle,
    heartbeats: Arc<HeartbeatRegistry>,
}

impl DcaLoop {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        trades: Arc<dyn TradeRepository>,
        cache: Arc<dyn KvCache>,
        notifier: Arc<dyn Notifier>,
        config: ConfigHandle,
        heartbeats: Arc<HeartbeatRegistry>,
    ) -> Self {
        Self {
            exchange,
            trades,
            cache,
            notifier,
            config,
            heartbeats,
        }
    }

    pub async fn run(self: Arc<Self>, running: Arc<AtomicBool>) {
        let mut interval = tokio::time::interval(CADENCE);
        while running.load(Ordering::Relaxed) {
            interval.tick().await;
            self.heartbeats.beat("dca");
            if let Err(e) = self.tick().await {
                error!("dca loop error: {e}");
            }
        }
    }

    pub async fn tick(&self) -> Result<()> {
        let config = self.config.snapshot();
        if !config.monitor.dca_enabled {
            return Ok(());
        }

        for trade in self.trades.open_trades().await? {
            if trade.pnl_percentage >= config.monitor.dca_threshold_pct {
                continue;
            }
            // The cap lives on the TTL counter: a symbol's budget comes back
            // once the counter expires, not never.
            if self.dca_count(&trade.symbol).await >= config.monitor.max_dca_count as i64 {
                continue;
            }
            if let Err(e) = self.try_dca(config.monitor.dca_multiplier, trade).await {
                error!("dca attempt failed: {e}");
            }
        }
        Ok(())
    }

    async fn dca_count(&self, symbol: &str) -> i64 {
        self.cache
            .get_raw(&keys::dca_count(symbol))
            .await
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0)
    }

    async fn try_dca(&self, multiplier: f64, mut trade: Trade) -> Result<()> {
        let klines = self.exchange.klines(&trade.symbol, Interval::H1, 50).await?;
        let Some(rsi) = rsi_last(&closes(&klines), 14) else {
            return Ok(());
        };
        let confirmed = match trade.direction {
            Direction::Long => rsi < RSI_LONG_MAX,
            Direction::Short => rsi > RSI_SHORT_MIN,
        };
        if !confirmed {
            return Ok(());
        }

        let info = self.exchange.symbol_info(&trade.symbol).await?;
        let add_qty = info.round_qty_down(
            trade.quantity * Decimal::from_f64(multiplier).unwrap_or(Decimal::ONE),
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
        trade.dca_count += 1;
        self.trades.update(&trade).await?;

        let counter = self
            .cache
            .incr(&keys::dca_count(&trade.symbol), DCA_COUNTER_TTL)
            .await;
        info!(
            "DCA #{counter} on {}: +{} @ {}, new entry {}, rsi {:.1}",
            trade.symbol, add_qty, fill_price, trade.entry_price, rsi
        );
        self.notifier.notify(format!(
            "DCA on {}: added {} at {} (count {})",
            trade.symbol, add_qty, fill_price, trade.dca_count
        ));
        Ok(())
    }
}
