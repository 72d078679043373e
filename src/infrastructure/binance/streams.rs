//! WebSocket streams: user-data (listen key lifecycle) and the mini-ticker
//! array stream that keeps the price cache warm.
//!
//! Both loops reconnect on error with a 5 s backoff and respect the shared
//! `running` flag. The user stream keepalive fires every 25 minutes.

use super::client::BinanceClient;
use crate::domain::ports::{KvCache, cache_get, cache_set};
use crate::infrastructure::cache::keys;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25 * 60);

/// Backoff with up to one second of jitter so parallel streams do not
/// reconnect in lockstep after a shared network drop.
fn reconnect_delay() -> Duration {
    RECONNECT_BACKOFF + Duration::from_millis(rand::random_range(0..1000u64))
}
/// WS-sourced prices outlive the REST price TTL slightly.
const WS_PRICE_TTL: Duration = Duration::from_secs(10);

/// Account/order push events surfaced to the application.
#[derive(Debug, Clone)]
pub enum UserStreamEvent {
    OrderUpdate {
        symbol: String,
        status: String,
        avg_price: Decimal,
    },
    AccountUpdate,
}

pub struct UserDataStream {
    client: Arc<BinanceClient>,
    running: Arc<AtomicBool>,
    last_event_at_ms: Arc<AtomicI64>,
    events_tx: tokio::sync::mpsc::Sender<UserStreamEvent>,
}

impl UserDataStream {
    pub fn new(
        client: Arc<BinanceClient>,
        running: Arc<AtomicBool>,
        events_tx: tokio::sync::mpsc::Sender<UserStreamEvent>,
    ) -> Self {
        Self {
            client,
            running,
            last_event_at_ms: Arc::new(AtomicI64::new(0)),
            events_tx,
        }
    }

    pub fn last_event_at_ms(&self) -> Arc<AtomicI64> {
        self.last_event_at_ms.clone()
    }

    pub async fn run(self) {
        while self.running.load(Ordering::Relaxed) {
            match self.session().await {
                Ok(()) => info!("user data stream ended cleanly"),
                Err(e) => warn!("user data stream error: {e}"),
            }
            if self.running.load(Ordering::Relaxed) {
                tokio::time::sleep(reconnect_delay()).await;
            }
        }
        let _ = self.client.user_stream_close().await;
    }

    async fn session(&self) -> anyhow::Result<()> {
        let listen_key = self.client.user_stream_start().await?;
        let url = format!("{}/ws/{}", self.client.ws_base(), listen_key);
        let (ws, _) = connect_async(url.as_str()).await?;
        info!("user data stream connected");
        let (mut sink, mut stream) = ws.split();

        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await; // first tick fires immediately

        loop {
            if !self.running.load(Ordering::Relaxed) {
                return Ok(());
            }
            tokio::select! {
                _ = keepalive.tick() => {
                    if let Err(e) = self.client.user_stream_keepalive().await {
                        warn!("listen key keepalive failed: {e}");
                    }
                }
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.last_event_at_ms
                                .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
                            self.dispatch(&text).await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = sink.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => anyhow::bail!("ws read error: {e}"),
                        None => anyhow::bail!("ws closed"),
                    }
                }
            }
        }
    }

    async fn dispatch(&self, text: &str) {
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(rename = "e")]
            event_type: String,
            #[serde(rename = "o", default)]
            order: Option<serde_json::Value>,
        }

        let Ok(envelope) = serde_json::from_str::<Envelope>(text) else {
            debug!("unparsed user stream frame: {:.120}", text);
            return;
        };

        match envelope.event_type.as_str() {
            "ORDER_TRADE_UPDATE" => {
                if let Some(order) = envelope.order {
                    let symbol = order.get("s").and_then(|v| v.as_str()).unwrap_or_default();
                    let status = order.get("X").and_then(|v| v.as_str()).unwrap_or_default();
                    let avg_price = order
                        .get("ap")
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse::<Decimal>().ok())
                        .unwrap_or(Decimal::ZERO);
                    let _ = self
                        .events_tx
                        .try_send(UserStreamEvent::OrderUpdate {
                            symbol: symbol.to_string(),
                            status: status.to_string(),
                            avg_price,
                        });
                }
            }
            "ACCOUNT_UPDATE" => {
                // Balance changed on the venue: drop the cached value so the
                // next read is fresh.
                self.client.invalidate_balance_cache().await;
                let _ = self.events_tx.try_send(UserStreamEvent::AccountUpdate);
            }
            _ => {}
        }
    }
}

/// `!miniTicker@arr` consumer refreshing the price cache. The write path
/// keeps only the latest price per symbol, so a slow cache writer drops
/// intermediate ticks instead of queueing them.
pub struct MiniTickerStream {
    ws_base_url: String,
    cache: Arc<dyn KvCache>,
    running: Arc<AtomicBool>,
}

impl MiniTickerStream {
    pub fn new(ws_base_url: String, cache: Arc<dyn KvCache>, running: Arc<AtomicBool>) -> Self {
        Self {
            ws_base_url,
            cache,
            running,
        }
    }

    pub async fn run(self) {
        while self.running.load(Ordering::Relaxed) {
            if let Err(e) = self.session().await {
                warn!("mini ticker stream error: {e}");
            }
            if self.running.load(Ordering::Relaxed) {
                tokio::time::sleep(reconnect_delay()).await;
            }
        }
    }

    async fn session(&self) -> anyhow::Result<()> {
        #[derive(Deserialize)]
        struct MiniTicker {
            #[serde(rename = "s")]
            symbol: String,
            #[serde(rename = "c")]
            close: String,
        }

        let url = format!("{}/ws/!miniTicker@arr", self.ws_base_url);
        let (ws, _) = connect_async(url.as_str()).await?;
        info!("mini ticker stream connected");
        let (mut sink, mut stream) = ws.split();

        while self.running.load(Ordering::Relaxed) {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let Ok(tickers) = serde_json::from_str::<Vec<MiniTicker>>(&text) else {
                        continue;
                    };
                    // Latest-by-symbol: later entries in one frame win.
                    for t in tickers {
                        if let Ok(price) = t.close.parse::<Decimal>() {
                            if price > Decimal::ZERO {
                                let key = keys::price(&t.symbol);
                                if let Some(cached) =
                                    cache_get::<Decimal>(self.cache.as_ref(), &key).await
                                    && crate::infrastructure::cache::is_price_gap(cached, price)
                                {
                                    // Gap event: the stale entry must not be
                                    // served even for the rest of its TTL.
                                    warn!(
                                        "price gap on {}: cached {} vs fresh {}",
                                        t.symbol, cached, price
                                    );
                                    self.cache.invalidate(&key).await;
                                }
                                cache_set(self.cache.as_ref(), &key, &price, WS_PRICE_TTL).await;
                            }
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => anyhow::bail!("ws read error: {e}"),
                None => anyhow::bail!("ws closed"),
            }
        }
        Ok(())
    }
}
