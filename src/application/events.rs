//! Broadcast event bus. Loops publish lifecycle events and subscribe to what
//! they need, so the orchestrator, supervisor and monitor never hold direct
//! back-references to each other.

use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum BotEvent {
    CycleStarted {
        cycle_id: String,
    },
    CycleEnded {
        cycle_id: String,
        executed: usize,
        rejected: usize,
    },
    TradeOpened {
        trade_id: i64,
        symbol: String,
    },
    TradeClosed {
        trade_id: i64,
        symbol: String,
        pnl_pct: f64,
        reason: String,
    },
    DrawdownWarning {
        drawdown_pct: f64,
    },
    KillSwitchFired {
        drawdown_pct: f64,
    },
    LoopStalled {
        name: String,
        silent_secs: u64,
    },
    ErrorReported {
        source: String,
        message: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BotEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: BotEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(BotEvent::CycleStarted {
            cycle_id: "c1".into(),
        });
        match rx.recv().await.unwrap() {
            BotEvent::CycleStarted { cycle_id } => assert_eq!(cycle_id, "c1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        bus.publish(BotEvent::DrawdownWarning { drawdown_pct: 5.0 });
    }
}
