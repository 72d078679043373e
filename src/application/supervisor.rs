//! Watchdog. Every long-running loop beats a named heartbeat at the top of
//! each iteration; the supervisor restarts loops whose heartbeat goes silent
//! past their threshold, recycles the bot on prolonged inactivity, and maps
//! known fatal log patterns to remedies.

use crate::application::events::{BotEvent, EventBus};
use crate::domain::ports::{Notifier, TradeRepository};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Default)]
pub struct HeartbeatRegistry {
    beats: StdMutex<HashMap<String, Instant>>,
}

impl HeartbeatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the owning loop at the top of each iteration.
    pub fn beat(&self, name: &str) {
        self.beats
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.to_string(), Instant::now());
    }

    pub fn elapsed(&self, name: &str) -> Option<Duration> {
        self.beats
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .map(|t| t.elapsed())
    }
}

pub type RespawnFn = Box<dyn Fn() -> JoinHandle<()> + Send + Sync>;

struct SupervisedLoop {
    name: String,
    threshold: Duration,
    respawn: RespawnFn,
    handle: JoinHandle<()>,
}

/// Remedy for a known fatal log pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remedy {
    RestartService,
    Rebuild,
    Advisory,
}

/// Catalogue of known fatal patterns observed in production logs.
pub fn diagnose(line: &str) -> Option<(Remedy, &'static str)> {
    const CATALOGUE: &[(&str, Remedy, &str)] = &[
        (
            "password authentication failed",
            Remedy::RestartService,
            "database credentials rejected, restart with fresh secrets",
        ),
        (
            "address already in use",
            Remedy::RestartService,
            "port conflict, stop the stale process first",
        ),
        (
            "cannot find module",
            Remedy::Rebuild,
            "missing dependency, rebuild the deployment",
        ),
        (
            "connection reset by peer",
            Remedy::Advisory,
            "network glitch, the retry layer should absorb it",
        ),
        (
            "invalid symbol",
            Remedy::Advisory,
            "symbol removed by the venue, scanner will drop it next cycle",
        ),
    ];

    let lowered = line.to_lowercase();
    CATALOGUE
        .iter()
        .find(|(pattern, _, _)| lowered.contains(pattern))
        .map(|(_, remedy, advice)| (*remedy, *advice))
}

pub struct Supervisor {
    registry: Arc<HeartbeatRegistry>,
    loops: StdMutex<Vec<SupervisedLoop>>,
    events: EventBus,
    trades: Arc<dyn TradeRepository>,
    notifier: Arc<dyn Notifier>,
    check_interval: Duration,
    inactive_after: Duration,
    last_activity: StdMutex<Instant>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<HeartbeatRegistry>,
        events: EventBus,
        trades: Arc<dyn TradeRepository>,
        notifier: Arc<dyn Notifier>,
        check_interval: Duration,
        inactive_after: Duration,
    ) -> Self {
        Self {
            registry,
            loops: StdMutex::new(Vec::new()),
            events,
            trades,
            notifier,
            check_interval,
            inactive_after,
            last_activity: StdMutex::new(Instant::now()),
        }
    }

    /// Register a loop and spawn it. The respawn closure restarts the loop
    /// when its heartbeat stalls.
    pub fn register(&self, name: &str, threshold: Duration, respawn: RespawnFn) {
        self.registry.beat(name);
        let handle = respawn();
        self.loops
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(SupervisedLoop {
                name: name.to_string(),
                threshold,
                respawn,
                handle,
            });
        info!("supervisor: registered loop '{name}'");
    }

    pub async fn run(self: Arc<Self>, running: Arc<AtomicBool>) {
        let mut interval = tokio::time::interval(self.check_interval);
        let mut error_rx = self.events.subscribe();

        while running.load(Ordering::Relaxed) {
            tokio::select! {
                _ = interval.tick() => {
                    self.registry.beat("supervisor");
                    self.check_loops();
                    self.check_inactivity().await;
                }
                event = error_rx.recv() => {
                    match event {
                        Ok(BotEvent::ErrorReported { source, message }) => {
                            if let Some((remedy, advice)) = diagnose(&message) {
                                warn!("supervisor: known failure in {source}: {advice} ({remedy:?})");
                                if remedy == Remedy::RestartService {
                                    self.restart_loop(&source);
                                }
                            }
                        }
                        Ok(BotEvent::TradeOpened { .. }) | Ok(BotEvent::TradeClosed { .. }) => {
                            *self.last_activity.lock().unwrap_or_else(|p| p.into_inner()) =
                                Instant::now();
                        }
                        Ok(_) => {}
                        Err(_) => {}
                    }
                }
            }
        }
    }

    fn check_loops(&self) {
        let mut loops = self.loops.lock().unwrap_or_else(|p| p.into_inner());
        for entry in loops.iter_mut() {
            let stalled_by_beat = self
                .registry
                .elapsed(&entry.name)
                .map(|e| e > entry.threshold)
                .unwrap_or(false);
            let finished = entry.handle.is_finished();

            if stalled_by_beat || finished {
                let silent = self
                    .registry
                    .elapsed(&entry.name)
                    .unwrap_or_default()
                    .as_secs();
                error!(
                    "supervisor: loop '{}' {} (silent {}s), restarting",
                    entry.name,
                    if finished { "exited" } else { "stalled" },
                    silent
                );
                self.events.publish(BotEvent::LoopStalled {
                    name: entry.name.clone(),
                    silent_secs: silent,
                });
                entry.handle.abort();
                entry.handle = (entry.respawn)();
                self.registry.beat(&entry.name);
            }
        }
    }

    fn restart_loop(&self, name: &str) {
        let mut loops = self.loops.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = loops.iter_mut().find(|l| l.name == name) {
            warn!("supervisor: force-restarting loop '{name}'");
            entry.handle.abort();
            entry.handle = (entry.respawn)();
            self.registry.beat(name);
        }
    }

    /// No trades today and no open positions past the threshold: recycle the
    /// trading loop and tell the operator.
    async fn check_inactivity(&self) {
        let idle_for = self
            .last_activity
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .elapsed();
        if idle_for < self.inactive_after {
            return;
        }

        let trades_today = self.trades.closed_today_count().await.unwrap_or(0);
        let open = self.trades.open_trades().await.map(|t| t.len()).unwrap_or(0);
        if trades_today == 0 && open == 0 {
            warn!(
                "supervisor: no trading activity for {:?}, recycling trading loop",
                idle_for
            );
            self.notifier.notify(format!(
                "Supervisor: bot idle for {} min, restarting trading loop",
                idle_for.as_secs() / 60
            ));
            self.restart_loop("trading");
        }
        *self.last_activity.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }
}
