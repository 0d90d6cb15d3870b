//! Liveness supervision.
//!
//! One timer sweeps the whole connection table instead of one timer per
//! connection. Each sweep settles the previous probe first (a probe still
//! outstanding past the timeout counts as missed), evicts connections at
//! the missed threshold, then probes the survivors. Any liveness signal
//! from the peer resets the missed count.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{ChannelMessage, ConnectionManager, DropCause};

/// Heartbeat tuning. Probing is off by default; enabling it is an
/// operator decision because it evicts slow clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Whether the supervisor probes at all.
    pub enabled: bool,
    /// Milliseconds between sweeps.
    pub interval_ms: u64,
    /// Milliseconds an outstanding probe may wait before counting as missed.
    pub probe_timeout_ms: u64,
    /// Consecutive missed probes that trigger eviction.
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 30_000,
            probe_timeout_ms: 5_000,
            max_missed: 3,
        }
    }
}

/// What one sweep did, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub probed: usize,
    pub evicted: usize,
}

/// Drives probing and eviction over a [`ConnectionManager`].
pub struct HeartbeatSupervisor {
    manager: Arc<ConnectionManager>,
    config: HeartbeatConfig,
}

impl HeartbeatSupervisor {
    #[must_use]
    pub const fn new(manager: Arc<ConnectionManager>, config: HeartbeatConfig) -> Self {
        Self { manager, config }
    }

    /// Run one sweep over every live connection.
    ///
    /// Split out from the timer loop so tests can drive sweeps directly.
    pub fn sweep(&self) -> SweepOutcome {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let timeout_ms = i64::try_from(self.config.probe_timeout_ms).unwrap_or(i64::MAX);
        let mut outcome = SweepOutcome::default();

        for entry in self.manager.entries() {
            use std::sync::atomic::Ordering;

            // Settle the previous probe: still outstanding past the
            // timeout means the peer missed it.
            let outstanding = entry.last_probe_ms.load(Ordering::SeqCst);
            let mut missed = entry.missed_probes.load(Ordering::SeqCst);
            if outstanding > 0 && now_ms - outstanding >= timeout_ms {
                missed = entry.missed_probes.fetch_add(1, Ordering::SeqCst) + 1;
            }

            if missed >= self.config.max_missed {
                tracing::info!(
                    tenant = %entry.tenant_id,
                    connection = %entry.id,
                    missed,
                    "heartbeat threshold reached"
                );
                self.manager.remove(entry.id, DropCause::HeartbeatTimeout);
                outcome.evicted += 1;
                continue;
            }

            match entry.channel.send(ChannelMessage::Ping) {
                Ok(()) => {
                    entry.last_probe_ms.store(now_ms, Ordering::SeqCst);
                    self.manager.note_probe_sent();
                    outcome.probed += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        tenant = %entry.tenant_id,
                        connection = %entry.id,
                        %error,
                        "heartbeat probe failed"
                    );
                    self.manager.remove(entry.id, DropCause::TransportError);
                    outcome.evicted += 1;
                }
            }
        }

        outcome
    }

    /// Sweep on the configured interval until `shutdown` flips to `true`.
    ///
    /// Returns immediately when heartbeats are disabled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            tracing::debug!("heartbeat supervision disabled");
            return;
        }
        tracing::info!(
            interval_ms = self.config.interval_ms,
            max_missed = self.config.max_missed,
            "heartbeat supervision started"
        );

        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so connections get a
        // full interval before their first probe.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.sweep();
                    if outcome.evicted > 0 {
                        tracing::info!(
                            probed = outcome.probed,
                            evicted = outcome.evicted,
                            "heartbeat sweep evicted connections"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("heartbeat supervision stopped");
    }

    /// Spawn the timer loop on the current runtime.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> HeartbeatHandle {
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown));
        HeartbeatHandle { stop, task }
    }
}

/// Handle to a running supervisor loop.
pub struct HeartbeatHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::{ChannelMessage, RecordingChannel, RegistryPolicy, TenantRecord, TenantRegistry};

    fn fixture(config: HeartbeatConfig) -> (Arc<ConnectionManager>, HeartbeatSupervisor) {
        let registry = Arc::new(TenantRegistry::in_memory(RegistryPolicy::default()));
        registry.upsert("t", TenantRecord::new());
        let manager = Arc::new(ConnectionManager::new(registry));
        let supervisor = HeartbeatSupervisor::new(manager.clone(), config);
        (manager, supervisor)
    }

    fn instant_timeout() -> HeartbeatConfig {
        HeartbeatConfig {
            enabled: true,
            probe_timeout_ms: 0,
            max_missed: 3,
            ..HeartbeatConfig::default()
        }
    }

    #[test]
    fn silent_connection_evicted_at_exact_threshold() {
        let (manager, supervisor) = fixture(instant_timeout());
        let channel = Arc::new(RecordingChannel::new());
        manager.admit("t", channel.clone()).unwrap();

        // Sweep 1 probes; sweeps 2 and 3 count misses 1 and 2 and re-probe.
        for _ in 0..3 {
            let outcome = supervisor.sweep();
            assert_eq!(outcome, SweepOutcome { probed: 1, evicted: 0 });
        }
        assert_eq!(manager.count("t"), 1);

        // Sweep 4 settles the third miss and evicts.
        let outcome = supervisor.sweep();
        assert_eq!(outcome, SweepOutcome { probed: 0, evicted: 1 });
        assert_eq!(manager.count("t"), 0);
        assert!(channel.is_closed());
        assert_eq!(channel.sent(), vec![ChannelMessage::Ping; 3]);
        assert_eq!(manager.stats().probes_sent, 3);
    }

    #[test]
    fn liveness_signal_restarts_the_count() {
        let (manager, supervisor) = fixture(instant_timeout());
        let channel = Arc::new(RecordingChannel::new());
        let id = manager.admit("t", channel.clone()).unwrap();

        supervisor.sweep();
        supervisor.sweep();
        // Two probes outstanding-and-missed would be fatal soon; a pong
        // clears the slate.
        manager.record_liveness(id);

        for _ in 0..3 {
            let outcome = supervisor.sweep();
            assert_eq!(outcome.evicted, 0);
        }
        assert_eq!(manager.count("t"), 1);
    }

    #[test]
    fn responsive_connection_never_accrues_misses() {
        let (manager, supervisor) = fixture(HeartbeatConfig {
            enabled: true,
            // Probe never times out within the test.
            probe_timeout_ms: 60_000,
            max_missed: 3,
            ..HeartbeatConfig::default()
        });
        let channel = Arc::new(RecordingChannel::new());
        manager.admit("t", channel).unwrap();

        for _ in 0..10 {
            assert_eq!(supervisor.sweep().evicted, 0);
        }
        assert_eq!(manager.count("t"), 1);
    }

    #[test]
    fn dead_transport_dropped_on_probe() {
        let (manager, supervisor) = fixture(instant_timeout());
        let channel = Arc::new(RecordingChannel::new());
        manager.admit("t", channel.clone()).unwrap();
        channel.fail_sends(true);

        let outcome = supervisor.sweep();
        assert_eq!(outcome, SweepOutcome { probed: 0, evicted: 1 });
        assert_eq!(manager.count("t"), 0);
    }

    #[tokio::test]
    async fn disabled_supervisor_exits_immediately() {
        let (_, supervisor) = fixture(HeartbeatConfig::default());
        let handle = Arc::new(supervisor).spawn();
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_an_enabled_loop() {
        let (_, supervisor) = fixture(HeartbeatConfig {
            enabled: true,
            interval_ms: 10,
            ..HeartbeatConfig::default()
        });
        let handle = Arc::new(supervisor).spawn();
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.shutdown().await;
    }
}
