use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use mw_types::Subscription;
use mw_types::SubscriptionKey;
use mw_ws::ConnectionGate;
use mw_ws::DirectSink;
use mw_ws::Phase;
use mw_ws::FetchPipeline;
use mw_ws::ListenerStatus;
use mw_ws::NotificationSink;
use mw_ws::SearchListener;
use mw_ws::SearchListenerConfig;
use mw_ws::SessionProvider;

use crate::burst::BurstQueue;
use crate::burst::BurstSink;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Base websocket endpoint handed to every listener.
    pub ws_base: String,
    /// Connection attempts tolerated before the emergency throttle trips.
    pub max_global_attempts: u32,
    /// How long the emergency throttle holds once tripped.
    pub emergency_cooldown: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ws_base: String::new(),
            max_global_attempts: 20,
            emergency_cooldown: Duration::from_secs(300),
        }
    }
}

/// Periodic reconciler: owns the listener registry and drives every
/// lifecycle decision from `tick`, so all registry mutation happens on
/// one call path.
pub struct Orchestrator {
    config: OrchestratorConfig,
    gate: Arc<ConnectionGate>,
    session: Arc<dyn SessionProvider>,
    sink: Arc<dyn NotificationSink>,
    pipeline: Arc<FetchPipeline>,
    burst: Option<Arc<BurstQueue>>,
    listeners: Vec<SearchListener>,
    /// Keys waiting for a connection slot, oldest first, no duplicates.
    pending: VecDeque<SubscriptionKey>,
    global_attempts: u32,
    throttle_until: Option<Instant>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        gate: Arc<ConnectionGate>,
        session: Arc<dyn SessionProvider>,
        pipeline: Arc<FetchPipeline>,
        burst: Option<Arc<BurstQueue>>,
    ) -> Self {
        let sink: Arc<dyn NotificationSink> = match &burst {
            Some(queue) => Arc::new(BurstSink::new(Arc::clone(queue))),
            None => Arc::new(DirectSink::new(Arc::clone(&pipeline))),
        };
        Self {
            config,
            gate,
            session,
            sink,
            pipeline,
            burst,
            listeners: Vec::new(),
            pending: VecDeque::new(),
            global_attempts: 0,
            throttle_until: None,
        }
    }

    /// One reconciliation pass against the currently-desired
    /// subscriptions.
    pub fn tick(&mut self, desired: &[Subscription]) {
        self.reconcile(desired);
        self.dedup_listeners();
        self.drain_connection_queue();
        self.revive_listeners();
        self.drain_burst();
    }

    pub fn statuses(&self) -> Vec<ListenerStatus> {
        self.listeners.iter().map(SearchListener::status).collect()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Stop every listener; the registry empties on the next tick against
    /// an empty desired set, this just silences the sockets.
    pub fn shutdown(&self) {
        for listener in &self.listeners {
            listener.stop();
        }
    }

    /// Align the registry and pending queue with the active subscription
    /// set: drop what is no longer wanted, queue what is missing. Keys
    /// with an empty market or search id can never pass listener
    /// validation, so they are dropped here instead of being retried
    /// forever.
    fn reconcile(&mut self, desired: &[Subscription]) {
        let active: HashSet<&SubscriptionKey> = desired
            .iter()
            .filter(|s| s.is_active())
            .filter(|s| {
                if s.key.is_valid() {
                    return true;
                }
                tracing::debug!(key = %s.key, "subscription key is incomplete, ignoring");
                false
            })
            .map(|s| &s.key)
            .collect();

        self.listeners.retain(|listener| {
            if active.contains(listener.key()) {
                return true;
            }
            tracing::info!(key = %listener.key(), "subscription removed or disabled, stopping listener");
            listener.stop();
            false
        });
        self.pending.retain(|key| active.contains(key));

        for key in active {
            let tracked = self.listeners.iter().any(|l| l.key() == key) || self.pending.contains(key);
            if !tracked {
                tracing::debug!(%key, "queueing new subscription for connection");
                self.pending.push_back(key.clone());
            }
        }
    }

    /// Collapse accidental duplicates: for each key, the most recently
    /// created listener survives, older ones are stopped and dropped.
    fn dedup_listeners(&mut self) {
        let mut keep_index: HashMap<&SubscriptionKey, usize> = HashMap::new();
        for (index, listener) in self.listeners.iter().enumerate() {
            let entry = keep_index.entry(listener.key()).or_insert(index);
            if self.listeners[*entry].created_at() <= listener.created_at() {
                *entry = index;
            }
        }
        if keep_index.len() == self.listeners.len() {
            return;
        }

        let keep: HashSet<usize> = keep_index.into_values().collect();
        let mut index = 0;
        self.listeners.retain(|listener| {
            let kept = keep.contains(&index);
            if !kept {
                tracing::warn!(key = %listener.key(), "duplicate listener detected, stopping the older one");
                listener.stop();
            }
            index += 1;
            kept
        });
    }

    /// Admit at most one pending key per tick, and only when the global
    /// connection gate has a free slot.
    fn drain_connection_queue(&mut self) {
        if self.emergency_throttled() || !self.gate.is_open() {
            return;
        }
        let Some(key) = self.pending.pop_front() else {
            return;
        };

        let listener = SearchListener::new(
            key,
            SearchListenerConfig { ws_base: self.config.ws_base.clone() },
            Arc::clone(&self.session),
            Arc::clone(&self.gate),
            Arc::clone(&self.sink),
        );
        tracing::info!(key = %listener.key(), "starting listener");
        self.listeners.push(listener.clone());
        self.spawn_start(listener, false);
    }

    /// Restart at most one listener per tick: Error-phase listeners past
    /// their cooldown, plus Idle stragglers whose earlier begin was
    /// refused by the gate. Keys that cannot pass validation are never
    /// candidates, so a broken entry cannot shadow recoverable ones.
    fn revive_listeners(&mut self) {
        if self.emergency_throttled() || !self.gate.is_open() {
            return;
        }
        let candidate = self
            .listeners
            .iter()
            .find(|l| l.key().is_valid() && (l.ready_to_retry() || l.phase() == Phase::Idle))
            .cloned();
        if let Some(listener) = candidate {
            let reconnect = listener.phase() == Phase::Error;
            self.spawn_start(listener, reconnect);
        }
    }

    /// Synchronous begin (claims the gate slot and phase) plus a detached
    /// completion. `reconnect` marks Error-phase revivals, the only
    /// attempts counted against the emergency throttle; first-time
    /// connections never feed the counter.
    fn spawn_start(&mut self, listener: SearchListener, reconnect: bool) {
        match listener.try_begin() {
            Ok(Some(ticket)) => {
                if reconnect {
                    self.note_attempt();
                }
                tokio::spawn(listener.complete_supervised(ticket));
            }
            Ok(None) => {}
            Err(err) if err.is_refusal() => {
                tracing::debug!(key = %listener.key(), %err, "connection attempt deferred");
            }
            Err(err) => {
                tracing::error!(key = %listener.key(), %err, "listener cannot start");
            }
        }
    }

    fn note_attempt(&mut self) {
        self.global_attempts += 1;
        if self.global_attempts >= self.config.max_global_attempts {
            tracing::warn!(
                attempts = self.global_attempts,
                cooldown = ?self.config.emergency_cooldown,
                "global connection attempts exceeded, engaging emergency throttle"
            );
            self.throttle_until = Some(Instant::now() + self.config.emergency_cooldown);
        }
    }

    fn emergency_throttled(&mut self) -> bool {
        match self.throttle_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                tracing::info!("emergency throttle lifted, resuming connections");
                self.throttle_until = None;
                self.global_attempts = 0;
                false
            }
            None => false,
        }
    }

    /// Feed this tick's burst allowance into detached pipeline runs.
    fn drain_burst(&mut self) {
        let Some(queue) = &self.burst else {
            return;
        };
        for entry in queue.drain() {
            if entry.cancel.is_cancelled() {
                tracing::debug!(key = %entry.key, "listener stopped, discarding queued notification");
                continue;
            }
            let pipeline = Arc::clone(&self.pipeline);
            tokio::spawn(async move {
                pipeline.process(&entry.key, entry.batch, &entry.cancel).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use mw_quota::QuotaGuard;
    use mw_types::NotificationBatch;
    use mw_ws::StaticSession;

    use crate::burst::BurstEntry;

    fn test_pipeline() -> Arc<FetchPipeline> {
        let quota = Arc::new(QuotaGuard::new(10));
        let client = mw_http::FetchClient::new("http://127.0.0.1:9", Arc::clone(&quota)).unwrap();
        let (tx, _rx) = mpsc::channel(16);
        // The receiver is dropped: deliveries are discarded, which is fine
        // for registry-level tests.
        Arc::new(FetchPipeline::new(client, quota, Arc::new(StaticSession("sess".into())), tx))
    }

    fn orchestrator(config: OrchestratorConfig, gate_spacing: Duration, burst: Option<Arc<BurstQueue>>) -> Orchestrator {
        Orchestrator::new(
            OrchestratorConfig { ws_base: "ws://127.0.0.1:9".into(), ..config },
            Arc::new(ConnectionGate::new(gate_spacing)),
            Arc::new(StaticSession("sess".into())),
            test_pipeline(),
            burst,
        )
    }

    fn subs(ids: &[&str]) -> Vec<Subscription> {
        ids.iter().map(|id| Subscription::new("standard", *id)).collect()
    }

    #[tokio::test]
    async fn test_tick_creates_one_listener_per_key() {
        let mut orch = orchestrator(OrchestratorConfig::default(), Duration::ZERO, None);
        let desired = subs(&["s1"]);

        orch.tick(&desired);
        orch.tick(&desired);
        orch.tick(&desired);

        assert_eq!(orch.listener_count(), 1);
        assert_eq!(orch.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_inactive_subscriptions_never_connect() {
        let mut orch = orchestrator(OrchestratorConfig::default(), Duration::ZERO, None);

        let mut disabled = Subscription::new("standard", "s1");
        disabled.enabled = false;
        let mut group_disabled = Subscription::new("standard", "s2");
        group_disabled.group_enabled = false;

        orch.tick(&[disabled, group_disabled]);
        assert_eq!(orch.listener_count(), 0);
        assert_eq!(orch.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_disabling_a_subscription_stops_its_listener() {
        let mut orch = orchestrator(OrchestratorConfig::default(), Duration::ZERO, None);
        orch.tick(&subs(&["s1"]));
        assert_eq!(orch.listener_count(), 1);

        let mut sub = Subscription::new("standard", "s1");
        sub.group_enabled = false;
        orch.tick(&[sub]);
        assert_eq!(orch.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_orphaned_listener_is_removed() {
        let mut orch = orchestrator(OrchestratorConfig::default(), Duration::ZERO, None);
        orch.tick(&subs(&["s1"]));
        assert_eq!(orch.listener_count(), 1);

        orch.tick(&[]);
        assert_eq!(orch.listener_count(), 0);
        assert_eq!(orch.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_keeps_the_newest_listener() {
        let mut orch = orchestrator(OrchestratorConfig::default(), Duration::from_secs(3_600), None);
        let key = SubscriptionKey::new("standard", "s1");
        let make = |orch: &Orchestrator| {
            SearchListener::new(
                key.clone(),
                SearchListenerConfig { ws_base: "ws://127.0.0.1:9".into() },
                Arc::clone(&orch.session),
                Arc::clone(&orch.gate),
                Arc::clone(&orch.sink),
            )
        };

        let older = make(&orch);
        tokio::time::advance(Duration::from_secs(1)).await;
        let newer = make(&orch);
        orch.listeners.push(older);
        orch.listeners.push(newer.clone());

        orch.tick(&subs(&["s1"]));
        assert_eq!(orch.listener_count(), 1);
        assert_eq!(orch.listeners[0].created_at(), newer.created_at());
    }

    #[tokio::test]
    async fn test_connection_queue_drains_one_key_per_tick() {
        let mut orch = orchestrator(OrchestratorConfig::default(), Duration::from_secs(3_600), None);
        let desired = subs(&["s1", "s2", "s3"]);

        orch.tick(&desired);
        // First key claimed the gate; the rest wait for a slot.
        assert_eq!(orch.listener_count(), 1);
        assert_eq!(orch.pending_count(), 2);

        orch.tick(&desired);
        assert_eq!(orch.listener_count(), 1);
        assert_eq!(orch.pending_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connection_attempts_honor_global_spacing() {
        let spacing = Duration::from_millis(400);
        let mut orch = orchestrator(OrchestratorConfig::default(), spacing, None);
        let desired = subs(&["s1", "s2", "s3"]);

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            orch.tick(&desired);
            let stamps: Vec<_> = orch.listeners.iter().filter_map(SearchListener::last_attempt).collect();
            if stamps.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let mut stamps: Vec<Instant> = orch.listeners.iter().filter_map(SearchListener::last_attempt).collect();
        assert_eq!(stamps.len(), 3, "all three listeners should have attempted");
        stamps.sort();
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= spacing, "attempts closer than the spacing window");
        }
    }

    async fn wait_for_phase(listener: &SearchListener, phase: Phase) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while listener.phase() != phase {
            assert!(Instant::now() < deadline, "listener stuck in {}", listener.phase());
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_invalid_subscription_is_ignored() {
        let mut orch = orchestrator(OrchestratorConfig::default(), Duration::ZERO, None);

        orch.tick(&[Subscription::new("", "broken"), Subscription::new("standard", "  ")]);
        assert_eq!(orch.listener_count(), 0);
        assert_eq!(orch.pending_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_subscription_does_not_block_error_recovery() {
        let mut orch = orchestrator(OrchestratorConfig::default(), Duration::ZERO, None);
        let desired = vec![Subscription::new("", "broken"), Subscription::new("standard", "good")];

        orch.tick(&desired);
        // The empty-market entry never reaches the registry.
        assert_eq!(orch.listener_count(), 1);

        // Discard port: the handshake fails and schedules a 1s cooldown.
        let listener = orch.listeners[0].clone();
        wait_for_phase(&listener, Phase::Error).await;
        let first_attempt = listener.last_attempt();
        assert!(first_attempt.is_some());

        let deadline = Instant::now() + Duration::from_secs(5);
        while listener.last_attempt() == first_attempt && Instant::now() < deadline {
            orch.tick(&desired);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(listener.last_attempt() > first_attempt, "errored listener was never retried");
    }

    #[tokio::test]
    async fn test_cold_start_does_not_trip_the_throttle() {
        let config = OrchestratorConfig {
            max_global_attempts: 3,
            emergency_cooldown: Duration::from_secs(300),
            ..OrchestratorConfig::default()
        };
        let mut orch = orchestrator(config, Duration::ZERO, None);
        let desired = subs(&["s1", "s2", "s3", "s4", "s5", "s6"]);

        // More first-time connections than the attempt threshold; none of
        // them count, so nothing throttles.
        for _ in 0..8 {
            orch.tick(&desired);
        }
        assert_eq!(orch.listener_count(), 6);
        assert_eq!(orch.global_attempts, 0);
        assert!(orch.throttle_until.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_emergency_throttle_trips_on_repeated_failures() {
        let config = OrchestratorConfig {
            max_global_attempts: 2,
            emergency_cooldown: Duration::from_secs(2),
            ..OrchestratorConfig::default()
        };
        let mut orch = orchestrator(config, Duration::ZERO, None);
        let desired = subs(&["s1", "s2", "s3"]);

        for _ in 0..3 {
            orch.tick(&desired);
        }
        assert_eq!(orch.listener_count(), 3);

        for listener in orch.listeners.clone() {
            wait_for_phase(&listener, Phase::Error).await;
        }
        // Past every listener's 1s first-failure cooldown.
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        let before: Vec<_> = orch.listeners.iter().map(SearchListener::last_attempt).collect();
        orch.tick(&desired); // revival 1
        orch.tick(&desired); // revival 2 trips the throttle
        orch.tick(&desired); // refused
        let after: Vec<_> = orch.listeners.iter().map(SearchListener::last_attempt).collect();

        let advanced = before.iter().zip(&after).filter(|(b, a)| a > b).count();
        assert_eq!(advanced, 2, "the throttle should stop the third revival");
        assert!(orch.throttle_until.is_some());

        // The throttle lifts after its cooldown and the counter resets.
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        orch.tick(&desired);
        let resumed: Vec<_> = orch.listeners.iter().map(SearchListener::last_attempt).collect();
        assert!(after.iter().zip(&resumed).any(|(b, a)| a > b), "revivals should resume after the throttle lifts");
        assert!(orch.throttle_until.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_drain_discards_cancelled_entries() {
        let queue = Arc::new(BurstQueue::new(8, 8));
        let mut orch = orchestrator(OrchestratorConfig::default(), Duration::from_secs(3_600), Some(Arc::clone(&queue)));

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        queue.enqueue(BurstEntry {
            key: SubscriptionKey::new("standard", "s1"),
            batch: NotificationBatch::new(vec!["a".into()]),
            cancel: cancelled,
        });

        orch.tick(&[]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_listeners() {
        let mut orch = orchestrator(OrchestratorConfig::default(), Duration::ZERO, None);
        orch.tick(&subs(&["s1"]));
        assert_eq!(orch.listener_count(), 1);

        orch.shutdown();
        for status in orch.statuses() {
            assert!(matches!(status.phase, Phase::Idle));
        }
    }
}
