use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_util::sync::CancellationToken;
use url::Url;

use mw_http::fetch::SESSION_COOKIE;
use mw_types::NotificationEnvelope;
use mw_types::SubscriptionKey;

use crate::backoff::BackoffSchedule;
use crate::error::ListenerError;
use crate::error::Result;
use crate::frame;
use crate::gate::ConnectionGate;
use crate::sink::NotificationSink;
use crate::sink::SessionProvider;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Listener lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Running,
    Error,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Running => "running",
            Phase::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SearchListenerConfig {
    /// Base websocket endpoint; the subscribe URL is
    /// `{ws_base}/{market}/{search_id}`.
    pub ws_base: String,
}

/// Snapshot for the status reader.
#[derive(Debug, Clone)]
pub struct ListenerStatus {
    pub key: SubscriptionKey,
    pub phase: Phase,
    pub attempts: u32,
    pub last_error: Option<Instant>,
}

/// Claim on a connection attempt, produced by [`SearchListener::try_begin`]
/// and consumed by [`SearchListener::complete_start`]. Splitting the two
/// keeps the orchestrator tick synchronous: the gate slot and phase
/// transition happen inline, only the handshake detaches.
pub struct StartTicket {
    delay: Duration,
    cancel: CancellationToken,
    generation: u64,
    session: String,
}

struct ListenerShared {
    phase: Phase,
    backoff: BackoffSchedule,
    last_error: Option<Instant>,
    /// Incremented by every begin and stop; stamped into each spawned
    /// receive loop so a stale loop can never mutate current state.
    generation: u64,
    cancel: CancellationToken,
}

struct Inner {
    key: SubscriptionKey,
    config: SearchListenerConfig,
    session: Arc<dyn SessionProvider>,
    gate: Arc<ConnectionGate>,
    sink: Arc<dyn NotificationSink>,
    created_at: Instant,
    shared: Mutex<ListenerShared>,
}

/// One live-search listener: a persistent duplex connection plus the
/// connect/receive/error/retry state machine around it. Cheap to clone;
/// all clones share state.
#[derive(Clone)]
pub struct SearchListener {
    inner: Arc<Inner>,
}

impl SearchListener {
    pub fn new(
        key: SubscriptionKey,
        config: SearchListenerConfig,
        session: Arc<dyn SessionProvider>,
        gate: Arc<ConnectionGate>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                key,
                config,
                session,
                gate,
                sink,
                created_at: Instant::now(),
                shared: Mutex::new(ListenerShared {
                    phase: Phase::Idle,
                    backoff: BackoffSchedule::new(),
                    last_error: None,
                    generation: 0,
                    cancel: CancellationToken::new(),
                }),
            }),
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.inner.key
    }

    pub fn created_at(&self) -> Instant {
        self.inner.created_at
    }

    pub fn phase(&self) -> Phase {
        self.inner.shared.lock().phase
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.inner.shared.lock().backoff.last_attempt()
    }

    pub fn status(&self) -> ListenerStatus {
        let shared = self.inner.shared.lock();
        ListenerStatus {
            key: self.inner.key.clone(),
            phase: shared.phase,
            attempts: shared.backoff.attempts(),
            last_error: shared.last_error,
        }
    }

    /// Whether an Error-phase listener is past its retry cooldown.
    pub fn ready_to_retry(&self) -> bool {
        let shared = self.inner.shared.lock();
        shared.phase == Phase::Error && !shared.backoff.in_cooldown()
    }

    /// Synchronous prologue of a connection attempt.
    ///
    /// `Ok(None)` means already Connecting/Running (a no-op, per the
    /// state machine). Validation failures schedule no retry; cooldown
    /// and gate refusals leave the listener untouched for a later tick.
    /// On success the phase is already Connecting and the global gate
    /// slot is claimed, and the caller must run [`Self::complete_start`].
    pub fn try_begin(&self) -> Result<Option<StartTicket>> {
        let mut shared = self.inner.shared.lock();
        if matches!(shared.phase, Phase::Connecting | Phase::Running) {
            return Ok(None);
        }
        if !self.inner.key.is_valid() {
            return Err(ListenerError::MissingConfig("market or search id"));
        }
        let Some(session) = self.inner.session.session() else {
            return Err(ListenerError::MissingConfig("session credential"));
        };
        if shared.backoff.in_cooldown() {
            return Err(ListenerError::CooldownActive);
        }
        if !self.inner.gate.try_acquire() {
            return Err(ListenerError::GlobalSpacing);
        }

        shared.phase = Phase::Connecting;
        // Decay applies against the previous attempt gap, then the new
        // attempt is stamped.
        let delay = shared.backoff.scheduled_delay();
        shared.backoff.record_attempt();
        shared.generation += 1;
        shared.cancel = CancellationToken::new();

        Ok(Some(StartTicket { delay, cancel: shared.cancel.clone(), generation: shared.generation, session }))
    }

    /// Async half of a connection attempt: sleep the scheduled backoff,
    /// perform the handshake, spawn the receive loop.
    pub async fn complete_start(&self, ticket: StartTicket) -> Result<()> {
        let StartTicket { delay, cancel, generation, session } = ticket;

        if !delay.is_zero() {
            tracing::info!(key = %self.inner.key, ?delay, "delaying connection attempt");
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.finish(generation, Phase::Idle, false);
                    return Err(ListenerError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let request = self.subscribe_request(&session)?;
        match connect_async(request).await {
            Ok((ws, _response)) => {
                {
                    let mut shared = self.inner.shared.lock();
                    if shared.generation != generation {
                        // Stopped while handshaking; drop the connection.
                        return Ok(());
                    }
                    shared.phase = Phase::Running;
                    shared.backoff.reset();
                }
                tracing::info!(key = %self.inner.key, "live search connected");

                let listener = self.clone();
                tokio::spawn(async move {
                    listener.receive_loop(ws, cancel, generation).await;
                });
                Ok(())
            }
            Err(err) => {
                tracing::error!(key = %self.inner.key, %err, "websocket handshake failed");
                self.finish(generation, Phase::Error, true);
                Err(ListenerError::Handshake(err))
            }
        }
    }

    /// Full connection attempt; no-op when already Connecting/Running.
    pub async fn start(&self) -> Result<()> {
        match self.try_begin()? {
            Some(ticket) => self.complete_start(ticket).await,
            None => Ok(()),
        }
    }

    /// Task-boundary wrapper for detached completions: refusals log at
    /// debug, real failures at error, nothing propagates.
    pub async fn complete_supervised(self, ticket: StartTicket) {
        match self.complete_start(ticket).await {
            Ok(()) => {}
            Err(err) if err.is_refusal() => {
                tracing::debug!(key = %self.inner.key, %err, "connection attempt deferred");
            }
            Err(err) => {
                tracing::error!(key = %self.inner.key, %err, "connection attempt failed");
            }
        }
    }

    /// Idempotent stop: cancel the receive loop, orphan any in-flight
    /// start, mark the listener idle. Close errors are logged by the
    /// receive loop, never propagated.
    pub fn stop(&self) {
        let mut shared = self.inner.shared.lock();
        shared.cancel.cancel();
        shared.generation += 1;
        shared.phase = Phase::Idle;
    }

    fn subscribe_request(&self, session: &str) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let url = Url::parse(&format!(
            "{}/{}/{}",
            self.inner.config.ws_base.trim_end_matches('/'),
            self.inner.key.market,
            self.inner.key.search_id
        ))?;

        let mut request = url.as_str().into_client_request()?;
        let cookie = HeaderValue::from_str(&format!("{SESSION_COOKIE}={session}"))
            .map_err(|_| ListenerError::MissingConfig("session credential"))?;
        request.headers_mut().insert("Cookie", cookie);
        Ok(request)
    }

    async fn receive_loop(self, mut ws: WsStream, cancel: CancellationToken, generation: u64) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(err) = ws.close(None).await {
                        tracing::debug!(key = %self.inner.key, %err, "close after stop failed");
                    }
                    self.finish(generation, Phase::Idle, false);
                    return;
                }
                incoming = ws.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_payload(text.as_str(), &cancel).await,
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(key = %self.inner.key, "live search closed by server");
                        self.finish(generation, Phase::Error, false);
                        return;
                    }
                    Some(Ok(_)) => {} // ping/pong/binary
                    Some(Err(err)) => {
                        tracing::error!(key = %self.inner.key, %err, "receive failed");
                        self.finish(generation, Phase::Error, true);
                        return;
                    }
                }
            }
        }
    }

    async fn handle_payload(&self, raw: &str, cancel: &CancellationToken) {
        let cleaned = frame::scrub(raw);
        let Some(object) = frame::extract_json_object(&cleaned) else {
            tracing::warn!(key = %self.inner.key, "dropping payload without a JSON object");
            return;
        };

        match serde_json::from_str::<NotificationEnvelope>(object) {
            Ok(envelope) => {
                let batch = envelope.into_batch();
                if batch.is_empty() {
                    return;
                }
                tracing::debug!(key = %self.inner.key, ids = batch.len(), "notification received");
                self.inner.sink.submit(self.inner.key.clone(), batch, cancel.clone()).await;
            }
            Err(err) => {
                tracing::warn!(key = %self.inner.key, %err, "dropping malformed notification");
            }
        }
    }

    /// Transition out of a connect attempt or receive loop, unless a
    /// newer begin/stop already owns the state.
    fn finish(&self, generation: u64, phase: Phase, advance_backoff: bool) {
        let mut shared = self.inner.shared.lock();
        if shared.generation != generation {
            return;
        }
        shared.phase = phase;
        if phase == Phase::Error {
            shared.last_error = Some(Instant::now());
        }
        if advance_backoff {
            shared.backoff.advance();
        }
    }
}
