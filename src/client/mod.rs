//! Team client: one streaming session to one workspace.
//!
//! # Architecture
//!
//! A [`TeamClient`] owns its transport session, channel directory cache and
//! skipped-channel list. `connect` opens the transport, subscribes the
//! configured channels through the directory API, then spawns an event loop
//! task that demultiplexes inbound events into [`Message`]s for the sink.
//!
//! Failures are classified: permanent authentication failures invalidate
//! the client for the rest of the process; anything else transitions to
//! `Disconnected` and schedules an exponential-backoff reconnect, up to
//! [`MAX_RECONNECT_ATTEMPTS`]. All state transitions happen under one
//! mutex with O(1) critical sections; no lock is held across an await.

pub mod classify;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{self, TeamConfig};
use crate::error::AppError;
use crate::message::Message;
use crate::transport::{Directory, InboundEvent, Transport, TransportEvent, UserInfo};

use classify::{SkipReason, SkippedChannel};

// ── constants ────────────────────────────────────────────────────────────────

const RECONNECT_BASE_SECS: u64 = 1;
const RECONNECT_CAP_SECS: u64 = 30;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay before reconnect attempt number `attempt` (zero-based).
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let secs = RECONNECT_BASE_SECS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(RECONNECT_CAP_SECS);
    Duration::from_secs(secs)
}

// ── status ───────────────────────────────────────────────────────────────────

/// Connection status. `Invalidated` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Invalidated,
    Closed,
}

// ── sink ─────────────────────────────────────────────────────────────────────

/// Receives each accepted [`Message`]. Supplied at construction so a
/// connected client without a sink cannot exist.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, message: Message) -> Result<(), AppError>;
}

// ── client ───────────────────────────────────────────────────────────────────

struct ClientState {
    status: ClientStatus,
    attempts: u32,
    reconnect_pending: bool,
    /// Channel ids that survived subscription, in configured order.
    kept: Vec<String>,
    /// Directory cache: channel id to display name.
    names: HashMap<String, String>,
    skipped: Vec<SkippedChannel>,
}

struct ClientInner {
    team: String,
    channels: Vec<String>,
    transport: Arc<dyn Transport>,
    directory: Arc<dyn Directory>,
    sink: Arc<dyn MessageSink>,
    state: Mutex<ClientState>,
    shutdown: CancellationToken,
}

pub struct TeamClient {
    inner: Arc<ClientInner>,
}

impl TeamClient {
    pub fn new(
        config: TeamConfig,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn Directory>,
        sink: Arc<dyn MessageSink>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                team: config.name,
                channels: config.channels,
                transport,
                directory,
                sink,
                state: Mutex::new(ClientState {
                    status: ClientStatus::Idle,
                    attempts: 0,
                    reconnect_pending: false,
                    kept: Vec::new(),
                    names: HashMap::new(),
                    skipped: Vec::new(),
                }),
                shutdown,
            }),
        }
    }

    /// Open the session and start streaming. Idempotent: a client that is
    /// already `Connecting`, `Connected` or in a terminal state returns
    /// without effect.
    pub async fn connect(&self) -> Result<(), AppError> {
        self.inner.clone().connect_flow().await
    }

    /// Move to `Closed` and tear the transport down best-effort. Never
    /// fails; teardown errors are logged and swallowed. An invalidated
    /// client keeps its `Invalidated` status (teardown already happened).
    pub async fn disconnect(&self) {
        let teardown = {
            let mut st = self.inner.state();
            match st.status {
                ClientStatus::Closed | ClientStatus::Invalidated => {
                    st.names.clear();
                    false
                }
                _ => {
                    st.status = ClientStatus::Closed;
                    st.names.clear();
                    true
                }
            }
        };
        // Cancels the event loop and any reconnect still waiting out its
        // backoff. The timers are also gated on status, so this is for
        // promptness, not correctness.
        self.inner.shutdown.cancel();
        if teardown {
            info!(team = %self.inner.team, "disconnecting");
            if let Err(e) = self.inner.transport.close().await {
                warn!(team = %self.inner.team, "transport teardown failed: {e}");
            }
        }
    }

    pub fn status(&self) -> ClientStatus {
        self.inner.state().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ClientStatus::Connected
    }

    pub fn is_invalidated(&self) -> bool {
        self.status() == ClientStatus::Invalidated
    }

    pub fn team_name(&self) -> &str {
        &self.inner.team
    }

    /// Channel ids that survived subscription (defensive copy).
    pub fn channel_ids(&self) -> Vec<String> {
        self.inner.state().kept.clone()
    }

    /// Channels skipped at subscription time, in configured order
    /// (defensive copy).
    pub fn skipped_channels(&self) -> Vec<SkippedChannel> {
        self.inner.state().skipped.clone()
    }
}

impl ClientInner {
    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn connect_flow(self: Arc<Self>) -> Result<(), AppError> {
        {
            let mut st = self.state();
            match st.status {
                ClientStatus::Idle | ClientStatus::Disconnected => {
                    st.status = ClientStatus::Connecting;
                }
                // Connecting, Connected, Invalidated, Closed: no-op.
                _ => return Ok(()),
            }
        }
        info!(team = %self.team, "connecting");

        match self.establish().await {
            Ok(rx) => {
                let proceed = {
                    let mut st = self.state();
                    if matches!(st.status, ClientStatus::Invalidated | ClientStatus::Closed) {
                        // disconnect() raced the handshake; the session was
                        // already torn down.
                        false
                    } else {
                        st.status = ClientStatus::Connected;
                        st.attempts = 0;
                        true
                    }
                };
                if proceed {
                    let (kept, skipped) = {
                        let st = self.state();
                        (st.kept.len(), st.skipped.len())
                    };
                    info!(team = %self.team, channels = kept, skipped, "connected");
                    self.clone().spawn_event_loop(rx);
                }
                Ok(())
            }
            Err(err) => {
                let auth =
                    matches!(&err, AppError::Api(api) if classify::is_auth_failure(api));
                if auth {
                    invalidate(&self);
                } else {
                    warn!(team = %self.team, "connect failed: {err}");
                    // The session may be half-open (transport up, subscribe
                    // failed); tear it down before backing off.
                    let _ = self.transport.close().await;
                    let proceed = {
                        let mut st = self.state();
                        if st.status == ClientStatus::Connecting {
                            st.status = ClientStatus::Disconnected;
                            true
                        } else {
                            false
                        }
                    };
                    if proceed {
                        schedule_reconnect(&self);
                    }
                }
                Err(err)
            }
        }
    }

    async fn establish(&self) -> Result<mpsc::Receiver<TransportEvent>, AppError> {
        let rx = self.transport.open().await?;
        self.subscribe().await?;
        Ok(rx)
    }

    /// Resolve each configured channel through the directory API, in input
    /// order. Survivors land in the kept set and the name cache; everything
    /// else is recorded with a classified reason.
    async fn subscribe(&self) -> Result<(), AppError> {
        let mut kept = Vec::new();
        let mut names = HashMap::new();
        let mut skipped = Vec::new();

        for id in &self.channels {
            if !config::valid_channel_id(id) {
                warn!(team = %self.team, channel = %id, reason = %SkipReason::InvalidFormat, "channel skipped");
                skipped.push(SkippedChannel {
                    channel_id: id.clone(),
                    reason: SkipReason::InvalidFormat,
                    detail: None,
                });
                continue;
            }
            match self.directory.channel(id).await {
                Ok(info) if info.is_member => {
                    names.insert(id.clone(), info.name);
                    kept.push(id.clone());
                }
                Ok(_) => {
                    warn!(team = %self.team, channel = %id, reason = %SkipReason::NotAMember, "channel skipped");
                    skipped.push(SkippedChannel {
                        channel_id: id.clone(),
                        reason: SkipReason::NotAMember,
                        detail: None,
                    });
                }
                Err(err) => {
                    // Auth failures abort the whole subscription; the
                    // caller invalidates the team.
                    if classify::is_auth_failure(&err) {
                        return Err(AppError::Api(err));
                    }
                    let reason = classify::classify_skip(&err);
                    warn!(team = %self.team, channel = %id, %reason, "channel skipped: {err}");
                    skipped.push(SkippedChannel {
                        channel_id: id.clone(),
                        reason,
                        detail: Some(err.to_string()),
                    });
                }
            }
        }

        let no_survivors = kept.is_empty();
        let skipped_count = skipped.len();
        {
            let mut st = self.state();
            st.kept = kept;
            st.names = names;
            st.skipped = skipped;
        }
        if no_survivors {
            return Err(AppError::NoValidChannels { skipped: skipped_count });
        }
        Ok(())
    }

    fn spawn_event_loop(self: Arc<Self>, mut rx: mpsc::Receiver<TransportEvent>) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = self.shutdown.cancelled() => break,

                    ev = rx.recv() => match ev {
                        None => {
                            on_session_end(&self, "event stream closed");
                            break;
                        }
                        Some(TransportEvent::Connected) => {
                            let mut st = self.state();
                            if !matches!(st.status, ClientStatus::Invalidated | ClientStatus::Closed) {
                                st.status = ClientStatus::Connected;
                                st.attempts = 0;
                            }
                        }
                        Some(TransportEvent::Disconnected { reason }) => {
                            on_session_end(&self, &reason);
                            break;
                        }
                        Some(TransportEvent::Failed(err)) => {
                            if classify::is_auth_failure(&err) {
                                invalidate(&self);
                            } else {
                                on_session_end(&self, &format!("transport error: {err}"));
                            }
                            break;
                        }
                        Some(TransportEvent::Message(ev)) => self.demux(ev).await,
                    }
                }
            }
        });
    }

    /// Translate one inbound event into a [`Message`] for the sink, or drop
    /// it. Events from bots, events carrying a subtype (edits, joins, …) and
    /// events for channels outside the kept set are discarded.
    async fn demux(&self, ev: InboundEvent) {
        let cached_name = {
            let st = self.state();
            if !st.kept.iter().any(|id| id == &ev.channel_id) {
                return;
            }
            st.names.get(&ev.channel_id).cloned()
        };
        if ev.bot_id.is_some() || ev.subtype.is_some() {
            return;
        }

        let user = match self.directory.user(&ev.user_id).await {
            Ok(info) => resolve_user_name(info, &ev.user_id),
            Err(err) => {
                debug!(team = %self.team, user = %ev.user_id, "user lookup failed, using raw id: {err}");
                ev.user_id.clone()
            }
        };
        let channel_name = cached_name.unwrap_or_else(|| ev.channel_id.clone());

        let message = Message::new(
            self.team.clone(),
            channel_name,
            ev.channel_id,
            user,
            ev.text,
            ev.ts,
        );
        if let Err(e) = self.sink.deliver(message).await {
            error!(team = %self.team, "event dropped: {e}");
        }
    }
}

fn on_session_end(inner: &Arc<ClientInner>, reason: &str) {
    let reconnect = {
        let mut st = inner.state();
        match st.status {
            ClientStatus::Invalidated | ClientStatus::Closed => false,
            _ => {
                st.status = ClientStatus::Disconnected;
                true
            }
        }
    };
    if reconnect {
        warn!(team = %inner.team, %reason, "session ended");
        schedule_reconnect(inner);
    }
}

/// Schedule the next reconnect attempt, unless one is already pending, the
/// client is terminal, or the attempt limit is exhausted.
fn schedule_reconnect(inner: &Arc<ClientInner>) {
    let delay = {
        let mut st = inner.state();
        if st.reconnect_pending
            || matches!(st.status, ClientStatus::Invalidated | ClientStatus::Closed)
        {
            return;
        }
        if st.attempts >= MAX_RECONNECT_ATTEMPTS {
            warn!(team = %inner.team, attempts = st.attempts, "reconnect limit reached, giving up");
            return;
        }
        let delay = backoff_delay(st.attempts);
        st.attempts += 1;
        st.reconnect_pending = true;
        delay
    };
    info!(team = %inner.team, delay_secs = delay.as_secs(), "reconnect scheduled");

    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::select! {
            biased;

            _ = inner.shutdown.cancelled() => {
                inner.state().reconnect_pending = false;
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        {
            let mut st = inner.state();
            st.reconnect_pending = false;
            if matches!(st.status, ClientStatus::Invalidated | ClientStatus::Closed) {
                return;
            }
        }
        if let Err(e) = inner.clone().connect_flow().await {
            warn!(team = %inner.team, "reconnect attempt failed: {e}");
        }
    });
}

/// Permanent authentication failure: terminal, no reconnects, transport
/// teardown is fire-and-forget.
fn invalidate(inner: &Arc<ClientInner>) {
    let first = {
        let mut st = inner.state();
        match st.status {
            ClientStatus::Invalidated | ClientStatus::Closed => false,
            _ => {
                st.status = ClientStatus::Invalidated;
                st.names.clear();
                true
            }
        }
    };
    if first {
        error!(team = %inner.team, "permanent authentication failure, team invalidated");
        let inner = inner.clone();
        tokio::spawn(async move {
            let _ = inner.transport.close().await;
        });
    }
}

/// Prefer display name, then real name, then login; fall back to the raw id.
fn resolve_user_name(info: UserInfo, raw_id: &str) -> String {
    let non_empty = |s: Option<String>| s.filter(|v| !v.is_empty());
    non_empty(info.display_name)
        .or_else(|| non_empty(info.real_name))
        .or_else(|| non_empty(info.login))
        .unwrap_or_else(|| raw_id.to_string())
}
