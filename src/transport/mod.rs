//! Transport seam: the traits a team client consumes.
//!
//! # Architecture
//!
//! A [`Transport`] is the long-lived streaming session to one workspace; a
//! [`Directory`] is the request/response lookup API for channels and users.
//! The production pair lives in [`crate::slack`]; tests provide in-memory
//! fakes. A [`Platform`] builds the pair for a team's credentials, so the
//! supervisor never names a concrete SDK.
//!
//! Transport implementations translate their wire protocol into
//! [`TransportEvent`]s on an `mpsc` channel. The receiving client owns the
//! channel; when the sender side is dropped the client treats the session
//! as disconnected.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::TeamConfig;

// ── errors ───────────────────────────────────────────────────────────────────

/// Failure surfaced by a transport or directory call.
///
/// Carries the three classification inputs: the human-readable message, the
/// platform result code (e.g. `"not_in_channel"`) and the HTTP status.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
    pub code: Option<String>,
    pub status: Option<u16>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), code: None, status: None }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

// ── events ───────────────────────────────────────────────────────────────────

/// A raw chat event as the transport saw it, before demultiplexing.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub channel_id: String,
    pub user_id: String,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
    pub text: String,
    pub ts: String,
}

/// Events a transport session delivers to its owning client.
#[derive(Debug)]
pub enum TransportEvent {
    /// Session is established and streaming.
    Connected,
    /// Session ended; the client decides whether to reconnect.
    Disconnected { reason: String },
    /// Session-level failure (the client classifies it).
    Failed(ApiError),
    /// An inbound chat event.
    Message(InboundEvent),
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Connected => write!(f, "connected"),
            TransportEvent::Disconnected { reason } => write!(f, "disconnected: {reason}"),
            TransportEvent::Failed(e) => write!(f, "failed: {e}"),
            TransportEvent::Message(ev) => write!(f, "message in {}", ev.channel_id),
        }
    }
}

// ── directory records ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub is_member: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UserInfo {
    pub id: String,
    pub display_name: Option<String>,
    pub real_name: Option<String>,
    pub login: Option<String>,
}

// ── traits ───────────────────────────────────────────────────────────────────

/// The long-lived streaming session to one workspace.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the session. Events arrive on the returned receiver until the
    /// session ends; the sender side is dropped when the stream closes.
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>, ApiError>;

    /// Tear the session down. Must be idempotent: a second call (or a call
    /// with no session open) is a no-op.
    async fn close(&self) -> Result<(), ApiError>;
}

/// Channel and user lookups against the workspace directory API.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn channel(&self, id: &str) -> Result<ChannelInfo, ApiError>;
    async fn user(&self, id: &str) -> Result<UserInfo, ApiError>;
}

/// Builds the transport/directory pair for one team's credentials.
pub trait Platform: Send + Sync {
    fn session(
        &self,
        team: &TeamConfig,
    ) -> Result<(Arc<dyn Transport>, Arc<dyn Directory>), ApiError>;
}
