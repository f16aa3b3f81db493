//! Socket-mode streaming session.
//!
//! `open` asks the Web API for a wss URL, connects, and spawns a read loop
//! that translates socket-mode frames into [`TransportEvent`]s: `hello`
//! becomes `Connected`, `disconnect` becomes `Disconnected`, `events_api`
//! envelopes are acked and their message events forwarded. The loop ends on
//! close, stream end or socket error; the owning client decides what to do
//! next.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{ApiError, InboundEvent, Transport, TransportEvent};

use super::api::SlackApi;

const EVENT_BUFFER: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

pub struct SocketTransport {
    team: String,
    api: Arc<SlackApi>,
    /// Cancellation handle for the currently-open session, if any.
    session: Mutex<Option<CancellationToken>>,
}

impl SocketTransport {
    pub fn new(team: String, api: Arc<SlackApi>) -> Self {
        Self { team, api, session: Mutex::new(None) }
    }

    fn session(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>, ApiError> {
        let url = self.api.connections_open().await?;
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| ApiError::new(format!("websocket connect failed: {e}")))?;
        info!(team = %self.team, "socket-mode session open");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let token = CancellationToken::new();
        if let Some(old) = self.session().replace(token.clone()) {
            // a previous session was never closed; end it now
            old.cancel();
        }
        tokio::spawn(run_session(self.team.clone(), stream, tx, token));
        Ok(rx)
    }

    async fn close(&self) -> Result<(), ApiError> {
        if let Some(token) = self.session().take() {
            token.cancel();
        }
        Ok(())
    }
}

async fn run_session(
    team: String,
    stream: WsStream,
    tx: mpsc::Sender<TransportEvent>,
    token: CancellationToken,
) {
    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!(team, "session cancelled, closing socket");
                let _ = write.send(WsMessage::Close(None)).await;
                break;
            }

            frame = read.next() => match frame {
                None => {
                    let _ = tx
                        .send(TransportEvent::Disconnected { reason: "stream ended".into() })
                        .await;
                    break;
                }
                Some(Err(e)) => {
                    let _ = tx
                        .send(TransportEvent::Failed(ApiError::new(format!(
                            "websocket error: {e}"
                        ))))
                        .await;
                    break;
                }
                Some(Ok(WsMessage::Text(text))) => {
                    if handle_frame(&team, text.as_str(), &mut write, &tx).await.is_break() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) => {
                    let _ = tx
                        .send(TransportEvent::Disconnected {
                            reason: "server closed the stream".into(),
                        })
                        .await;
                    break;
                }
                // ping/pong are answered by the library; binary is not part
                // of the protocol
                Some(Ok(_)) => {}
            }
        }
    }
}

async fn handle_frame(
    team: &str,
    raw: &str,
    write: &mut WsSink,
    tx: &mpsc::Sender<TransportEvent>,
) -> ControlFlow<()> {
    let frame: Frame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(team, "ignoring unparseable frame: {e}");
            return ControlFlow::Continue(());
        }
    };

    // Envelopes must be acked promptly or the server resends and
    // eventually drops the connection.
    if let Some(id) = &frame.envelope_id {
        let ack = serde_json::json!({ "envelope_id": id }).to_string();
        if write.send(WsMessage::text(ack)).await.is_err() {
            let _ = tx
                .send(TransportEvent::Disconnected { reason: "ack send failed".into() })
                .await;
            return ControlFlow::Break(());
        }
    }

    match frame.kind.as_str() {
        "hello" => {
            let _ = tx.send(TransportEvent::Connected).await;
        }
        "disconnect" => {
            let reason = frame.reason.unwrap_or_else(|| "refresh requested".into());
            let _ = tx.send(TransportEvent::Disconnected { reason }).await;
            return ControlFlow::Break(());
        }
        "events_api" => {
            if let Some(event) = frame.payload.and_then(|p| p.event)
                && event.kind == "message"
            {
                match inbound_from(event) {
                    Some(inbound) => {
                        if tx.send(TransportEvent::Message(inbound)).await.is_err() {
                            // receiver is gone, nobody cares about this session
                            return ControlFlow::Break(());
                        }
                    }
                    None => warn!(team, "message event missing channel or ts, dropped"),
                }
            }
        }
        other => debug!(team, kind = other, "unhandled frame kind"),
    }
    ControlFlow::Continue(())
}

fn inbound_from(event: RawEvent) -> Option<InboundEvent> {
    Some(InboundEvent {
        channel_id: event.channel?,
        user_id: event.user.unwrap_or_default(),
        bot_id: event.bot_id,
        subtype: event.subtype,
        text: event.text.unwrap_or_default(),
        ts: event.ts?,
    })
}

// ── wire shapes ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<FramePayload>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct FramePayload {
    #[serde(default)]
    event: Option<RawEvent>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}
