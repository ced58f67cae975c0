//! One live WebSocket connection for one user
//!
//! A [`Session`] owns the outbound queue of a connection. Two loops drive the
//! transport: [`read_loop`] decodes inbound frames and dispatches envelopes,
//! [`write_loop`] drains the queue and keeps the peer alive with pings. Either
//! loop ending removes the session from the registry, which signals the other
//! one to stop.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message as WsFrame;
use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatch::Dispatcher;
use super::events::{
    Acknowledge, Envelope, EventType, OutgoingChatPayload, ReceiptUpdatePayload,
};
use super::registry::ConnectionRegistry;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} is closed")]
    Closed(u64),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Live connection state shared by the loops, the registry and handlers
pub struct Session {
    id: u64,
    user_id: String,
    outbound: mpsc::Sender<Envelope>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl Session {
    /// Create a session and the receiving half of its outbound queue
    pub fn new(user_id: impl Into<String>, queue: usize) -> (Arc<Self>, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let session = Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            user_id: user_id.into(),
            outbound: tx,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });
        (session, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queue an envelope, waiting for room when the queue is full
    pub async fn send(&self, envelope: Envelope) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed(self.id));
        }
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| SessionError::Closed(self.id))
    }

    pub async fn send_ack(&self, id: &str, ack: &Acknowledge) -> Result<(), SessionError> {
        self.send(Envelope::ack(id, ack)).await
    }

    pub async fn send_chat(&self, payload: &OutgoingChatPayload) -> Result<(), SessionError> {
        self.send(Envelope::new(EventType::OutgoingChatMessage, "", payload)?)
            .await
    }

    pub async fn send_delivered_update(
        &self,
        payload: &ReceiptUpdatePayload,
    ) -> Result<(), SessionError> {
        self.send(Envelope::new(EventType::OutgoingDeliveredUpdate, "", payload)?)
            .await
    }

    pub async fn send_read_update(
        &self,
        payload: &ReceiptUpdatePayload,
    ) -> Result<(), SessionError> {
        self.send(Envelope::new(EventType::OutgoingReadUpdate, "", payload)?)
            .await
    }

    /// Signal both loops to stop
    ///
    /// Returns `true` only for the call that actually closed the session.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receive path of a session
///
/// Every decoded envelope is dispatched on its own task so a slow store call
/// never delays reading the next frame. Exits on close, transport error, end
/// of stream, shutdown, or when no pong arrives within `pong_wait`.
pub async fn read_loop<S, E>(
    mut stream: S,
    session: Arc<Session>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ConnectionRegistry>,
    pong_wait: Duration,
) where
    S: Stream<Item = Result<WsFrame, E>> + Unpin,
    E: Display,
{
    let shutdown = session.shutdown_token();
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = tokio::time::timeout_at(deadline, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                info!(session_id = session.id, user_id = %session.user_id, "read deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(session_id = session.id, error = %e, "read error");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            WsFrame::Text(text) => match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) => {
                    let dispatcher = Arc::clone(&dispatcher);
                    let session = Arc::clone(&session);
                    tokio::spawn(async move {
                        dispatcher.dispatch(envelope, session).await;
                    });
                }
                Err(e) => {
                    debug!(session_id = session.id, error = %e, "undecodable envelope");
                    let ack = Acknowledge::failure(EventType::Unknown, format!("invalid envelope: {e}"));
                    if let Err(e) = session.send_ack("", &ack).await {
                        debug!(session_id = session.id, error = %e, "could not queue ack");
                    }
                }
            },
            WsFrame::Pong(_) => {
                deadline = Instant::now() + pong_wait;
            }
            WsFrame::Close(_) => {
                debug!(session_id = session.id, "peer sent close frame");
                break;
            }
            WsFrame::Ping(_) | WsFrame::Binary(_) => {}
        }
    }

    registry.remove(&session);
}

/// Send path of a session
///
/// On shutdown the queue is closed, everything already queued is flushed and
/// a close frame is written. A failed ping means the peer is gone.
pub async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Envelope>,
    session: Arc<Session>,
    registry: Arc<ConnectionRegistry>,
    ping_interval: Duration,
) where
    S: Sink<WsFrame> + Unpin,
    S::Error: Display,
{
    let shutdown = session.shutdown_token();
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                outbound.close();
                while let Some(envelope) = outbound.recv().await {
                    write_envelope(&mut sink, &envelope, session.id).await;
                }
                let _ = sink.send(WsFrame::Close(None)).await;
                break;
            }
            queued = outbound.recv() => match queued {
                Some(envelope) => write_envelope(&mut sink, &envelope, session.id).await,
                None => {
                    let _ = sink.send(WsFrame::Close(None)).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = sink.send(WsFrame::Ping(Vec::new())).await {
                    info!(session_id = session.id, error = %e, "ping failed, dropping peer");
                    break;
                }
            }
        }
    }

    registry.remove(&session);
    let _ = sink.close().await;
}

async fn write_envelope<S>(sink: &mut S, envelope: &Envelope, session_id: u64)
where
    S: Sink<WsFrame> + Unpin,
    S::Error: Display,
{
    let text = match serde_json::to_string(envelope) {
        Ok(text) => text,
        Err(e) => {
            warn!(session_id, error = %e, "failed to serialize envelope");
            return;
        }
    };
    if let Err(e) = sink.send(WsFrame::Text(text)).await {
        warn!(session_id, error = %e, "failed to write frame");
    }
}
