//! Per-connection handler: handshake, authorization, relay.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive Handshake → validate version
//!   2. Authenticate token → Identity
//!   3. Open the live connection (lobby authorization + registry join)
//!   4. Send HandshakeAck → spawn the writer task
//!   5. Loop: receive envelopes → relay game bytes, answer heartbeats
//!
//! All outbound frames after the ack go through the writer task, which
//! owns the sequence counter. It drains two queues: registry events
//! (pairing, relayed bytes, session close) and direct replies from the
//! reader loop (heartbeat acks, errors).

use std::sync::Arc;
use std::time::{Duration, Instant};

use duelhall_identity::{Authenticator, Identity};
use duelhall_lobby::Clock;
use duelhall_protocol::{
    Codec, Envelope, ErrorKind, Payload, ProtocolError, RoomToken, SystemMessage,
};
use duelhall_registry::{LiveEvent, RegistryError};
use duelhall_store::{EphemeralStore, Store};
use duelhall_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::server::{PROTOCOL_VERSION, ServerState};
use crate::DuelhallError;

/// How long the reader waits for the writer to flush `SessionClosed`.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

fn millis_since(start: &Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S, E, C, A, K>(
    conn: WebSocketConnection,
    state: Arc<ServerState<S, E, C, A, K>>,
) -> Result<(), DuelhallError>
where
    S: Store,
    E: EphemeralStore,
    C: Clock,
    A: Authenticator,
    K: Codec,
{
    let conn = Arc::new(conn);
    let start = Instant::now();
    tracing::debug!(conn_id = %conn.id(), peer = %conn.peer_addr(), "handling new connection");

    // --- Step 1: Handshake ---
    let (identity, room) = perform_handshake(&conn, &state, &start).await?;

    // --- Step 2: Authorize and join ---
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let live = match state
        .app
        .open_live_connection(&identity, &room, events_tx)
        .await
    {
        Ok(live) => live,
        Err(e) => {
            send_error(&*conn, &state.codec, e.kind(), &e.to_string(), 0, &start).await?;
            let _ = conn.close().await;
            return Err(e);
        }
    };

    let ack = Envelope::system(
        0,
        millis_since(&start),
        SystemMessage::HandshakeAck {
            user_id: live.user(),
            room: live.token().clone(),
            role: live.role(),
        },
    );
    let ack = state.codec.encode(&ack)?;
    if let Err(e) = conn.send(&ack).await {
        let _ = live.close().await;
        return Err(e.into());
    }

    let (replies_tx, replies_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(
        Arc::clone(&conn),
        Arc::clone(&state),
        events_rx,
        replies_rx,
        start,
    ));

    // --- Step 3: Read loop ---
    let mut ended = false;
    loop {
        let data = match tokio::time::timeout(state.read_timeout, conn.recv()).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::debug!(room_token = %live.token(), user_id = %live.user(), "connection closed");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(room_token = %live.token(), user_id = %live.user(), error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::info!(room_token = %live.token(), user_id = %live.user(), "connection timed out");
                break;
            }
        };

        let envelope: Envelope = match state.codec.decode(&data) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(user_id = %live.user(), error = %e, "failed to decode envelope");
                reply_error(&replies_tx, e.kind(), format!("invalid frame: {e}"));
                continue;
            }
        };

        match envelope.payload {
            Payload::Game(data) => match live.send(data).await {
                Ok(()) => {}
                // The session is already closed for both sides; the
                // writer delivers SessionClosed and shuts the socket.
                Err(DuelhallError::Registry(RegistryError::PeerGone(_))) => {}
                Err(e) => reply_error(&replies_tx, e.kind(), e.to_string()),
            },
            Payload::System(SystemMessage::Heartbeat { client_time }) => {
                let _ = replies_tx.send(SystemMessage::HeartbeatAck {
                    client_time,
                    server_time: millis_since(&start),
                });
            }
            Payload::System(SystemMessage::EndGame { reason }) => {
                tracing::info!(room_token = %live.token(), user_id = %live.user(), ?reason, "end game requested");
                ended = true;
                break;
            }
            Payload::System(_) => {
                reply_error(&replies_tx, ErrorKind::InvalidState, "unexpected system message".into());
            }
        }
    }

    // --- Step 4: Teardown ---
    let user = live.user();
    let token = live.token().clone();
    let result = if ended { live.end().await } else { live.close().await };
    if let Err(e) = result {
        tracing::warn!(room_token = %token, user_id = %user, error = %e, "room not finished");
    }
    drop(replies_tx);

    // The registry has pushed `Closed` into our outbox; let the writer
    // flush it before the socket goes away.
    if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
        tracing::debug!(room_token = %token, "writer did not drain in time");
    }
    let _ = conn.close().await;
    Ok(())
}

/// Performs the initial handshake: receive, validate version, authenticate.
async fn perform_handshake<S, E, C, A, K>(
    conn: &WebSocketConnection,
    state: &ServerState<S, E, C, A, K>,
    start: &Instant,
) -> Result<(Identity, RoomToken), DuelhallError>
where
    S: Store,
    E: EphemeralStore,
    C: Clock,
    A: Authenticator,
    K: Codec,
{
    let data = match tokio::time::timeout(state.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage("connection closed before handshake".into()).into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("handshake timed out".into()).into());
        }
    };

    let envelope: Envelope = match state.codec.decode(&data) {
        Ok(env) => env,
        Err(e) => {
            send_error(conn, &state.codec, e.kind(), "malformed handshake", 0, start).await?;
            return Err(e.into());
        }
    };

    let (version, token, room) = match envelope.payload {
        Payload::System(SystemMessage::Handshake { version, token, room }) => (version, token, room),
        _ => {
            send_error(conn, &state.codec, ErrorKind::InvalidState, "expected Handshake", 0, start)
                .await?;
            return Err(ProtocolError::InvalidMessage("first message must be Handshake".into()).into());
        }
    };

    if version != PROTOCOL_VERSION {
        send_error(
            conn,
            &state.codec,
            ErrorKind::InvalidState,
            &format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}"),
            0,
            start,
        )
        .await?;
        return Err(ProtocolError::InvalidMessage("protocol version mismatch".into()).into());
    }

    let identity = match state.auth.authenticate(token.as_deref().unwrap_or("")).await {
        Ok(identity) => identity,
        Err(e) => {
            send_error(conn, &state.codec, e.kind(), "unauthorized", 0, start).await?;
            return Err(e.into());
        }
    };

    tracing::info!(conn_id = %conn.id(), user_id = %identity.user_id, room_token = %room, "handshake accepted");
    Ok((identity, room))
}

/// Drains registry events and direct replies into the socket.
async fn write_loop<S, E, C, A, K>(
    conn: Arc<WebSocketConnection>,
    state: Arc<ServerState<S, E, C, A, K>>,
    mut events: UnboundedReceiver<LiveEvent>,
    mut replies: UnboundedReceiver<SystemMessage>,
    start: Instant,
) where
    S: Store,
    E: EphemeralStore,
    C: Clock,
    A: Authenticator,
    K: Codec,
{
    let mut seq: u64 = 1;
    loop {
        let mut last = false;
        let envelope = tokio::select! {
            biased;
            Some(msg) = replies.recv() => Envelope::system(seq, millis_since(&start), msg),
            event = events.recv() => match event {
                Some(LiveEvent::Paired { opponent, .. }) => {
                    Envelope::system(seq, millis_since(&start), SystemMessage::Paired { opponent })
                }
                Some(LiveEvent::Relay(data)) => Envelope::game(seq, millis_since(&start), data),
                Some(LiveEvent::Closed { status }) => {
                    last = true;
                    Envelope::system(seq, millis_since(&start), SystemMessage::SessionClosed { status })
                }
                None => break,
            },
        };
        seq += 1;

        let sent = match state.codec.encode(&envelope) {
            Ok(bytes) => conn.send(&bytes).await.map_err(DuelhallError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            tracing::debug!(conn_id = %conn.id(), error = %e, "write failed");
            break;
        }
        if last {
            let _ = conn.close().await;
            break;
        }
    }
}

fn reply_error(replies: &UnboundedSender<SystemMessage>, kind: ErrorKind, message: String) {
    let _ = replies.send(SystemMessage::Error { kind, message });
}

/// Sends a `SystemMessage::Error` frame directly, before the writer
/// task exists.
async fn send_error(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    kind: ErrorKind,
    message: &str,
    seq: u64,
    start: &Instant,
) -> Result<(), DuelhallError> {
    let envelope = Envelope::system(
        seq,
        millis_since(start),
        SystemMessage::Error {
            kind,
            message: message.to_string(),
        },
    );
    let bytes = codec.encode(&envelope)?;
    conn.send(&bytes).await?;
    Ok(())
}
