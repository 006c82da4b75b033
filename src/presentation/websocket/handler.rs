//! WebSocket Connection Handler
//!
//! Runs one gateway connection: Hello, Identify, READY and presence
//! snapshot, then dispatch frames until the socket closes or heartbeats
//! stop arriving.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use uuid::Uuid;

use super::gateway::ConnectedSession;
use super::messages::{
    GatewayReceive, GatewaySend, HelloPayload, IdentifyPayload, OpCode, ReadyPayload,
};
use super::session::SessionState;
use crate::application::channels::Destination;
use crate::application::dto::ClientEvent;
use crate::application::services::{Connected, EventContext};
use crate::domain::{GroupId, UserId};
use crate::infrastructure::metrics;
use crate::startup::AppState;

/// Gateway protocol version reported in READY
const GATEWAY_VERSION: u8 = 1;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max_size = state.settings.websocket.max_message_size;
    ws.max_message_size(max_size)
        .max_frame_size(max_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &GatewaySend,
) -> Result<(), String> {
    let text = serde_json::to_string(frame).map_err(|e| e.to_string())?;
    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| e.to_string())
}

/// Tell the client its session is invalid, give the writer a moment to
/// flush, then stop it.
async fn invalidate(tx: &mpsc::UnboundedSender<GatewaySend>, sender_task: JoinHandle<()>) {
    let _ = tx.send(GatewaySend::op(OpCode::InvalidSession, Some(json!(false))));
    tokio::time::sleep(Duration::from_millis(100)).await;
    sender_task.abort();
}

/// A session that has been registered and announced.
pub struct OpenedSession {
    pub session: Arc<ConnectedSession>,
    pub connected: Connected,
}

/// Bring up an identified session: register it with the gateway, send READY,
/// register presence and then send the snapshot, which therefore already
/// lists this user. `None` if the session's writer is already gone.
pub fn open_session(
    state: &AppState,
    session_id: &str,
    user: &UserId,
    groups: Vec<GroupId>,
    tx: mpsc::UnboundedSender<GatewaySend>,
) -> Option<OpenedSession> {
    let session = state
        .gateway
        .register_session(session_id.to_string(), user.clone(), tx);

    let ready = GatewaySend {
        op: OpCode::Dispatch as u8,
        d: serde_json::to_value(ReadyPayload {
            v: GATEWAY_VERSION,
            user: user.clone(),
            groups,
            session_id: session_id.to_string(),
        })
        .ok(),
        s: Some(session.next_sequence()),
        t: Some("READY".to_string()),
        channel: Some(Destination::Session.to_string()),
    };
    if !session.send_raw(ready) {
        state.gateway.unregister_session(session_id);
        return None;
    }

    let presence = state.engine.presence();
    let connected = presence.connect(user);
    presence.send_snapshot(session_id);

    Some(OpenedSession { session, connected })
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4().to_string();
    let mut session_state = SessionState::new(session_id.clone());
    let ws_settings = &state.settings.websocket;

    tracing::debug!(session_id = %session_id, "New WebSocket connection");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<GatewaySend>();

    let hello = GatewaySend::op(
        OpCode::Hello,
        serde_json::to_value(HelloPayload {
            heartbeat_interval: state.gateway.heartbeat_interval(),
        })
        .ok(),
    );
    if let Err(e) = send_frame(&mut sender, &hello).await {
        tracing::error!(session_id = %session_id, "Failed to send Hello: {}", e);
        return;
    }

    // Forward queued frames to the socket
    let sender_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = send_frame(&mut sender, &frame).await {
                tracing::debug!("Socket write failed: {}", e);
                break;
            }
        }
    });

    let identify_result = timeout(Duration::from_secs(ws_settings.identify_timeout_secs), async {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let Ok(frame) = serde_json::from_str::<GatewayReceive>(text.as_str()) else {
                        continue;
                    };
                    if frame.op != OpCode::Identify as u8 {
                        continue;
                    }
                    if let Some(identify) = frame
                        .d
                        .and_then(|d| serde_json::from_value::<IdentifyPayload>(d).ok())
                    {
                        return Some(identify);
                    }
                }
                Ok(Message::Close(_)) | Err(_) => return None,
                _ => continue,
            }
        }
        None
    })
    .await;

    let identify = match identify_result {
        Ok(Some(identify)) => identify,
        Ok(None) => {
            tracing::debug!(session_id = %session_id, "Connection closed before Identify");
            sender_task.abort();
            return;
        }
        Err(_) => {
            tracing::debug!(session_id = %session_id, "Identify timeout");
            invalidate(&tx, sender_task).await;
            return;
        }
    };

    let user = match state.identity.resolve(&identify.token) {
        Ok(user) => user,
        Err(e) => {
            tracing::debug!(session_id = %session_id, error = %e, "Invalid token");
            invalidate(&tx, sender_task).await;
            return;
        }
    };

    let groups = match state.groups.groups_of(&user).await {
        Ok(groups) => groups,
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "Failed to load groups");
            invalidate(&tx, sender_task).await;
            return;
        }
    };

    let Some(opened) = open_session(&state, &session_id, &user, groups, tx.clone()) else {
        sender_task.abort();
        return;
    };
    let session = opened.session;
    let connected = opened.connected;
    let presence = state.engine.presence();

    tracing::info!(
        user = %user,
        session_id = %session_id,
        sessions = connected.transition.active_sessions,
        "User connected and identified"
    );

    let ctx = EventContext::new(user.clone(), session_id.clone());
    let heartbeat_timeout =
        Duration::from_millis(ws_settings.heartbeat_interval_ms + ws_settings.heartbeat_grace_ms);
    let mut heartbeat_check = interval(Duration::from_millis(ws_settings.heartbeat_interval_ms));
    heartbeat_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat_check.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(text.as_str(), &mut session_state, &session, &ctx, &state).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(session_id = %session_id, "Connection closed");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session_id, error = %e, "WebSocket error");
                        break;
                    }
                    // Pings are answered by axum
                    _ => {}
                }
            }

            _ = heartbeat_check.tick() => {
                if !session_state.is_alive(heartbeat_timeout) {
                    tracing::info!(
                        session_id = %session_id,
                        "Heartbeat timeout, closing connection"
                    );
                    break;
                }
            }
        }
    }

    state.gateway.unregister_session(&session_id);
    presence.disconnect(&user);
    sender_task.abort();

    tracing::info!(user = %user, session_id = %session_id, "User disconnected");
}

/// Parse an inbound frame; one that is not valid JSON counts as a dropped
/// malformed event.
fn parse_frame(text: &str, session_id: &str) -> Option<GatewayReceive> {
    match serde_json::from_str::<GatewayReceive>(text) {
        Ok(frame) => Some(frame),
        Err(e) => {
            metrics::record_dropped_event("malformed", "invalid_argument");
            tracing::debug!(session_id = %session_id, error = %e, "Unparseable frame");
            None
        }
    }
}

/// Handle one inbound text frame of an identified session.
async fn handle_frame(
    text: &str,
    session_state: &mut SessionState,
    session: &ConnectedSession,
    ctx: &EventContext,
    state: &AppState,
) {
    let Some(frame) = parse_frame(text, &ctx.session_id) else {
        return;
    };

    match frame.op {
        op if op == OpCode::Heartbeat as u8 => {
            session_state.heartbeat();
            session.send_raw(GatewaySend::op(OpCode::HeartbeatAck, None));
            tracing::trace!(session_id = %ctx.session_id, "Heartbeat received");
        }

        op if op == OpCode::Dispatch as u8 => {
            let Some(t) = frame.t else {
                tracing::debug!(session_id = %ctx.session_id, "Dispatch without event name");
                return;
            };
            match ClientEvent::from_frame(&t, frame.d) {
                Ok(event) => state.engine.router().dispatch(ctx, event).await,
                Err(e) => {
                    metrics::record_dropped_event("malformed", e.kind());
                    tracing::debug!(session_id = %ctx.session_id, event = %t, error = %e, "Malformed event");
                }
            }
        }

        op => {
            tracing::debug!(session_id = %ctx.session_id, op = op, "Unknown opcode");
        }
    }
}
