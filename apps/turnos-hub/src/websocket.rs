use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tracing::{debug, info, warn};
use turnos_proto::{ClientMessage, PeerRole, ServerMessage};

use crate::registry::PeerKey;
use crate::telemetry::{
    METRIC_CONNECTIONS_ACTIVE, METRIC_CONNECTIONS_TOTAL, METRIC_MESSAGES_FORWARDED_TOTAL,
    METRIC_REJECTED_TOTAL, METRIC_STATES_TOTAL,
};
use crate::HubState;

/// Close code sent to an admin whose token does not match.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

pub async fn ws_handler(State(state): State<HubState>, ws: WebSocketUpgrade) -> Response {
    let limit = state.config.max_message_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

enum Flow {
    Continue,
    Close,
}

async fn handle_socket(socket: WebSocket, state: HubState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let registration = state.registry.register();
    let key = registration.key;
    let mut outbound = registration.receiver;
    counter!(METRIC_CONNECTIONS_TOTAL, 1);
    gauge!(METRIC_CONNECTIONS_ACTIVE, registration.active as f64);
    info!(peer_id = %key.id, active = registration.active, "peer connected");

    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let closing = matches!(message, Message::Close(_));
            if ws_tx.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // The writer stops once the peer is closed from the hub side (token
    // rejection, idle sweep) or the socket fails; stop reading then too.
    let mut writer_done = false;
    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            result = &mut writer => {
                writer_done = true;
                if result.is_err() {
                    warn!(peer_id = %key.id, "writer task panicked");
                }
                break;
            }
        };
        let Some(frame) = frame else {
            break;
        };
        state.registry.touch(key);
        let flow = match frame {
            Ok(Message::Text(text)) => handle_text(&state, key, text),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => handle_text(&state, key, text),
                Err(_) => {
                    debug!(peer_id = %key.id, "ignoring non-utf8 binary frame");
                    Flow::Continue
                }
            },
            Ok(Message::Close(frame)) => {
                debug!(
                    peer_id = %key.id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "peer closed websocket"
                );
                Flow::Close
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => Flow::Continue,
            Err(err) => {
                debug!(peer_id = %key.id, error = %err, "websocket receive failed");
                Flow::Close
            }
        };
        if let Flow::Close = flow {
            break;
        }
    }

    let active = state.registry.unregister(key);
    gauge!(METRIC_CONNECTIONS_ACTIVE, active as f64);
    if !writer_done && writer.await.is_err() {
        warn!(peer_id = %key.id, "writer task panicked");
    }
    info!(peer_id = %key.id, active, "peer disconnected");
}

fn handle_text(state: &HubState, key: PeerKey, text: String) -> Flow {
    let Some(message) = ClientMessage::decode(&text) else {
        debug!(peer_id = %key.id, len = text.len(), "ignoring malformed message");
        return Flow::Continue;
    };

    match message {
        ClientMessage::Hello { role, token } => {
            if role == PeerRole::Admin && !state.config.admin_token_matches(token.as_deref()) {
                warn!(peer_id = %key.id, "admin hello with wrong token");
                counter!(METRIC_REJECTED_TOTAL, 1, "reason" => "unauthorized");
                reply(state, key, ServerMessage::error("unauthorized"));
                state.registry.close(key, CLOSE_UNAUTHORIZED, "unauthorized");
                return Flow::Close;
            }
            let pushed = state.registry.hello(key, role);
            info!(peer_id = %key.id, %role, pushed, "hello");
        }
        ClientMessage::State { .. } => {
            if state.config.writes_restricted()
                && state.registry.role(key) != Some(PeerRole::Admin)
            {
                counter!(METRIC_REJECTED_TOTAL, 1, "reason" => "forbidden");
                debug!(peer_id = %key.id, "dropping state from non-admin");
                reply(state, key, ServerMessage::error("forbidden"));
                return Flow::Continue;
            }
            let bytes = text.len();
            let delivered = state.registry.publish_state(key, text);
            counter!(METRIC_STATES_TOTAL, 1);
            if delivered > 0 {
                counter!(METRIC_MESSAGES_FORWARDED_TOTAL, delivered as u64);
            }
            debug!(peer_id = %key.id, bytes, delivered, "state relayed");
        }
        ClientMessage::Ping => reply(state, key, ServerMessage::Pong),
    }
    Flow::Continue
}

fn reply(state: &HubState, key: PeerKey, message: ServerMessage) {
    match message.encode() {
        Ok(text) => {
            state.registry.send(key, Message::Text(text));
        }
        Err(err) => warn!(error = %err, "failed to encode reply"),
    }
}
