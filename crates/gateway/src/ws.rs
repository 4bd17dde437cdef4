//! Per-connection lifecycle: auth, session registry, envelope dispatch.

use std::sync::Arc;

use {
    axum::extract::ws::{CloseFrame, Message, WebSocket},
    futures::{SinkExt, StreamExt},
    serde_json::Value,
    tokio::sync::mpsc,
    tracing::{debug, info},
};

use pigeon_protocol::{Envelope, Platform, events};

use crate::{
    push,
    server::ConnectQuery,
    state::{GatewayState, now_ms},
};

/// Close code sent after a failed auth (policy violation).
const CLOSE_POLICY: u16 = 1008;

pub(crate) async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>, query: ConnectQuery) {
    let (mut sink, mut stream) = socket.split();

    // Auth happens after the upgrade so the client can tell a 401 apart
    // from a network fault: one error envelope, then close.
    let token = query.token.unwrap_or_default();
    let uid = match state.verifier.verify(&token) {
        Ok(uid) => uid,
        Err(e) => {
            debug!(error = %e, "ws auth failed");
            if let Ok(text) = serde_json::to_string(&Envelope::error(401, "unauthorized")) {
                let _ = sink.send(Message::Text(text.into())).await;
            }
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_POLICY,
                    reason: "unauthorized".into(),
                })))
                .await;
            return;
        },
    };
    let platform = Platform::from_tag(query.platform.as_deref().unwrap_or(""));

    // The write loop owns the sink; the session map only ever sees this
    // channel.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let conn_id = state.insert_session(uid, platform, tx.clone()).await;
    info!(conn_id, uid, platform = platform.as_str(), "ws session open");

    send(&tx, &Envelope::connect(uid, platform, now_ms()));
    state.presence.set_online(uid, &state.rpc_addr).await;

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => handle_event(&state, uid, conn_id, &tx, text.as_str()).await,
            // Binary frames are accepted but carry nothing for us.
            Message::Binary(_) => {},
            // Wire-level ping/pong is answered by the socket layer.
            Message::Ping(_) | Message::Pong(_) => {},
            Message::Close(_) => break,
        }
    }

    state.remove_session(conn_id).await;
    state.presence.set_offline(uid).await;
    writer.abort();
    info!(conn_id, uid, "ws session closed");
}

async fn handle_event(
    state: &Arc<GatewayState>,
    uid: u64,
    conn_id: u64,
    tx: &mpsc::UnboundedSender<String>,
    raw: &str,
) {
    // Anything that isn't our envelope shape is ignored, not fatal.
    let Ok(envelope) = serde_json::from_str::<Envelope>(raw) else {
        debug!(conn_id, "unparsable ws frame ignored");
        return;
    };

    match envelope.event.as_str() {
        events::PING => {
            send(tx, &Envelope::pong(now_ms()));
            // Every application ping renews the presence lease.
            state.presence.heartbeat(uid, &state.rpc_addr).await;
        },
        // Reserved for delivery dedup.
        events::ACK => {},
        events::ECHO => {
            send(tx, &Envelope::new(events::ECHO, envelope.payload));
        },
        events::KEYBOARD => forward_keyboard(state, uid, envelope.payload).await,
        other => debug!(conn_id, event = other, "unhandled ws event"),
    }
}

/// Typing indicator: forwarded to the counterpart in single chats, with
/// the sender stamped server-side so it cannot be spoofed. Group chats
/// deliberately do not broadcast typing — that is a message storm.
async fn forward_keyboard(state: &Arc<GatewayState>, uid: u64, payload: Value) {
    let Some(talk_mode) = payload.get("talk_mode").and_then(Value::as_i64) else {
        return;
    };
    let Some(to_from_id) = payload.get("to_from_id").and_then(uid_field) else {
        return;
    };
    if talk_mode != 1 {
        return;
    }

    let mut forwarded = payload;
    if let Some(obj) = forwarded.as_object_mut() {
        obj.insert("from_id".into(), serde_json::json!(uid));
    }
    push::push_to_user(state, to_from_id, events::KEYBOARD, forwarded, None).await;
}

/// Uids arrive as JSON numbers or decimal strings depending on the client.
fn uid_field(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64().filter(|u| *u != 0),
        Value::String(s) => s.parse::<u64>().ok().filter(|u| *u != 0),
        _ => None,
    }
}

fn send(tx: &mpsc::UnboundedSender<String>, envelope: &Envelope) {
    if let Ok(text) = serde_json::to_string(envelope) {
        let _ = tx.send(text);
    }
}
