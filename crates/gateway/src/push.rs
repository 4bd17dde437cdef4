//! Outbound delivery: local fan-out plus the cross-gateway dispatcher.
//!
//! Everything here is best-effort. A uid with no live sessions anywhere,
//! a vanished gateway, an expired route — all end in a log line, never an
//! error to the producer. Clients reconcile on their next poll or
//! reconnect.

use std::{sync::Arc, time::Duration};

use {
    serde_json::{Value, json},
    tracing::{debug, warn},
};

use pigeon_protocol::{DELIVER_TIMEOUT_MS, Envelope, cmd, events};

use crate::state::GatewayState;

/// Deliver an envelope to every live session of `uid`, wherever its
/// gateway is.
///
/// Local sessions win; otherwise presence names the owner and one Rock
/// RPC (cmd 101) hands the envelope over. A route equal to our own
/// advertised address means the lease outlived the sessions — returning
/// without an RPC is what prevents a gateway from calling itself forever.
pub async fn push_to_user(
    state: &Arc<GatewayState>,
    uid: u64,
    event: &str,
    payload: Value,
    ackid: Option<String>,
) {
    if uid == 0 || event.is_empty() {
        return;
    }

    let delivered = push_to_user_local(state, uid, event, payload.clone(), ackid).await;
    if delivered > 0 {
        return;
    }

    let Some(route) = state.presence.get_route(uid).await else {
        debug!(uid, event, "uid offline, dropping push");
        return;
    };
    if route == state.rpc_addr {
        debug!(uid, event, "route points at ourselves with no local session, dropping");
        return;
    }

    let body = json!({ "uid": uid, "event": event, "payload": payload });
    match state
        .pool
        .request_json(
            &route,
            cmd::DELIVER_TO_USER,
            &body,
            Duration::from_millis(DELIVER_TIMEOUT_MS),
        )
        .await
    {
        Ok(rsp) if rsp.is_ok() => {},
        Ok(rsp) => {
            warn!(uid, event, owner = %route, result = rsp.result, reason = %rsp.result_str, "remote deliver rejected");
        },
        Err(e) => {
            warn!(uid, event, owner = %route, error = %e, "remote deliver failed, dropping");
        },
    }
}

/// The local-only branch: fan out to this process's sessions. Returns the
/// number of sessions the envelope was queued on.
pub async fn push_to_user_local(
    state: &Arc<GatewayState>,
    uid: u64,
    event: &str,
    payload: Value,
    ackid: Option<String>,
) -> usize {
    let targets = state.collect_sessions(uid).await;
    if targets.is_empty() {
        return 0;
    }

    let envelope = Envelope::new(event, payload).with_ackid(ackid);
    let Ok(frame) = serde_json::to_string(&envelope) else {
        return 0;
    };

    let mut delivered = 0;
    for (conn_id, session) in targets {
        if session.send(frame.clone()) {
            delivered += 1;
        } else {
            // Write loop already gone; the close hook will erase it.
            debug!(conn_id, uid, "skipped dead session");
        }
    }
    delivered
}

/// Route a chat message to its audience.
///
/// Single chat (`talk_mode == 1`): the counterpart gets it, and the
/// sender's other devices get a sync copy — except in a self-chat, which
/// is delivered exactly once. Group chat (`talk_mode == 2`): `to_from_id`
/// is the group id; the talk service maps it to a member list and each
/// member gets a copy. Any lookup failure drops the whole group push.
pub async fn push_im_message(
    state: &Arc<GatewayState>,
    talk_mode: i64,
    to_from_id: u64,
    from_id: u64,
    body: Value,
) {
    match talk_mode {
        1 => {
            push_to_user(state, to_from_id, events::MESSAGE, body.clone(), None).await;
            if from_id != 0 && from_id != to_from_id {
                push_to_user(state, from_id, events::MESSAGE, body, None).await;
            }
        },
        2 => {
            let talk_id = match state.talk.group_talk_id(to_from_id).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(group_id = to_from_id, error = %e, "group talk lookup failed, dropping");
                    return;
                },
            };
            let members = match state.talk.talk_members(talk_id).await {
                Ok(members) => members,
                Err(e) => {
                    warn!(talk_id, error = %e, "member lookup failed, dropping");
                    return;
                },
            };
            for uid in members {
                push_to_user(state, uid, events::MESSAGE, body.clone(), None).await;
            }
        },
        other => debug!(talk_mode = other, "unknown talk mode, dropping"),
    }
}
