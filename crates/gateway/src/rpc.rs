//! The gateway's own Rock surface: cmd 101, deliver-to-user.
//!
//! Only the local branch of delivery runs here — a forwarded envelope
//! must never be forwarded again.

use std::sync::Arc;

use {
    serde::Deserialize,
    serde_json::Value,
    tracing::debug,
};

use {
    pigeon_protocol::{cmd, result},
    pigeon_rock::{RockResponse, RockServer},
};

use crate::{push, state::GatewayState};

#[derive(Debug, Deserialize)]
struct DeliverBody {
    uid: u64,
    event: String,
    #[serde(default)]
    payload: Value,
}

pub fn build_rock_server(state: Arc<GatewayState>) -> RockServer {
    RockServer::new().handle(cmd::DELIVER_TO_USER, move |req, _peer| {
        let state = Arc::clone(&state);
        async move {
            let body: DeliverBody = match req.body_json() {
                Ok(b) => b,
                Err(_) => return RockResponse::error(req.sn, result::BAD_REQUEST, "invalid json body"),
            };
            if body.uid == 0 || body.event.is_empty() {
                return RockResponse::error(req.sn, result::BAD_REQUEST, "missing uid or event");
            }

            let delivered =
                push::push_to_user_local(&state, body.uid, &body.event, body.payload, None).await;
            debug!(uid = body.uid, event = %body.event, delivered, "rpc deliver");
            RockResponse::ok(req.sn)
        }
    })
}
