//! The presence directory as a Rock service (cmds 201-204).

use std::{sync::Arc, time::Duration};

use {
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use {
    pigeon_protocol::{PRESENCE_TTL_SEC, cmd, result},
    pigeon_rock::{RockRequest, RockResponse, RockServer},
};

use crate::store::{HeartbeatOutcome, PresenceStore};

// ── Wire bodies ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BindBody {
    uid: u64,
    gateway_rpc: String,
    #[serde(default)]
    ttl_sec: u64,
}

#[derive(Debug, Deserialize)]
struct UidBody {
    uid: u64,
}

#[derive(Debug, Serialize)]
struct RouteBody<'a> {
    gateway_rpc: &'a str,
}

// ── Service ──────────────────────────────────────────────────────────────────

pub struct PresenceService {
    store: Arc<PresenceStore>,
}

impl Default for PresenceService {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceService {
    pub fn new() -> Self {
        Self {
            store: Arc::new(PresenceStore::new()),
        }
    }

    pub fn store(&self) -> Arc<PresenceStore> {
        Arc::clone(&self.store)
    }

    /// Background compaction of aged-out leases.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let purged = store.sweep();
                if purged > 0 {
                    debug!(purged, "expired presence leases swept");
                }
            }
        })
    }

    pub fn into_rock_server(self) -> RockServer {
        let online = Arc::clone(&self.store);
        let offline = Arc::clone(&self.store);
        let heartbeat = Arc::clone(&self.store);
        let route = Arc::clone(&self.store);

        RockServer::new()
            .handle(cmd::presence::SET_ONLINE, move |req, _peer| {
                let store = Arc::clone(&online);
                async move { handle_set_online(&store, req) }
            })
            .handle(cmd::presence::SET_OFFLINE, move |req, _peer| {
                let store = Arc::clone(&offline);
                async move { handle_set_offline(&store, req) }
            })
            .handle(cmd::presence::HEARTBEAT, move |req, _peer| {
                let store = Arc::clone(&heartbeat);
                async move { handle_heartbeat(&store, req) }
            })
            .handle(cmd::presence::GET_ROUTE, move |req, _peer| {
                let store = Arc::clone(&route);
                async move { handle_get_route(&store, req) }
            })
    }
}

fn ttl_of(body_ttl_sec: u64) -> Duration {
    let secs = if body_ttl_sec == 0 { PRESENCE_TTL_SEC } else { body_ttl_sec };
    Duration::from_secs(secs)
}

fn handle_set_online(store: &PresenceStore, req: RockRequest) -> RockResponse {
    let body: BindBody = match req.body_json() {
        Ok(b) => b,
        Err(_) => return RockResponse::error(req.sn, result::BAD_REQUEST, "invalid json body"),
    };
    if body.uid == 0 || body.gateway_rpc.is_empty() {
        return RockResponse::error(req.sn, result::BAD_REQUEST, "missing uid or gateway_rpc");
    }
    store.set_online(body.uid, &body.gateway_rpc, ttl_of(body.ttl_sec));
    RockResponse::ok(req.sn)
}

fn handle_set_offline(store: &PresenceStore, req: RockRequest) -> RockResponse {
    let body: UidBody = match req.body_json() {
        Ok(b) => b,
        Err(_) => return RockResponse::error(req.sn, result::BAD_REQUEST, "invalid json body"),
    };
    if body.uid == 0 {
        return RockResponse::error(req.sn, result::BAD_REQUEST, "missing uid");
    }
    store.set_offline(body.uid);
    RockResponse::ok(req.sn)
}

fn handle_heartbeat(store: &PresenceStore, req: RockRequest) -> RockResponse {
    let body: BindBody = match req.body_json() {
        Ok(b) => b,
        Err(_) => return RockResponse::error(req.sn, result::BAD_REQUEST, "invalid json body"),
    };
    if body.uid == 0 || body.gateway_rpc.is_empty() {
        return RockResponse::error(req.sn, result::BAD_REQUEST, "missing uid or gateway_rpc");
    }
    match store.heartbeat(body.uid, &body.gateway_rpc, ttl_of(body.ttl_sec)) {
        HeartbeatOutcome::Refreshed | HeartbeatOutcome::Created => RockResponse::ok(req.sn),
        HeartbeatOutcome::RejectedStale => {
            debug!(uid = body.uid, from = %body.gateway_rpc, "stale heartbeat rejected");
            RockResponse::error(req.sn, result::CONFLICT, "gateway mismatch")
        },
    }
}

fn handle_get_route(store: &PresenceStore, req: RockRequest) -> RockResponse {
    let body: UidBody = match req.body_json() {
        Ok(b) => b,
        Err(_) => return RockResponse::error(req.sn, result::BAD_REQUEST, "invalid json body"),
    };
    let route = store.get_route(body.uid).unwrap_or_default();
    RockResponse::ok_json(req.sn, &RouteBody {
        gateway_rpc: &route,
    })
    .unwrap_or_else(|_| RockResponse::error(req.sn, result::INTERNAL, "encode route"))
}
