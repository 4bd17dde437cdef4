//! Typed client for the presence directory.
//!
//! Every call is fail-soft: presence being slow, partitioned, or down
//! degrades delivery to best-effort, it never propagates an error into
//! the gateway's connection handling.

use std::{sync::Arc, time::Duration};

use {
    serde::Deserialize,
    serde_json::json,
    tracing::{debug, warn},
};

use {
    pigeon_protocol::{PRESENCE_TIMEOUT_MS, PRESENCE_TTL_SEC, cmd},
    pigeon_registry::ServiceResolver,
    pigeon_rock::RockPool,
};

#[derive(Debug, Deserialize)]
struct RouteBody {
    #[serde(default)]
    gateway_rpc: String,
}

pub struct PresenceClient {
    pool: Arc<RockPool>,
    resolver: ServiceResolver,
    ttl_sec: u64,
    timeout: Duration,
}

impl PresenceClient {
    pub fn new(pool: Arc<RockPool>, resolver: ServiceResolver) -> Self {
        Self {
            pool,
            resolver,
            ttl_sec: PRESENCE_TTL_SEC,
            timeout: Duration::from_millis(PRESENCE_TIMEOUT_MS),
        }
    }

    pub fn with_ttl_sec(mut self, ttl_sec: u64) -> Self {
        if ttl_sec > 0 {
            self.ttl_sec = ttl_sec;
        }
        self
    }

    /// Bind `uid` to `gateway_rpc`. `gateway_rpc` must be the exact string
    /// the gateway also compares routes against, or the self-route check
    /// in delivery breaks.
    pub async fn set_online(&self, uid: u64, gateway_rpc: &str) {
        if uid == 0 || gateway_rpc.is_empty() {
            return;
        }
        let body = json!({ "uid": uid, "gateway_rpc": gateway_rpc, "ttl_sec": self.ttl_sec });
        self.send(cmd::presence::SET_ONLINE, &body, "set_online").await;
    }

    /// Extend the lease; called on every application-layer ping.
    pub async fn heartbeat(&self, uid: u64, gateway_rpc: &str) {
        if uid == 0 || gateway_rpc.is_empty() {
            return;
        }
        let body = json!({ "uid": uid, "gateway_rpc": gateway_rpc, "ttl_sec": self.ttl_sec });
        self.send(cmd::presence::HEARTBEAT, &body, "heartbeat").await;
    }

    pub async fn set_offline(&self, uid: u64) {
        if uid == 0 {
            return;
        }
        let body = json!({ "uid": uid });
        self.send(cmd::presence::SET_OFFLINE, &body, "set_offline").await;
    }

    /// The gateway currently owning `uid`'s sessions, or `None` when the
    /// uid is offline, the entry expired, or presence is unreachable.
    pub async fn get_route(&self, uid: u64) -> Option<String> {
        if uid == 0 {
            return None;
        }
        let addr = self.resolver.resolve().await?;
        let body = json!({ "uid": uid });
        match self
            .pool
            .request_json(&addr, cmd::presence::GET_ROUTE, &body, self.timeout)
            .await
        {
            Ok(rsp) if rsp.is_ok() => match rsp.body_json::<RouteBody>() {
                Ok(route) if !route.gateway_rpc.is_empty() => Some(route.gateway_rpc),
                Ok(_) => None,
                Err(e) => {
                    warn!(uid, error = %e, "bad get_route reply");
                    None
                },
            },
            Ok(rsp) => {
                warn!(uid, result = rsp.result, reason = %rsp.result_str, "get_route rejected");
                None
            },
            Err(e) => {
                warn!(uid, error = %e, "get_route failed");
                None
            },
        }
    }

    async fn send(&self, cmd: u32, body: &serde_json::Value, what: &str) {
        let Some(addr) = self.resolver.resolve().await else {
            debug!(what, "presence unavailable, skipping");
            return;
        };
        match self.pool.request_json(&addr, cmd, body, self.timeout).await {
            Ok(rsp) if rsp.is_ok() => {},
            Ok(rsp) => {
                // 409 here is the stale-binding tie-break doing its job;
                // everything else is worth a look.
                debug!(what, result = rsp.result, reason = %rsp.result_str, "presence call rejected");
            },
            Err(e) => warn!(what, error = %e, "presence call failed"),
        }
    }
}
