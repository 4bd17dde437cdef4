use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// One advertised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Registry-assigned, unique per registry lifetime. Pick-one chooses
    /// the smallest id so all callers agree between churn events.
    pub id: u64,
    pub ip: String,
    pub port: u16,
    /// Free-form record, conventionally `ip:port:hostname`.
    #[serde(default)]
    pub payload: String,
}

impl ServiceInstance {
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// RPC address carried in the payload record (first two segments of
    /// `ip:port:hostname`), when present and well-formed.
    pub fn payload_rpc_addr(&self) -> Option<String> {
        let mut parts = self.payload.splitn(3, ':');
        let ip = parts.next().filter(|s| !s.is_empty())?;
        let port: u16 = parts.next()?.parse().ok()?;
        Some(format!("{ip}:{port}"))
    }
}

/// Build the conventional `ip:port:hostname` payload for this process.
pub fn instance_payload(ip: &str, port: u16) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".into());
    format!("{ip}:{port}:{host}")
}

/// Snapshot shape exposed to callers: `domain → service → id → instance`.
pub type ServiceTree = HashMap<String, HashMap<String, BTreeMap<u64, ServiceInstance>>>;

// ── Wire bodies ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterBody {
    pub domain: String,
    pub service: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterReply {
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryBody {
    pub domain: String,
    pub service: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TickBody {
    pub domain: String,
    pub service: String,
    pub id: u64,
}

/// Full state of one domain; sent as the query response and pushed as a
/// change notify to every watcher of that domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSnapshot {
    pub domain: String,
    pub services: HashMap<String, Vec<ServiceInstance>>,
}
