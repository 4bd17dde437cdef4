//! The authoritative registry: an in-memory Rock service.
//!
//! Registrations live as long as the registering connection (plus ticks);
//! watchers of a domain get a snapshot notify whenever it changes.
//! Durability is a non-goal — the fleet re-registers on restart.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    parking_lot::{Mutex, RwLock},
    tracing::{debug, info},
};

use {
    pigeon_protocol::{cmd, result},
    pigeon_rock::{RockNotify, RockPeer, RockRequest, RockResponse, RockServer},
};

use crate::types::{DomainSnapshot, QueryBody, RegisterBody, RegisterReply, ServiceInstance, TickBody};

struct Registration {
    instance: ServiceInstance,
    /// Rock session that advertised it; removal happens when it ends.
    peer_id: u64,
}

#[derive(Default)]
struct Inner {
    tree: RwLock<HashMap<String, HashMap<String, BTreeMap<u64, Registration>>>>,
    /// domain → watching peers, subscribed by query.
    watchers: Mutex<HashMap<String, HashMap<u64, RockPeer>>>,
    next_id: AtomicU64,
}

#[derive(Default)]
pub struct RegistryService {
    inner: Arc<Inner>,
}

impl RegistryService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_rock_server(self) -> RockServer {
        let register = Arc::clone(&self.inner);
        let query = Arc::clone(&self.inner);
        let tick = Arc::clone(&self.inner);
        let disconnect = Arc::clone(&self.inner);

        RockServer::new()
            .handle(cmd::registry::REGISTER, move |req, peer| {
                let inner = Arc::clone(&register);
                async move { handle_register(&inner, req, &peer) }
            })
            .handle(cmd::registry::QUERY, move |req, peer| {
                let inner = Arc::clone(&query);
                async move { handle_query(&inner, req, peer) }
            })
            .handle(cmd::registry::TICK, move |req, _peer| {
                let inner = Arc::clone(&tick);
                async move { handle_tick(&inner, req) }
            })
            .on_disconnect(move |peer_id| drop_peer(&disconnect, peer_id))
    }
}

fn handle_register(inner: &Inner, req: RockRequest, peer: &RockPeer) -> RockResponse {
    let body: RegisterBody = match req.body_json() {
        Ok(b) => b,
        Err(_) => return RockResponse::error(req.sn, result::BAD_REQUEST, "invalid json body"),
    };
    if body.domain.is_empty() || body.service.is_empty() || body.ip.is_empty() || body.port == 0 {
        return RockResponse::error(req.sn, result::BAD_REQUEST, "missing domain/service/addr");
    }

    let id = inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
    let instance = ServiceInstance {
        id,
        ip: body.ip.clone(),
        port: body.port,
        payload: body.payload.clone(),
    };
    {
        let mut tree = inner.tree.write();
        let services = tree.entry(body.domain.clone()).or_default();
        let instances = services.entry(body.service.clone()).or_default();
        // One registration per peer+service; a re-register replaces it.
        instances.retain(|_, reg| reg.peer_id != peer.id());
        instances.insert(id, Registration {
            instance,
            peer_id: peer.id(),
        });
    }
    info!(domain = %body.domain, service = %body.service, id, addr = %format!("{}:{}", body.ip, body.port), "instance registered");
    notify_domain(inner, &body.domain);

    RockResponse::ok_json(req.sn, &RegisterReply { id })
        .unwrap_or_else(|_| RockResponse::error(req.sn, result::INTERNAL, "encode reply"))
}

fn handle_query(inner: &Inner, req: RockRequest, peer: RockPeer) -> RockResponse {
    let body: QueryBody = match req.body_json() {
        Ok(b) => b,
        Err(_) => return RockResponse::error(req.sn, result::BAD_REQUEST, "invalid json body"),
    };
    if body.domain.is_empty() {
        return RockResponse::error(req.sn, result::BAD_REQUEST, "missing domain");
    }

    inner
        .watchers
        .lock()
        .entry(body.domain.clone())
        .or_default()
        .insert(peer.id(), peer);

    let snap = snapshot_domain(inner, &body.domain);
    RockResponse::ok_json(req.sn, &snap)
        .unwrap_or_else(|_| RockResponse::error(req.sn, result::INTERNAL, "encode snapshot"))
}

fn handle_tick(inner: &Inner, req: RockRequest) -> RockResponse {
    let body: TickBody = match req.body_json() {
        Ok(b) => b,
        Err(_) => return RockResponse::error(req.sn, result::BAD_REQUEST, "invalid json body"),
    };
    let tree = inner.tree.read();
    let known = tree
        .get(&body.domain)
        .and_then(|d| d.get(&body.service))
        .is_some_and(|instances| instances.contains_key(&body.id));
    if known {
        RockResponse::ok(req.sn)
    } else {
        // Tells the client to re-register.
        RockResponse::error(req.sn, result::NOT_FOUND, "unknown registration")
    }
}

fn drop_peer(inner: &Inner, peer_id: u64) {
    let mut touched = Vec::new();
    {
        let mut tree = inner.tree.write();
        for (domain, services) in tree.iter_mut() {
            let mut changed = false;
            for instances in services.values_mut() {
                let before = instances.len();
                instances.retain(|_, reg| reg.peer_id != peer_id);
                changed |= instances.len() != before;
            }
            if changed {
                touched.push(domain.clone());
            }
        }
    }
    {
        let mut watchers = inner.watchers.lock();
        for peers in watchers.values_mut() {
            peers.remove(&peer_id);
        }
    }
    for domain in touched {
        debug!(peer = peer_id, domain = %domain, "registrations dropped with peer");
        notify_domain(inner, &domain);
    }
}

fn snapshot_domain(inner: &Inner, domain: &str) -> DomainSnapshot {
    let tree = inner.tree.read();
    let services = tree
        .get(domain)
        .map(|services| {
            services
                .iter()
                .map(|(name, instances)| {
                    let list: Vec<_> = instances.values().map(|r| r.instance.clone()).collect();
                    (name.clone(), list)
                })
                .collect()
        })
        .unwrap_or_default();
    DomainSnapshot {
        domain: domain.to_string(),
        services,
    }
}

/// Push the domain's current snapshot to every watcher, pruning peers
/// whose sessions are gone.
fn notify_domain(inner: &Inner, domain: &str) {
    let snap = snapshot_domain(inner, domain);
    let Ok(nty) = RockNotify::json(cmd::registry::NOTIFY_CHANGE, &snap) else {
        return;
    };
    let mut watchers = inner.watchers.lock();
    if let Some(peers) = watchers.get_mut(domain) {
        peers.retain(|_, peer| peer.notify(nty.clone()));
    }
}
