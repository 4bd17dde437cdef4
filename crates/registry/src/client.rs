//! Client side: local cache, watch subscriptions, self-registration.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Duration,
};

use {
    parking_lot::{Mutex, RwLock as SyncRwLock},
    tokio::sync::RwLock,
    tracing::{debug, warn},
};

use {
    pigeon_protocol::{SERVICE_TIMEOUT_MS, cmd},
    pigeon_rock::{RockConnection, connection::NotifyFn},
};

use crate::types::{DomainSnapshot, QueryBody, RegisterBody, RegisterReply, ServiceInstance, ServiceTree, TickBody};

fn service_timeout() -> Duration {
    Duration::from_millis(SERVICE_TIMEOUT_MS)
}

struct Advertised {
    body: RegisterBody,
    /// Registry-assigned id from the most recent successful register.
    id: Mutex<u64>,
}

/// Watches the registry and keeps a local snapshot of the service tree.
///
/// Every operation tolerates a registry outage: the cache keeps serving
/// stale data, `pick` returns `None`, and registration is replayed when a
/// connection comes back.
pub struct RegistryClient {
    endpoint: String,
    cache: Arc<SyncRwLock<ServiceTree>>,
    conn: RwLock<Option<Arc<RockConnection>>>,
    watched: Mutex<HashSet<(String, String)>>,
    advertised: Mutex<Vec<Arc<Advertised>>>,
}

impl RegistryClient {
    /// `endpoint` is the registry's `ip:port` (the `service_discovery.zk`
    /// config key). No connection is opened until first use.
    pub fn new(endpoint: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.into(),
            cache: Arc::new(SyncRwLock::new(ServiceTree::new())),
            conn: RwLock::new(None),
            watched: Mutex::new(HashSet::new()),
            advertised: Mutex::new(Vec::new()),
        })
    }

    /// Non-blocking snapshot of the local cache.
    pub fn list(&self) -> ServiceTree {
        self.cache.read().clone()
    }

    /// The cached instance with the smallest id, if any. A miss fires an
    /// implicit background `query` so a later call can succeed.
    pub async fn pick(self: &Arc<Self>, domain: &str, service: &str) -> Option<ServiceInstance> {
        {
            let cache = self.cache.read();
            if let Some(instances) = cache.get(domain).and_then(|d| d.get(service))
                && let Some((_, inst)) = instances.iter().next()
            {
                return Some(inst.clone());
            }
        }
        let this = Arc::clone(self);
        let (domain, service) = (domain.to_string(), service.to_string());
        tokio::spawn(async move {
            this.query(&domain, &service).await;
        });
        None
    }

    /// Begin (or continue) watching `{domain, service}` and refresh the
    /// cache from the registry's current snapshot. Idempotent.
    pub async fn query(self: &Arc<Self>, domain: &str, service: &str) {
        self.watched
            .lock()
            .insert((domain.to_string(), service.to_string()));
        let Some(conn) = self.connection().await else {
            return;
        };
        Self::send_query(&conn, &self.cache, domain, service).await;
    }

    /// Advertise this process under `{domain, service}`. Re-advertised
    /// automatically after a reconnect and refreshed by the maintenance
    /// loop.
    pub async fn register(self: &Arc<Self>, domain: &str, service: &str, ip: &str, port: u16, payload: String) {
        let adv = Arc::new(Advertised {
            body: RegisterBody {
                domain: domain.to_string(),
                service: service.to_string(),
                ip: ip.to_string(),
                port,
                payload,
            },
            id: Mutex::new(0),
        });
        self.advertised.lock().push(Arc::clone(&adv));
        if let Some(conn) = self.connection().await {
            Self::send_register(&conn, &adv).await;
        }
    }

    /// Periodic keepalive: ticks every advertisement (re-registering any
    /// the registry no longer knows) and re-queries the watch set.
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(conn) = this.connection().await else {
                    continue;
                };
                let advertised: Vec<_> = this.advertised.lock().iter().cloned().collect();
                for adv in advertised {
                    let tick = TickBody {
                        domain: adv.body.domain.clone(),
                        service: adv.body.service.clone(),
                        id: *adv.id.lock(),
                    };
                    match conn.request_json(cmd::registry::TICK, &tick, service_timeout()).await {
                        Ok(rsp) if rsp.is_ok() => {},
                        // The registry lost us (restart, expiry): advertise again.
                        Ok(_) => Self::send_register(&conn, &adv).await,
                        Err(e) => debug!(error = %e, "registry tick failed"),
                    }
                }
                let watched: Vec<_> = this.watched.lock().iter().cloned().collect();
                for (domain, service) in watched {
                    Self::send_query(&conn, &this.cache, &domain, &service).await;
                }
            }
        })
    }

    async fn send_register(conn: &RockConnection, adv: &Advertised) {
        match conn
            .request_json(cmd::registry::REGISTER, &adv.body, service_timeout())
            .await
        {
            Ok(rsp) if rsp.is_ok() => match rsp.body_json::<RegisterReply>() {
                Ok(reply) => *adv.id.lock() = reply.id,
                Err(e) => warn!(error = %e, "bad register reply"),
            },
            Ok(rsp) => warn!(result = rsp.result, reason = %rsp.result_str, "register rejected"),
            Err(e) => warn!(error = %e, "register failed"),
        }
    }

    async fn send_query(
        conn: &RockConnection,
        cache: &Arc<SyncRwLock<ServiceTree>>,
        domain: &str,
        service: &str,
    ) {
        let body = QueryBody {
            domain: domain.to_string(),
            service: service.to_string(),
        };
        match conn.request_json(cmd::registry::QUERY, &body, service_timeout()).await {
            Ok(rsp) if rsp.is_ok() => match rsp.body_json::<DomainSnapshot>() {
                Ok(snap) => apply_snapshot(cache, snap),
                Err(e) => warn!(error = %e, "bad query reply"),
            },
            Ok(rsp) => debug!(result = rsp.result, "registry query rejected"),
            Err(e) => debug!(error = %e, "registry query failed"),
        }
    }

    /// The live registry connection, lazily (re-)opened. A fresh connection
    /// replays every registration and watch before being handed out.
    async fn connection(self: &Arc<Self>) -> Option<Arc<RockConnection>> {
        if self.endpoint.is_empty() {
            return None;
        }
        {
            let conn = self.conn.read().await;
            if let Some(c) = conn.as_ref()
                && c.is_connected()
            {
                return Some(Arc::clone(c));
            }
        }

        let mut slot = self.conn.write().await;
        if let Some(c) = slot.as_ref()
            && c.is_connected()
        {
            return Some(Arc::clone(c));
        }

        let cache = Arc::clone(&self.cache);
        let on_notify: NotifyFn = Arc::new(move |nty| {
            if nty.cmd != cmd::registry::NOTIFY_CHANGE {
                return;
            }
            match nty.body_json::<DomainSnapshot>() {
                Ok(snap) => apply_snapshot(&cache, snap),
                Err(e) => warn!(error = %e, "bad registry notify"),
            }
        });

        let connect = RockConnection::connect_with(&self.endpoint, Some(on_notify));
        let conn = match tokio::time::timeout(service_timeout(), connect).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                debug!(endpoint = %self.endpoint, error = %e, "registry connect failed");
                return None;
            },
            Err(_) => {
                debug!(endpoint = %self.endpoint, "registry connect timed out");
                return None;
            },
        };

        let advertised: Vec<_> = self.advertised.lock().iter().cloned().collect();
        for adv in &advertised {
            Self::send_register(&conn, adv).await;
        }
        let watched: Vec<_> = self.watched.lock().iter().cloned().collect();
        for (domain, service) in &watched {
            Self::send_query(&conn, &self.cache, domain, service).await;
        }

        *slot = Some(Arc::clone(&conn));
        Some(conn)
    }
}

/// Replace the cached view of one domain with an authoritative snapshot.
fn apply_snapshot(cache: &Arc<SyncRwLock<ServiceTree>>, snap: DomainSnapshot) {
    let mut services = std::collections::HashMap::new();
    for (name, instances) in snap.services {
        let by_id: BTreeMap<u64, ServiceInstance> =
            instances.into_iter().map(|i| (i.id, i)).collect();
        services.insert(name, by_id);
    }
    cache.write().insert(snap.domain, services);
}
