use std::{collections::HashMap, time::Duration};

use {parking_lot::Mutex, tokio::time::Instant};

// ── Entries ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Lease {
    gateway_rpc: String,
    expires_at: Instant,
}

/// Outcome of a heartbeat attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Lease extended.
    Refreshed,
    /// No live entry existed; treated as a fresh set-online.
    Created,
    /// The stored binding belongs to a different gateway. The lease is
    /// untouched — last set-online wins, and the losing gateway will see
    /// its sockets die and stop heartbeating.
    RejectedStale,
}

// ── Store ────────────────────────────────────────────────────────────────────

/// In-memory TTL-leased binding table. Expiry is lazy on read, with
/// [`PresenceStore::sweep`] available for periodic compaction.
#[derive(Default)]
pub struct PresenceStore {
    leases: Mutex<HashMap<u64, Lease>>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or unconditionally replace the binding for `uid`.
    pub fn set_online(&self, uid: u64, gateway_rpc: &str, ttl: Duration) {
        self.leases.lock().insert(uid, Lease {
            gateway_rpc: gateway_rpc.to_string(),
            expires_at: Instant::now() + ttl,
        });
    }

    /// Extend the lease, provided `gateway_rpc` still owns the binding.
    pub fn heartbeat(&self, uid: u64, gateway_rpc: &str, ttl: Duration) -> HeartbeatOutcome {
        let mut leases = self.leases.lock();
        let now = Instant::now();
        if let Some(lease) = leases.get_mut(&uid)
            && lease.expires_at > now
        {
            if lease.gateway_rpc != gateway_rpc {
                return HeartbeatOutcome::RejectedStale;
            }
            lease.expires_at = now + ttl;
            return HeartbeatOutcome::Refreshed;
        }
        leases.insert(uid, Lease {
            gateway_rpc: gateway_rpc.to_string(),
            expires_at: now + ttl,
        });
        HeartbeatOutcome::Created
    }

    /// Remove the binding. Idempotent.
    pub fn set_offline(&self, uid: u64) {
        self.leases.lock().remove(&uid);
    }

    /// The live binding for `uid`, if any. An expired entry is removed on
    /// the way out.
    pub fn get_route(&self, uid: u64) -> Option<String> {
        let mut leases = self.leases.lock();
        let now = Instant::now();
        match leases.get(&uid) {
            Some(lease) if lease.expires_at > now => return Some(lease.gateway_rpc.clone()),
            Some(_) => {},
            None => return None,
        }
        leases.remove(&uid);
        None
    }

    /// Drop every expired lease. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut leases = self.leases.lock();
        let now = Instant::now();
        let before = leases.len();
        leases.retain(|_, lease| lease.expires_at > now);
        before - leases.len()
    }

    pub fn len(&self) -> usize {
        self.leases.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.lock().is_empty()
    }
}
