use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::{RwLock, mpsc};

use {
    pigeon_config::WebsocketConfig,
    pigeon_presence::PresenceClient,
    pigeon_protocol::Platform,
    pigeon_rock::RockPool,
    pigeon_talk::TalkDirectory,
};

use crate::auth::TokenVerifier;

// ── Session entries ──────────────────────────────────────────────────────────

/// One authenticated WebSocket on this process.
///
/// The socket itself is owned by its I/O tasks; the map holds only this
/// channel handle. A dropped write loop makes `send` fail, so a stale
/// entry can never deliver — and the close hook erases it right after.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub uid: u64,
    pub platform: Platform,
    sender: mpsc::UnboundedSender<String>,
}

impl SessionEntry {
    /// Queue a serialized envelope for this session's write loop.
    pub fn send(&self, frame: String) -> bool {
        self.sender.send(frame).is_ok()
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared per-process state, instantiated once at startup.
pub struct GatewayState {
    /// Live sessions keyed by connection id.
    sessions: RwLock<HashMap<u64, SessionEntry>>,
    /// Connection id allocator.
    conn_seq: AtomicU64,
    pub presence: PresenceClient,
    pub talk: Arc<dyn TalkDirectory>,
    pub pool: Arc<RockPool>,
    /// The exact `ip:port` string advertised to presence; route equality
    /// against this is what breaks cross-gateway RPC cycles.
    pub rpc_addr: String,
    pub verifier: TokenVerifier,
    pub ws: WebsocketConfig,
    pub version: String,
}

impl GatewayState {
    pub fn new(
        verifier: TokenVerifier,
        presence: PresenceClient,
        talk: Arc<dyn TalkDirectory>,
        pool: Arc<RockPool>,
        rpc_addr: String,
        ws: WebsocketConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            conn_seq: AtomicU64::new(0),
            presence,
            talk,
            pool,
            rpc_addr,
            verifier,
            ws,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Register a freshly authenticated session; returns its connection id.
    pub async fn insert_session(
        &self,
        uid: u64,
        platform: Platform,
        sender: mpsc::UnboundedSender<String>,
    ) -> u64 {
        let conn_id = self.conn_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.sessions.write().await.insert(conn_id, SessionEntry {
            uid,
            platform,
            sender,
        });
        conn_id
    }

    pub async fn remove_session(&self, conn_id: u64) -> Option<SessionEntry> {
        self.sessions.write().await.remove(&conn_id)
    }

    /// Snapshot the live sessions for `uid`. The read lock is held only
    /// for the scan; delivery happens after release.
    pub async fn collect_sessions(&self, uid: u64) -> Vec<(u64, SessionEntry)> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .filter(|(_, entry)| entry.uid == uid)
            .map(|(id, entry)| (*id, entry.clone()))
            .collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
