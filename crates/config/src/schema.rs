//! Config schema. Every key here is read somewhere in the fleet; unknown
//! keys in a config file are ignored so deployments can share one file
//! across process roles.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PigeonConfig {
    pub auth: AuthConfig,
    pub websocket: WebsocketConfig,
    pub gateway: GatewayConfig,
    pub presence: PresenceConfig,
    /// Fixed addresses per domain service; a non-empty `rpc_addr`
    /// disables discovery for that service.
    pub talk: ServiceAddrConfig,
    pub contact: ServiceAddrConfig,
    pub group: ServiceAddrConfig,
    pub media: ServiceAddrConfig,
    pub user: ServiceAddrConfig,
    pub service_discovery: ServiceDiscoveryConfig,
    /// Listener blocks for multi-listener deployments.
    pub servers: Vec<ServerConfig>,
}

// ── Auth ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt: JwtConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// HS256 shared secret. The dev default is deliberately useless in
    /// production.
    pub secret: String,
    pub issuer: String,
    /// Token lifetime in seconds, used when minting.
    pub expires_in: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "dev-secret".into(),
            issuer: "auth-service".into(),
            expires_in: 86_400,
        }
    }
}

// ── WebSocket ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebsocketConfig {
    /// Bound on a single assembled message, in bytes.
    pub message_max_size: usize,
    /// RFC 6455 §5.1 relaxation for non-compliant clients. Off by default.
    pub allow_unmasked_client_frames: bool,
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            message_max_size: 32 * 1024 * 1024,
            allow_unmasked_client_frames: false,
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// The `ip:port` this gateway advertises to presence and compares
    /// routes against. Defaults to the rock listener's bound address,
    /// which is wrong behind NAT — set this in any multi-host deployment.
    pub rpc_advertise_addr: String,
}

// ── Services ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceAddrConfig {
    pub rpc_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub rpc_addr: String,
    /// Lease length granted per set-online/heartbeat.
    pub ttl_sec: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            rpc_addr: String::new(),
            ttl_sec: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDiscoveryConfig {
    /// Registry endpoint `ip:port`. Empty means no discovery — only fixed
    /// `*.rpc_addr` entries work.
    pub zk: String,
}

// ── Listeners ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Http,
    Ws,
    Rock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(rename = "type")]
    pub kind: ServerKind,
    pub address: Vec<String>,
    pub ssl: bool,
    pub accept_worker: String,
    pub io_worker: String,
    pub process_worker: String,
    pub keepalive: bool,
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            kind: ServerKind::Ws,
            address: Vec::new(),
            ssl: false,
            accept_worker: String::new(),
            io_worker: String::new(),
            process_worker: String::new(),
            keepalive: true,
            name: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = PigeonConfig::default();
        assert_eq!(cfg.auth.jwt.secret, "dev-secret");
        assert_eq!(cfg.presence.ttl_sec, 120);
        assert_eq!(cfg.websocket.message_max_size, 32 * 1024 * 1024);
        assert!(!cfg.websocket.allow_unmasked_client_frames);
        assert!(cfg.service_discovery.zk.is_empty());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: PigeonConfig = toml::from_str(
            r#"
            [presence]
            rpc_addr = "10.0.0.3:9200"

            [auth.jwt]
            secret = "prod-secret"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.presence.rpc_addr, "10.0.0.3:9200");
        assert_eq!(cfg.presence.ttl_sec, 120);
        assert_eq!(cfg.auth.jwt.secret, "prod-secret");
        assert_eq!(cfg.auth.jwt.issuer, "auth-service");
    }

    #[test]
    fn server_blocks_parse() {
        let cfg: PigeonConfig = toml::from_str(
            r#"
            [[servers]]
            type = "ws"
            address = ["0.0.0.0:8900"]
            name = "gateway-ws"

            [[servers]]
            type = "rock"
            address = ["0.0.0.0:9400"]
            keepalive = false
            name = "gateway-ws-rpc"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.servers.len(), 2);
        assert_eq!(cfg.servers[0].kind, ServerKind::Ws);
        assert_eq!(cfg.servers[1].kind, ServerKind::Rock);
        assert!(!cfg.servers[1].keepalive);
    }
}
