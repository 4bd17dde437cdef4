use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Router,
        extract::{Query, State, WebSocketUpgrade},
        response::{IntoResponse, Json},
        routing::get,
    },
    serde::Deserialize,
    tracing::{error, info},
};

use {
    pigeon_config::PigeonConfig,
    pigeon_presence::PresenceClient,
    pigeon_registry::{RegistryClient, ServiceResolver, types::instance_payload},
    pigeon_rock::{RockListener, RockPool, split_host_port},
    pigeon_talk::RockTalkDirectory,
};

use crate::{auth::TokenVerifier, rpc, state::GatewayState, ws};

/// Re-advertise / re-query cadence for the registry maintenance loop.
const REGISTRY_TICK: Duration = Duration::from_secs(30);

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    gateway: Arc<GatewayState>,
}

/// Upgrade query: `?token=<jwt>&platform=<web|pc|app>`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
    pub platform: Option<String>,
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the WS-side router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/wss/default.io", get(ws_upgrade_handler))
        // Glob for forward compatibility; same handler today.
        .route("/wss/{*rest}", get(ws_upgrade_handler))
        .with_state(AppState { gateway: state })
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let connections = state.gateway.session_count().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "protocol": pigeon_protocol::PROTOCOL_VERSION,
        "connections": connections,
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let gateway = state.gateway;
    ws.max_message_size(gateway.ws.message_max_size)
        .accept_unmasked_frames(gateway.ws.allow_unmasked_client_frames)
        .on_upgrade(move |socket| ws::handle_socket(socket, gateway, query))
}

// ── Startup ──────────────────────────────────────────────────────────────────

pub struct GatewayOptions {
    /// WS listener bind, e.g. `127.0.0.1:8900` (port 0 for ephemeral).
    pub ws_bind: String,
    /// Rock RPC listener bind.
    pub rpc_bind: String,
    pub config: PigeonConfig,
}

/// A started gateway; both listeners are live when this exists.
pub struct RunningGateway {
    pub ws_addr: SocketAddr,
    pub rpc_addr: SocketAddr,
    pub state: Arc<GatewayState>,
    ws_task: tokio::task::JoinHandle<()>,
    rpc_task: tokio::task::JoinHandle<()>,
}

impl RunningGateway {
    /// Run until either listener dies.
    pub async fn wait(self) -> anyhow::Result<()> {
        let _ = tokio::try_join!(self.ws_task, self.rpc_task)?;
        Ok(())
    }

    pub fn shutdown(&self) {
        self.ws_task.abort();
        self.rpc_task.abort();
    }
}

/// Bind both listeners, wire the state, and start serving.
pub async fn start(opts: GatewayOptions) -> anyhow::Result<RunningGateway> {
    let config = opts.config;

    // Rock listener first: the advertised RPC address derives from it, and
    // presence must see the exact string we later compare routes against.
    let rock_listener = RockListener::bind(&opts.rpc_bind).await?;
    let rpc_addr = rock_listener.local_addr()?;
    let advertised = if config.gateway.rpc_advertise_addr.is_empty() {
        advertised_addr(rpc_addr)
    } else {
        config.gateway.rpc_advertise_addr.clone()
    };

    let registry = (!config.service_discovery.zk.is_empty())
        .then(|| RegistryClient::new(&config.service_discovery.zk));

    let pool = Arc::new(RockPool::new());
    let presence = PresenceClient::new(
        Arc::clone(&pool),
        ServiceResolver::from_config(
            &config.presence.rpc_addr,
            registry.clone(),
            "im",
            "svc-presence",
        ),
    )
    .with_ttl_sec(config.presence.ttl_sec);
    let talk = Arc::new(RockTalkDirectory::new(
        Arc::clone(&pool),
        ServiceResolver::from_config(&config.talk.rpc_addr, registry.clone(), "im", "svc-talk"),
    ));

    let state = GatewayState::new(
        TokenVerifier::new(&config.auth.jwt),
        presence,
        talk,
        pool,
        advertised.clone(),
        config.websocket.clone(),
    );

    let rock_server = rpc::build_rock_server(Arc::clone(&state));
    let rpc_task = tokio::spawn(async move {
        if let Err(e) = rock_listener.serve(rock_server).await {
            error!(error = %e, "rock listener failed");
        }
    });

    let ws_listener = tokio::net::TcpListener::bind(&opts.ws_bind).await?;
    let ws_addr = ws_listener.local_addr()?;
    let app = build_gateway_app(Arc::clone(&state));
    let ws_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(ws_listener, app).await {
            error!(error = %e, "ws listener failed");
        }
    });

    if let Some(registry) = &registry {
        if let Some((ip, port)) = split_host_port(&advertised) {
            registry
                .register("im", "gateway-ws-rpc", ip, port, instance_payload(ip, port))
                .await;
        }
        // Start watching presence before the first push needs it.
        registry.query("im", "svc-presence").await;
        registry.spawn_maintenance(REGISTRY_TICK);
    }

    info!(
        version = %state.version,
        ws = %ws_addr,
        rpc = %rpc_addr,
        advertised = %advertised,
        "gateway up"
    );

    Ok(RunningGateway {
        ws_addr,
        rpc_addr,
        state,
        ws_task,
        rpc_task,
    })
}

/// An unspecified bind host cannot be dialled back; for single-host
/// setups loopback works, anything else needs `gateway.rpc_advertise_addr`.
fn advertised_addr(local: SocketAddr) -> String {
    if local.ip().is_unspecified() {
        format!("127.0.0.1:{}", local.port())
    } else {
        local.to_string()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use async_trait::async_trait;

    use {
        pigeon_config::{JwtConfig, WebsocketConfig},
        pigeon_presence::PresenceClient,
        pigeon_registry::ServiceResolver,
        pigeon_rock::RockPool,
        pigeon_talk::{TalkDirectory, TalkError},
    };

    use crate::{auth::TokenVerifier, state::GatewayState};

    struct NoTalk;

    #[async_trait]
    impl TalkDirectory for NoTalk {
        async fn group_talk_id(&self, _group_id: u64) -> Result<u64, TalkError> {
            Err(TalkError::Unavailable)
        }

        async fn talk_members(&self, _talk_id: u64) -> Result<Vec<u64>, TalkError> {
            Err(TalkError::Unavailable)
        }
    }

    /// State with no presence, no talk, no registry: local paths only.
    pub(crate) fn bare_state() -> Arc<GatewayState> {
        let pool = Arc::new(RockPool::new());
        let presence = PresenceClient::new(
            Arc::clone(&pool),
            ServiceResolver::from_config("", None, "im", "svc-presence"),
        );
        GatewayState::new(
            TokenVerifier::new(&JwtConfig::default()),
            presence,
            Arc::new(NoTalk),
            pool,
            "127.0.0.1:0".into(),
            WebsocketConfig::default(),
        )
    }
}
