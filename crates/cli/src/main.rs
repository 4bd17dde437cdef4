use std::time::Duration;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    pigeon_config::{PigeonConfig, ServerKind},
    pigeon_gateway::{GatewayOptions, TokenVerifier},
    pigeon_presence::PresenceService,
    pigeon_registry::RegistryService,
    pigeon_rock::RockListener,
};

/// Cadence for compacting expired presence leases.
const PRESENCE_SWEEP: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "pigeon", about = "Pigeon — real-time IM delivery fabric")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a WebSocket gateway (WS edge + Rock RPC).
    Gateway {
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        #[arg(long, default_value_t = 8900)]
        ws_port: u16,
        #[arg(long, default_value_t = 9400)]
        rpc_port: u16,
    },
    /// Start the presence directory service.
    Presence {
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        #[arg(long, default_value_t = 9200)]
        port: u16,
    },
    /// Start the service registry.
    Registry {
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        #[arg(long, default_value_t = 9100)]
        port: u16,
    },
    /// Mint a development token for a uid.
    Token {
        #[arg(long)]
        uid: u64,
        /// Lifetime in seconds; defaults to auth.jwt.expires_in.
        #[arg(long)]
        expires_in: Option<i64>,
    },
}

fn init_tracing(log_level: &str, json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

/// First address of the first `servers` block of the given kind, if any.
fn configured_bind(config: &PigeonConfig, kind: ServerKind) -> Option<String> {
    config
        .servers
        .iter()
        .find(|s| s.kind == kind)
        .and_then(|s| s.address.first().cloned())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    let config = pigeon_config::discover_and_load();

    match cli.command {
        Commands::Gateway {
            bind,
            ws_port,
            rpc_port,
        } => {
            // A configured listener block beats the flag defaults.
            let ws_bind = configured_bind(&config, ServerKind::Ws)
                .unwrap_or_else(|| format!("{bind}:{ws_port}"));
            let rpc_bind = configured_bind(&config, ServerKind::Rock)
                .unwrap_or_else(|| format!("{bind}:{rpc_port}"));
            let gateway = pigeon_gateway::start(GatewayOptions {
                ws_bind,
                rpc_bind,
                config,
            })
            .await?;
            gateway.wait().await
        },
        Commands::Presence { bind, port } => {
            let service = PresenceService::new();
            service.spawn_sweeper(PRESENCE_SWEEP);
            let listener = RockListener::bind(&format!("{bind}:{port}")).await?;
            info!(addr = %listener.local_addr()?, "presence directory up");
            listener.serve(service.into_rock_server()).await?;
            Ok(())
        },
        Commands::Registry { bind, port } => {
            let listener = RockListener::bind(&format!("{bind}:{port}")).await?;
            info!(addr = %listener.local_addr()?, "service registry up");
            listener.serve(RegistryService::new().into_rock_server()).await?;
            Ok(())
        },
        Commands::Token { uid, expires_in } => {
            let verifier = TokenVerifier::new(&config.auth.jwt);
            let lifetime = expires_in.unwrap_or(config.auth.jwt.expires_in as i64);
            let token = verifier.mint_expiring(uid, lifetime)?;
            println!("{token}");
            Ok(())
        },
    }
}
