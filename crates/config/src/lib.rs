//! Configuration discovery and schema for every pigeon process role.

pub mod loader;
pub mod schema;

pub use {
    loader::{clear_config_dir, config_dir, discover_and_load, load_config, set_config_dir},
    schema::{
        AuthConfig, GatewayConfig, JwtConfig, PigeonConfig, PresenceConfig, ServerConfig,
        ServerKind, ServiceAddrConfig, ServiceDiscoveryConfig, WebsocketConfig,
    },
};
