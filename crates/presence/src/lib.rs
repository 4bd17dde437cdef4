//! The presence directory: uid → owning-gateway route, TTL-leased.
//!
//! Gateways set a binding on connect, refresh it on every application
//! ping, and clear it on disconnect; a crashed gateway's bindings simply
//! age out within one TTL. The store is in-memory by design — the fleet
//! re-converges after a presence restart.

pub mod client;
pub mod service;
pub mod store;

pub use {client::PresenceClient, service::PresenceService, store::PresenceStore};
