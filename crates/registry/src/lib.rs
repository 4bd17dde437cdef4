//! Service discovery: a watched `{domain → service → instance}` tree.
//!
//! The authoritative registry is itself a small Rock service
//! ([`RegistryService`]); clients keep an eventually-consistent local
//! cache that a registry outage can never invalidate — `list` returns
//! whatever is cached, `pick` just returns `None`. Production deployments
//! of singleton services usually skip discovery entirely via the fixed
//! `*.rpc_addr` config keys, which [`ServiceResolver`] honours first.

pub mod client;
pub mod resolver;
pub mod server;
pub mod types;

pub use {
    client::RegistryClient,
    resolver::ServiceResolver,
    server::RegistryService,
    types::{DomainSnapshot, ServiceInstance, ServiceTree},
};
