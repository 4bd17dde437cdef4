//! Where a logical service's RPC address comes from.

use std::sync::Arc;

use crate::client::RegistryClient;

/// Resolves one logical service to an `ip:port`, preferring a fixed
/// configured address — the production mode for singleton services, which
/// removes startup-order coupling on the registry entirely.
#[derive(Clone)]
pub struct ServiceResolver {
    fixed: Option<String>,
    registry: Option<Arc<RegistryClient>>,
    domain: String,
    service: String,
}

impl ServiceResolver {
    pub fn fixed(addr: impl Into<String>) -> Self {
        Self {
            fixed: Some(addr.into()),
            registry: None,
            domain: String::new(),
            service: String::new(),
        }
    }

    pub fn discovered(
        registry: Arc<RegistryClient>,
        domain: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            fixed: None,
            registry: Some(registry),
            domain: domain.into(),
            service: service.into(),
        }
    }

    /// A non-empty `fixed_addr` config value short-circuits discovery.
    pub fn from_config(
        fixed_addr: &str,
        registry: Option<Arc<RegistryClient>>,
        domain: &str,
        service: &str,
    ) -> Self {
        if !fixed_addr.is_empty() {
            return Self::fixed(fixed_addr);
        }
        Self {
            fixed: None,
            registry,
            domain: domain.to_string(),
            service: service.to_string(),
        }
    }

    /// `None` means the service is currently unreachable; callers must
    /// degrade (503, drop with a warning) rather than block.
    pub async fn resolve(&self) -> Option<String> {
        if let Some(addr) = &self.fixed {
            return Some(addr.clone());
        }
        let registry = self.registry.as_ref()?;
        let instance = registry.pick(&self.domain, &self.service).await?;
        Some(instance.payload_rpc_addr().unwrap_or_else(|| instance.rpc_addr()))
    }
}
