//! Persistent client connections, at most one per peer `ip:port`.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::RwLock;

use crate::{connection::RockConnection, error::RockError, message::RockResponse};

#[derive(Default)]
pub struct RockPool {
    conns: RwLock<HashMap<String, Arc<RockConnection>>>,
}

impl RockPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the live connection for `addr`, opening one if needed. A dead
    /// pooled connection counts as a miss and is replaced.
    pub async fn get(&self, addr: &str) -> Result<Arc<RockConnection>, RockError> {
        {
            let conns = self.conns.read().await;
            if let Some(conn) = conns.get(addr)
                && conn.is_connected()
            {
                return Ok(Arc::clone(conn));
            }
        }

        // Connect outside the write lock, then re-check: another task may
        // have won the race while we were connecting.
        let fresh = RockConnection::connect(addr).await?;
        let mut conns = self.conns.write().await;
        if let Some(conn) = conns.get(addr)
            && conn.is_connected()
        {
            return Ok(Arc::clone(conn));
        }
        conns.insert(addr.to_string(), Arc::clone(&fresh));
        Ok(fresh)
    }

    /// One-shot JSON request against `addr` over the pooled connection.
    pub async fn request_json<B: serde::Serialize>(
        &self,
        addr: &str,
        cmd: u32,
        body: &B,
        timeout: Duration,
    ) -> Result<RockResponse, RockError> {
        let conn = self.get(addr).await?;
        conn.request_json(cmd, body, timeout).await
    }
}
