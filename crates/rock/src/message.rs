use {
    bytes::Bytes,
    serde::{Serialize, de::DeserializeOwned},
};

use crate::error::RockError;

// ── Message variants ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RockRequest {
    /// Per-connection sequence number correlating the response.
    pub sn: u32,
    pub cmd: u32,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RockResponse {
    pub sn: u32,
    pub result: i32,
    pub result_str: String,
    pub body: Bytes,
}

/// One-way message; no response is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RockNotify {
    pub cmd: u32,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RockMessage {
    Request(RockRequest),
    Response(RockResponse),
    Notify(RockNotify),
}

// ── JSON body conventions ────────────────────────────────────────────────────

impl RockRequest {
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

impl RockResponse {
    pub fn ok(sn: u32) -> Self {
        Self {
            sn,
            result: 200,
            result_str: String::new(),
            body: Bytes::new(),
        }
    }

    pub fn ok_json<T: Serialize>(sn: u32, body: &T) -> Result<Self, RockError> {
        Ok(Self {
            sn,
            result: 200,
            result_str: String::new(),
            body: Bytes::from(serde_json::to_vec(body)?),
        })
    }

    pub fn error(sn: u32, result: i32, reason: impl Into<String>) -> Self {
        Self {
            sn,
            result,
            result_str: reason.into(),
            body: Bytes::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result == 200
    }

    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

impl RockNotify {
    pub fn json<T: Serialize>(cmd: u32, body: &T) -> Result<Self, RockError> {
        Ok(Self {
            cmd,
            body: Bytes::from(serde_json::to_vec(body)?),
        })
    }

    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}
