//! Seam to the talk service: the conversation directory the gateway
//! consults for group fan-out. Only the two lookups delivery needs are
//! modelled; the talk service's own persistence is someone else's
//! problem.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::json,
    tracing::debug,
};

use {
    pigeon_protocol::{TALK_TIMEOUT_MS, cmd},
    pigeon_registry::ServiceResolver,
    pigeon_rock::{RockPool, RockResponse},
};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TalkError {
    #[error("talk service unavailable")]
    Unavailable,
    #[error("talk service error {code}: {message}")]
    Remote { code: i32, message: String },
    #[error("invalid talk service reply")]
    BadReply,
}

// ── Directory trait ──────────────────────────────────────────────────────────

/// Resolves conversations to their participants.
#[async_trait]
pub trait TalkDirectory: Send + Sync {
    /// The talk-id backing a group.
    async fn group_talk_id(&self, group_id: u64) -> Result<u64, TalkError>;

    /// All member uids of a talk.
    async fn talk_members(&self, talk_id: u64) -> Result<Vec<u64>, TalkError>;
}

// ── Rock-backed client ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TalkIdData {
    #[serde(default)]
    talk_id: u64,
}

#[derive(Debug, Deserialize)]
struct TalkIdReply {
    #[serde(default)]
    data: Option<TalkIdData>,
}

#[derive(Debug, Deserialize)]
struct MembersData {
    #[serde(default)]
    user_ids: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MembersReply {
    #[serde(default)]
    data: Option<MembersData>,
}

pub struct RockTalkDirectory {
    pool: Arc<RockPool>,
    resolver: ServiceResolver,
    timeout: Duration,
}

impl RockTalkDirectory {
    pub fn new(pool: Arc<RockPool>, resolver: ServiceResolver) -> Self {
        Self {
            pool,
            resolver,
            timeout: Duration::from_millis(TALK_TIMEOUT_MS),
        }
    }

    async fn call(&self, cmd: u32, body: &serde_json::Value) -> Result<RockResponse, TalkError> {
        let Some(addr) = self.resolver.resolve().await else {
            return Err(TalkError::Unavailable);
        };
        let rsp = self
            .pool
            .request_json(&addr, cmd, body, self.timeout)
            .await
            .map_err(|e| {
                debug!(cmd, error = %e, "talk rpc failed");
                TalkError::Unavailable
            })?;
        if !rsp.is_ok() {
            return Err(TalkError::Remote {
                code: rsp.result,
                message: rsp.result_str,
            });
        }
        Ok(rsp)
    }
}

#[async_trait]
impl TalkDirectory for RockTalkDirectory {
    async fn group_talk_id(&self, group_id: u64) -> Result<u64, TalkError> {
        let rsp = self
            .call(cmd::talk::GET_GROUP_TALK_ID, &json!({ "group_id": group_id }))
            .await?;
        let reply: TalkIdReply = rsp.body_json().map_err(|_| TalkError::BadReply)?;
        match reply.data {
            Some(data) if data.talk_id != 0 => Ok(data.talk_id),
            _ => Err(TalkError::BadReply),
        }
    }

    async fn talk_members(&self, talk_id: u64) -> Result<Vec<u64>, TalkError> {
        let rsp = self
            .call(cmd::talk::LIST_USERS_BY_TALK_ID, &json!({ "talk_id": talk_id }))
            .await?;
        let reply: MembersReply = rsp.body_json().map_err(|_| TalkError::BadReply)?;
        let raw = reply.data.map(|d| d.user_ids).unwrap_or_default();
        // Uids arrive as numbers or decimal strings depending on the
        // caller's JSON encoder; accept both, skip the rest.
        let mut uids = Vec::with_capacity(raw.len());
        for v in raw {
            if let Some(uid) = as_uid(&v) {
                uids.push(uid);
            }
        }
        Ok(uids)
    }
}

fn as_uid(v: &serde_json::Value) -> Option<u64> {
    match v {
        serde_json::Value::Number(n) => n.as_u64().filter(|u| *u != 0),
        serde_json::Value::String(s) => s.parse::<u64>().ok().filter(|u| *u != 0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn uid_accepts_numbers_and_strings() {
        assert_eq!(as_uid(&json!(42)), Some(42));
        assert_eq!(as_uid(&json!("42")), Some(42));
        assert_eq!(as_uid(&json!(0)), None);
        assert_eq!(as_uid(&json!("zero")), None);
        assert_eq!(as_uid(&json!(null)), None);
    }

    #[test]
    fn member_reply_shapes() {
        let reply: MembersReply =
            serde_json::from_str(r#"{"data":{"user_ids":[1,"2",null,3]}}"#).unwrap();
        let uids: Vec<u64> = reply
            .data
            .unwrap()
            .user_ids
            .iter()
            .filter_map(as_uid)
            .collect();
        assert_eq!(uids, vec![1, 2, 3]);
    }

    #[test]
    fn empty_reply_tolerated() {
        let reply: MembersReply = serde_json::from_str("{}").unwrap();
        assert!(reply.data.is_none());
    }
}
