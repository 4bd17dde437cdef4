//! Rock command allocation.
//!
//! Each service owns a block of the cmd space; the transport never
//! interprets cmds. Blocks in use across the fleet: gateway 101, presence
//! 201-204, contact 401-413, group 601-628, talk 701-708, media 801-805,
//! registry 901-910. Only the cmds the delivery core speaks are defined
//! here; domain services carry their own tables.

/// Gateway: deliver an envelope to a uid's local sessions.
pub const DELIVER_TO_USER: u32 = 101;

pub mod presence {
    /// Create or replace a uid's gateway binding.
    pub const SET_ONLINE: u32 = 201;
    /// Remove a uid's binding (idempotent).
    pub const SET_OFFLINE: u32 = 202;
    /// Extend the lease; behaves as set-online when the entry is absent.
    pub const HEARTBEAT: u32 = 203;
    /// Look up the current binding.
    pub const GET_ROUTE: u32 = 204;
}

pub mod talk {
    pub const GET_GROUP_TALK_ID: u32 = 707;
    pub const LIST_USERS_BY_TALK_ID: u32 = 708;
}

pub mod registry {
    /// Advertise an instance under {domain, service}.
    pub const REGISTER: u32 = 901;
    /// Subscribe to a domain and fetch its current snapshot.
    pub const QUERY: u32 = 902;
    /// Keepalive for a registered instance.
    pub const TICK: u32 = 903;
    /// Notify pushed registry -> client when a watched domain changes.
    pub const NOTIFY_CHANGE: u32 = 910;
}
