//! Shared wire vocabulary for the pigeon fleet: WebSocket envelopes, Rock
//! command spaces, result codes, and fleet-wide timing defaults.

pub mod cmd;
pub mod envelope;
pub mod result;

pub use envelope::{Envelope, ErrorPayload, Platform, events};

/// Protocol revision advertised by the gateway's health endpoint.
pub const PROTOCOL_VERSION: u32 = 1;

/// Presence lease length granted by set-online and heartbeat, in seconds.
/// Clients heartbeat every 25-30 s, leaving three missed pings of margin.
pub const PRESENCE_TTL_SEC: u64 = 120;

/// Deadline for presence directory calls, in milliseconds.
pub const PRESENCE_TIMEOUT_MS: u64 = 300;

/// Deadline for cross-gateway deliver RPCs, in milliseconds.
pub const DELIVER_TIMEOUT_MS: u64 = 500;

/// Deadline for talk service lookups, in milliseconds.
pub const TALK_TIMEOUT_MS: u64 = 800;

/// Deadline for generic domain service calls, in milliseconds.
pub const SERVICE_TIMEOUT_MS: u64 = 3_000;

/// Upper bound on a single assembled WebSocket message, in bytes.
pub const WS_MESSAGE_MAX_SIZE: usize = 32 * 1024 * 1024;
