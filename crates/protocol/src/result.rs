//! Service-level result codes carried in Rock responses.
//!
//! Transport failures (connect, timeout, teardown) are Rust errors on the
//! caller side and never appear as result codes.

pub const OK: i32 = 200;
pub const BAD_REQUEST: i32 = 400;
pub const NOT_FOUND: i32 = 404;
/// Heartbeat from a gateway that no longer owns the binding.
pub const CONFLICT: i32 = 409;
pub const INTERNAL: i32 = 500;
pub const UNAVAILABLE: i32 = 503;
