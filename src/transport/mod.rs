//! Front transports.
//!
//! - [`memory`]: the in-memory message pair backends cross-wire.
//! - [`stdio`]: one session per process over line-delimited JSON.
//! - [`http`]: streamable HTTP with per-session (stateful) or shared
//!   (stateless) inner connections.

pub mod http;
pub mod memory;
pub mod stdio;
