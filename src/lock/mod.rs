//! Distributed advisory edit locks.

/// Lock documents and owner identity.
pub mod record;
/// Lock service: acquire, release, heartbeat, watch.
pub mod service;
/// Remote document store trait and in-memory implementation.
pub mod store;
