//! Offline work queue: durable entries, connectivity signal, and replay.

pub mod entry;
pub mod events;
pub mod network;
pub mod service;
