//! The `persistence` module is the durable record of broker state: queue
//! definitions and every accepted-but-unacknowledged message.
//!
//! It is loaded once at startup (before any connection is accepted),
//! appended to on enqueue, and pruned on acknowledgment, so a crash at any
//! point loses nothing a producer was told was accepted.
//!
//! Backed by `sled` as an embedded key-value store.

pub mod sled_store;

pub use sled_store::Persistence;
