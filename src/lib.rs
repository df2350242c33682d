//! # RelayMQ
//!
//! `relaymq` is a lightweight message-queue broker reachable over persistent
//! WebSocket connections. Producers enqueue messages onto named, bounded
//! queues; consumers subscribe to a queue and receive messages one at a time,
//! acknowledging each before the next is delivered. Unacknowledged state is
//! persisted in an embedded store and recovered after a restart, giving
//! at-least-once delivery.
//!
//! ## Core Modules
//!
//! - `broker`: the engine itself (queues, registry, subscriptions, id
//!   assignment, acknowledgment-driven flow control).
//! - `client`: the per-connection identity and outbound delivery channel.
//! - `config`: layered file/environment configuration.
//! - `persistence`: the durable record of queue definitions and
//!   unacknowledged messages (backed by `sled`).
//! - `transport`: the WebSocket server and the read-only HTTP status surface.
//! - `utils`: shared error taxonomy and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod persistence;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
