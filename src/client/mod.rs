//! The `client` module defines the representation of one accepted
//! connection in the broker.
//!
//! It provides the `Connection` struct: a stable identity for logging plus
//! the channel the broker uses to push frames back to the peer. Whether the
//! peer acts as a producer, a consumer, or both is decided by the frames it
//! sends, not by the connection itself.

pub mod connection;

pub use connection::Connection;
