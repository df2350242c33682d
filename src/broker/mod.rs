pub mod engine;
pub mod idgen;
pub mod message;
pub mod queue;
pub mod registry;
pub mod subscription;

pub use engine::{Broker, BrokerOptions};

#[cfg(test)]
mod tests;
