//! Distributed coordination core for one replica of a small messaging
//! service: a Lamport logical clock, Berkeley physical-clock sync, Bully
//! leader election, pub/sub-based replication with full-state sync, and
//! the idempotent state machine whose mutations drive replication.

pub mod clock;
pub mod clocksync;
pub mod config;
pub mod effect;
pub mod election;
pub mod error;
pub mod model;
pub mod net;
pub mod replica;
pub mod replication;
pub mod state_machine;
pub mod store;
pub mod wire;

pub use error::{CoreError, Result};
pub use replica::Replica;
