//! Effects emitted by the State Machine so its handlers never perform
//! socket I/O while holding a collection lock: a handler mutates state and
//! returns data describing what to send, rather than sending it inline.

use crate::wire::{MessageFanout, PublicationFanout, ReplicationOperation};

/// What to publish on a channel or user topic after a successful mutation.
#[derive(Debug, Clone)]
pub enum FanoutPayload {
    Publication(PublicationFanout),
    Message(MessageFanout),
}

/// A side effect a state-machine handler wants carried out by its caller.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Broadcast a replication event on the `servers` topic.
    Replicate {
        operation: ReplicationOperation,
        timestamp: String,
        clock: u64,
    },
    /// Publish a two-frame pub/sub message on `topic`.
    Fanout { topic: String, payload: FanoutPayload },
}
