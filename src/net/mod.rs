//! Socket-facing modules: the reference client, peer RPC client/server,
//! pub/sub publisher/subscriber, and the request-ingress loop.

pub mod ingress;
pub mod peer;
pub mod pubsub;
pub mod reference;
