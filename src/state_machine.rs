//! Client-facing operation handlers. Each function takes the replica plus
//! the decoded request fields, applies preconditions, mutates the relevant
//! collection, and returns a `(ClientResponse, Vec<Effect>)` pair — the
//! caller (Request Ingress) is responsible for persisting durable slots on
//! success and for carrying out every effect (replication publish, pub/sub
//! fan-out) after releasing any collection lock.
//!
//! `observe()` runs first in every handler, folding the request's clock
//! value into the local one before anything else happens. `publish`/
//! `message` additionally call `tick()` for the event stamp carried in the
//! fan-out and replication payloads, distinct from the response's own
//! clock.
//!
//! This is the client-facing path; `replication::apply_*` is the separate,
//! precondition-free path peer replication events travel through — the two
//! are deliberately not unified, since the client path enforces uniqueness
//! and returns errors, while the replication path is pure idempotent merge.

use crate::effect::{Effect, FanoutPayload};
use crate::model::{ChannelPublication, LoginRecord, PrivateMessage};
use crate::replica::Replica;
use crate::wire::{
    status, ChannelsData, ClientResponse, MessageFanout, PublicationFanout, ReplicationOperation,
    StatusData, UsersData,
};
use chrono::Utc;

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn ok(clock: u64) -> StatusData {
    StatusData {
        status: status::SUCCESS.to_string(),
        timestamp: now_iso(),
        clock,
        description: None,
    }
}

fn ok_status(text: &str, clock: u64) -> StatusData {
    StatusData {
        status: text.to_string(),
        timestamp: now_iso(),
        clock,
        description: None,
    }
}

fn err(clock: u64, description: impl Into<String>) -> StatusData {
    StatusData {
        status: status::ERROR.to_string(),
        timestamp: now_iso(),
        clock,
        description: Some(description.into()),
    }
}

pub fn handle_login(
    replica: &Replica,
    user: String,
    timestamp: String,
    received_clock: u64,
) -> (ClientResponse, Vec<Effect>) {
    let clock = replica.logical_clock.observe(received_clock);

    if user.trim().is_empty() {
        return (
            ClientResponse::Login(err(clock, "user name not provided")),
            Vec::new(),
        );
    }

    let inserted = replica.users.lock().insert(user.clone());
    if !inserted {
        return (
            ClientResponse::Login(err(clock, "user already registered")),
            Vec::new(),
        );
    }

    replica.logins.lock().push(LoginRecord {
        user: user.clone(),
        timestamp: timestamp.clone(),
    });

    let effects = vec![Effect::Replicate {
        operation: ReplicationOperation::Login {
            user,
            timestamp: timestamp.clone(),
        },
        timestamp,
        clock,
    }];
    (ClientResponse::Login(ok(clock)), effects)
}

pub fn handle_users(replica: &Replica, received_clock: u64) -> ClientResponse {
    let clock = replica.logical_clock.observe(received_clock);
    ClientResponse::Users(UsersData {
        timestamp: now_iso(),
        users: replica.users.lock().items().to_vec(),
        clock,
    })
}

pub fn handle_channel(
    replica: &Replica,
    channel: String,
    timestamp: String,
    received_clock: u64,
) -> (ClientResponse, Vec<Effect>) {
    let clock = replica.logical_clock.observe(received_clock);

    if channel.trim().is_empty() {
        return (
            ClientResponse::Channel(err(clock, "channel name not provided")),
            Vec::new(),
        );
    }

    let inserted = replica.channels.lock().insert(channel.clone());
    if !inserted {
        return (
            ClientResponse::Channel(err(clock, "channel already exists")),
            Vec::new(),
        );
    }

    let effects = vec![Effect::Replicate {
        operation: ReplicationOperation::Channel {
            channel,
            timestamp: timestamp.clone(),
        },
        timestamp,
        clock,
    }];
    (ClientResponse::Channel(ok(clock)), effects)
}

pub fn handle_channels(replica: &Replica, received_clock: u64) -> ClientResponse {
    let clock = replica.logical_clock.observe(received_clock);
    ClientResponse::Channels(ChannelsData {
        timestamp: now_iso(),
        channels: replica.channels.lock().items().to_vec(),
        clock,
    })
}

pub fn handle_publish(
    replica: &Replica,
    user: String,
    channel: String,
    message: String,
    timestamp: String,
    received_clock: u64,
) -> (ClientResponse, Vec<Effect>) {
    let clock = replica.logical_clock.observe(received_clock);

    if channel.trim().is_empty() || message.trim().is_empty() {
        return (
            ClientResponse::Publish(err(clock, "channel or message not provided")),
            Vec::new(),
        );
    }
    if !replica.channels.lock().contains(&channel) {
        return (
            ClientResponse::Publish(err(clock, "channel does not exist")),
            Vec::new(),
        );
    }

    let pub_clock = replica.logical_clock.tick();
    replica.publications.lock().insert(ChannelPublication {
        channel: channel.clone(),
        user: user.clone(),
        message: message.clone(),
        timestamp: timestamp.clone(),
        clock: pub_clock,
    });

    let effects = vec![
        Effect::Fanout {
            topic: channel.clone(),
            payload: FanoutPayload::Publication(PublicationFanout {
                user: Some(user.clone()),
                message: message.clone(),
                timestamp: timestamp.clone(),
                clock: pub_clock,
            }),
        },
        Effect::Replicate {
            operation: ReplicationOperation::Publish {
                channel,
                user,
                message,
                timestamp: timestamp.clone(),
            },
            timestamp,
            clock: pub_clock,
        },
    ];
    (
        ClientResponse::Publish(ok_status(status::OK, clock)),
        effects,
    )
}

pub fn handle_message(
    replica: &Replica,
    src: String,
    dst: String,
    message: String,
    timestamp: String,
    received_clock: u64,
) -> (ClientResponse, Vec<Effect>) {
    let clock = replica.logical_clock.observe(received_clock);

    if dst.trim().is_empty() || message.trim().is_empty() {
        return (
            ClientResponse::Message(err(clock, "recipient or message not provided")),
            Vec::new(),
        );
    }
    if !replica.users.lock().contains(&dst) {
        return (
            ClientResponse::Message(err(clock, "recipient does not exist")),
            Vec::new(),
        );
    }

    let msg_clock = replica.logical_clock.tick();
    replica.messages.lock().insert(PrivateMessage {
        src: src.clone(),
        dst: dst.clone(),
        message: message.clone(),
        timestamp: timestamp.clone(),
        clock: msg_clock,
    });

    let effects = vec![
        Effect::Fanout {
            topic: dst.clone(),
            payload: FanoutPayload::Message(MessageFanout {
                from: Some(src.clone()),
                message: message.clone(),
                timestamp: timestamp.clone(),
                clock: msg_clock,
            }),
        },
        Effect::Replicate {
            operation: ReplicationOperation::Message {
                src,
                dst,
                message,
                timestamp: timestamp.clone(),
            },
            timestamp,
            clock: msg_clock,
        },
    ];
    (ClientResponse::Message(ok(clock)), effects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::DurableStore;
    use tempfile::tempdir;

    fn test_replica() -> Replica {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        let config = Config {
            server_name: "r1".into(),
            broker_address: "tcp://broker:5556".into(),
            proxy_address: "tcp://proxy:5557".into(),
            proxy_sub_address: "tcp://proxy:5558".into(),
            reference_address: "tcp://reference:5559".into(),
            peer_port: 5561,
            data_dir: dir.path().to_path_buf(),
        };
        std::mem::forget(dir);
        Replica::new(config, store)
    }

    #[test]
    fn login_twice_is_a_conflict() {
        let replica = test_replica();
        let (resp, effects) =
            handle_login(&replica, "alice".into(), "t0".into(), 0);
        assert!(matches!(resp, ClientResponse::Login(d) if d.status == status::SUCCESS));
        assert_eq!(effects.len(), 1);

        let (resp2, effects2) = handle_login(&replica, "alice".into(), "t1".into(), 1);
        match resp2 {
            ClientResponse::Login(d) => assert_eq!(d.status, status::ERROR),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(effects2.is_empty());
    }

    #[test]
    fn publish_to_unknown_channel_is_rejected_without_effects() {
        let replica = test_replica();
        let (resp, effects) = handle_publish(
            &replica,
            "x".into(),
            "ops".into(),
            "hi".into(),
            "t0".into(),
            0,
        );
        match resp {
            ClientResponse::Publish(d) => assert_eq!(d.status, status::ERROR),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(effects.is_empty());
    }

    #[test]
    fn publish_to_known_channel_emits_fanout_and_replication() {
        let replica = test_replica();
        replica.channels.lock().insert("ops".into());
        let (resp, effects) = handle_publish(
            &replica,
            "x".into(),
            "ops".into(),
            "hi".into(),
            "t0".into(),
            0,
        );
        match resp {
            ClientResponse::Publish(d) => assert_eq!(d.status, status::OK),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(effects.len(), 2);
        assert!(matches!(effects[0], Effect::Fanout { .. }));
        assert!(matches!(effects[1], Effect::Replicate { .. }));
        assert_eq!(replica.publications.lock().len(), 1);
    }

    #[test]
    fn message_to_unknown_user_is_rejected() {
        let replica = test_replica();
        let (resp, effects) = handle_message(
            &replica,
            "a".into(),
            "b".into(),
            "hi".into(),
            "t0".into(),
            0,
        );
        match resp {
            ClientResponse::Message(d) => assert_eq!(d.status, status::ERROR),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(effects.is_empty());
    }
}
