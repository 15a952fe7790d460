//! Replication Engine: outbound publish and inbound idempotent apply.
//!
//! This is deliberately a separate code path from `state_machine`: an
//! inbound replication event carries no preconditions to enforce and
//! produces no further effects, it is pure idempotent merge into the local
//! collections.

use crate::model::{ChannelPublication, LoginRecord, PrivateMessage};
use crate::replica::Replica;
use crate::wire::{ReplicationEvent, ReplicationOperation, ServersTopicFrame};

/// Applies one inbound `servers` topic frame. Returns `true` if it mutated
/// local state (used only for logging/tests, never branched on).
pub fn apply_frame(replica: &Replica, frame: ServersTopicFrame) -> bool {
    let mutated = match frame {
        ServersTopicFrame::Election {
            coordinator,
            clock,
            ..
        } => {
            replica.logical_clock.observe(clock);
            *replica.coordinator.lock() = Some(coordinator);
            *replica.in_election.lock() = false;
            false
        }
        ServersTopicFrame::Replication(event) => apply_replication_event(replica, event),
    };
    // A replica fed only by replication traffic (no local client requests)
    // would otherwise never persist until some unrelated client request
    // happened to land, so a mutating inbound event is flushed here.
    if mutated {
        replica.persist_all();
    }
    mutated
}

fn apply_replication_event(replica: &Replica, event: ReplicationEvent) -> bool {
    replica.logical_clock.observe(event.clock);

    if event.server == replica.name() {
        return false; // origin suppression: don't re-apply our own event
    }

    match event.operation {
        ReplicationOperation::Login { user, timestamp } => {
            let inserted = replica.users.lock().insert(user.clone());
            if inserted {
                replica.logins.lock().push(LoginRecord { user, timestamp });
            }
            inserted
        }
        ReplicationOperation::Channel { channel, .. } => replica.channels.lock().insert(channel),
        ReplicationOperation::Publish {
            channel,
            user,
            message,
            timestamp,
        } => replica.publications.lock().insert(ChannelPublication {
            channel,
            user,
            message,
            timestamp,
            clock: event.clock,
        }),
        ReplicationOperation::Message {
            src,
            dst,
            message,
            timestamp,
        } => replica.messages.lock().insert(PrivateMessage {
            src,
            dst,
            message,
            timestamp,
            clock: event.clock,
        }),
    }
}

/// Merges a peer's full snapshot into local state: set-wise merge for
/// `users`/`channels`, tuple dedup for the three logs, sorted by clock
/// afterwards.
pub fn merge_snapshot(replica: &Replica, snapshot: crate::model::StateSnapshot) {
    {
        let mut users = replica.users.lock();
        for u in snapshot.users {
            users.insert(u);
        }
    }
    {
        let mut channels = replica.channels.lock();
        for c in snapshot.channels {
            channels.insert(c);
        }
    }
    {
        let mut logins = replica.logins.lock();
        let existing: std::collections::HashSet<(String, String)> = logins
            .iter()
            .map(|l| (l.user.clone(), l.timestamp.clone()))
            .collect();
        for l in snapshot.logins {
            if !existing.contains(&(l.user.clone(), l.timestamp.clone())) {
                logins.push(l);
            }
        }
    }
    {
        let mut messages = replica.messages.lock();
        for m in snapshot.messages {
            messages.insert(m);
        }
        messages.sort_by_clock();
    }
    {
        let mut publications = replica.publications.lock();
        for p in snapshot.publications {
            publications.insert(p);
        }
        publications.sort_by_clock();
    }
    replica.persist_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::DurableStore;
    use tempfile::tempdir;

    fn test_replica(name: &str) -> Replica {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        let config = Config {
            server_name: name.into(),
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

    fn login_event(server: &str, user: &str, clock: u64) -> ServersTopicFrame {
        ServersTopicFrame::Replication(ReplicationEvent {
            server: server.into(),
            operation: ReplicationOperation::Login {
                user: user.into(),
                timestamp: "t0".into(),
            },
            timestamp: "t0".into(),
            clock,
        })
    }

    #[test]
    fn origin_suppression_skips_self_originated_events() {
        let replica = test_replica("r1");
        let applied = apply_frame(&replica, login_event("r1", "alice", 1));
        assert!(!applied);
        assert!(replica.users.lock().is_empty());
    }

    #[test]
    fn replaying_the_same_event_twice_is_idempotent() {
        let replica = test_replica("r1");
        assert!(apply_frame(&replica, login_event("r2", "alice", 1)));
        assert!(!apply_frame(&replica, login_event("r2", "alice", 2)));
        assert_eq!(replica.users.lock().len(), 1);
    }

    #[test]
    fn election_frame_updates_coordinator_and_clears_in_election() {
        let replica = test_replica("r1");
        *replica.in_election.lock() = true;
        apply_frame(
            &replica,
            ServersTopicFrame::Election {
                coordinator: "r2".into(),
                timestamp: "t0".into(),
                clock: 5,
            },
        );
        assert_eq!(replica.coordinator.lock().as_deref(), Some("r2"));
        assert!(!*replica.in_election.lock());
    }

    #[test]
    fn merge_snapshot_deduplicates_and_sorts() {
        let replica = test_replica("r1");
        replica.messages.lock().insert(PrivateMessage {
            src: "a".into(),
            dst: "b".into(),
            message: "hi".into(),
            timestamp: "t0".into(),
            clock: 5,
        });
        let snapshot = crate::model::StateSnapshot {
            users: vec!["alice".into()],
            channels: vec![],
            logins: vec![],
            messages: vec![
                PrivateMessage {
                    src: "a".into(),
                    dst: "b".into(),
                    message: "hi".into(),
                    timestamp: "t0".into(),
                    clock: 5,
                },
                PrivateMessage {
                    src: "c".into(),
                    dst: "d".into(),
                    message: "yo".into(),
                    timestamp: "t1".into(),
                    clock: 1,
                },
            ],
            publications: vec![],
        };
        merge_snapshot(&replica, snapshot);
        let messages = replica.messages.lock();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages.items()[0].clock, 1);
        assert!(replica.users.lock().contains("alice"));
    }
}
