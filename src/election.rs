//! Election Engine — Bully protocol.
//!
//! Triggered at startup, on a timed-out peer RPC to the believed
//! coordinator, and by [`net::peer`] when a higher-ranked replica receives
//! an `election` request from a lower-ranked one.

use crate::net::{peer, reference::ReferenceClient};
use crate::replica::Replica;
use crate::wire::ServersTopicFrame;
use chrono::Utc;

/// RAII guard over `in_election`, cleared on every return path — including
/// panics unwound through it — so a failed election round never wedges a
/// replica out of future participation.
struct InElectionGuard<'a> {
    replica: &'a Replica,
}

impl<'a> InElectionGuard<'a> {
    fn try_acquire(replica: &'a Replica) -> Option<Self> {
        let mut guard = replica.in_election.lock();
        if *guard {
            return None;
        }
        *guard = true;
        drop(guard);
        Some(InElectionGuard { replica })
    }
}

impl Drop for InElectionGuard<'_> {
    fn drop(&mut self) {
        *self.replica.in_election.lock() = false;
    }
}

/// Publishes the coordinator announcement on the `servers` topic once this
/// replica wins an election (step 6).
pub trait Announcer {
    fn announce_coordinator(&self, frame: ServersTopicFrame);
}

/// Runs one election round for `replica`. `reference` supplies the current
/// roster; `announcer` publishes the winning announcement. No-op if an
/// election is already running or the replica has no rank (a replica that
/// never registered with the reference neither calls for nor answers an
/// election).
pub fn run_with(
    replica: &Replica,
    reference: &ReferenceClient,
    announcer: &dyn Announcer,
) -> crate::error::Result<()> {
    let Some(_guard) = InElectionGuard::try_acquire(replica) else {
        return Ok(());
    };
    if !replica.has_rank() {
        return Ok(());
    }

    let roster = reference.list(replica)?;
    let self_rank = *replica.rank.lock();
    let higher: Vec<_> = roster
        .into_iter()
        .filter(|p| p.rank > self_rank && p.name != replica.name())
        .collect();

    if higher.is_empty() {
        become_coordinator(replica, announcer);
        return Ok(());
    }

    let mut any_ok = false;
    for peer in &higher {
        let clock = replica.logical_clock.tick();
        match peer::request_election(&peer.name, replica.config.peer_port, clock) {
            Ok(ack) => {
                replica.logical_clock.observe(ack.clock);
                any_ok = true;
            }
            Err(_) => continue, // timeout or unreachable: that peer did not respond
        }
    }

    if !any_ok {
        become_coordinator(replica, announcer);
    }
    // else: wait for the winning replica's announcement to arrive via the
    // `servers` topic subscriber, which clears `coordinator`/`in_election`.
    Ok(())
}

/// Convenience wrapper building a [`ReferenceClient`] and a pub/sub
/// announcer from `replica.config`, for callers (peer RPC, ingress) that
/// don't already hold one.
pub fn run(replica: &Replica) -> crate::error::Result<()> {
    let reference = ReferenceClient::new(&replica.config.reference_address);
    let announcer = crate::net::pubsub::PubSubAnnouncer::new(&replica.config.proxy_address);
    run_with(replica, &reference, &announcer)
}

fn become_coordinator(replica: &Replica, announcer: &dyn Announcer) {
    *replica.coordinator.lock() = Some(replica.name().to_string());
    let clock = replica.logical_clock.tick();
    announcer.announce_coordinator(ServersTopicFrame::Election {
        coordinator: replica.name().to_string(),
        timestamp: Utc::now().to_rfc3339(),
        clock,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::Peer;
    use crate::store::DurableStore;
    use parking_lot::Mutex as StdMutex;
    use tempfile::tempdir;

    fn test_replica(name: &str, rank: u32) -> Replica {
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
        let replica = Replica::new(config, store);
        *replica.rank.lock() = rank;
        replica
    }

    struct RecordingAnnouncer {
        frames: StdMutex<Vec<ServersTopicFrame>>,
    }

    impl RecordingAnnouncer {
        fn new() -> Self {
            RecordingAnnouncer {
                frames: StdMutex::new(Vec::new()),
            }
        }
    }

    impl Announcer for RecordingAnnouncer {
        fn announce_coordinator(&self, frame: ServersTopicFrame) {
            self.frames.lock().push(frame);
        }
    }

    #[test]
    fn sole_highest_rank_becomes_coordinator_with_no_peers_reachable() {
        let replica = test_replica("r1", 3);
        // No higher ranks registered in the (unreachable) reference, and the
        // reference itself is unreachable here, so `list` will error and the
        // round aborts — exercised instead via the lower-level helper.
        let announcer = RecordingAnnouncer::new();
        become_coordinator(&replica, &announcer);
        assert_eq!(replica.coordinator.lock().as_deref(), Some("r1"));
        assert_eq!(announcer.frames.lock().len(), 1);
    }

    #[test]
    fn replica_without_rank_never_enters_election_guard_work() {
        let replica = test_replica("r1", crate::replica::NO_RANK);
        assert!(!replica.has_rank());
    }

    #[test]
    fn guard_refuses_concurrent_entry_and_clears_on_drop() {
        let replica = test_replica("r1", 1);
        let first = InElectionGuard::try_acquire(&replica);
        assert!(first.is_some());
        assert!(InElectionGuard::try_acquire(&replica).is_none());
        drop(first);
        assert!(InElectionGuard::try_acquire(&replica).is_some());
    }

    #[test]
    fn higher_rank_filter_excludes_self_and_lower_ranks() {
        let roster = vec![
            Peer { name: "r1".into(), rank: 1 },
            Peer { name: "r2".into(), rank: 2 },
            Peer { name: "r3".into(), rank: 3 },
        ];
        let self_rank = 2;
        let self_name = "r2";
        let higher: Vec<_> = roster
            .into_iter()
            .filter(|p| p.rank > self_rank && p.name != self_name)
            .collect();
        assert_eq!(higher.len(), 1);
        assert_eq!(higher[0].name, "r3");
    }
}
