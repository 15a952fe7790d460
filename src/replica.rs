//! The `Replica` struct: the single object in this process that owns every
//! piece of coordination state and application collection, shared across
//! threads through small per-domain mutexes rather than module-level
//! statics.
//!
//! Lock order, when more than one is needed, is fixed:
//! `clock` → `coordinator` → `servers_list` → collection. Every field here
//! is its own `parking_lot::Mutex` so a slow clock-sync round never blocks
//! an unrelated `users` read.

use crate::clock::{LogicalClock, PhysicalClock};
use crate::config::Config;
use crate::model::{MessageLog, NameSet, Peer, PublicationLog};
use crate::store::DurableStore;
use parking_lot::Mutex;

/// No rank has been assigned yet: a replica that failed to register with
/// the reference still runs ingress but cannot elect.
pub const NO_RANK: u32 = 0;

pub struct Replica {
    pub config: Config,
    pub store: DurableStore,

    pub logical_clock: LogicalClock,
    pub physical_clock: PhysicalClock,

    /// This replica's own rank, or [`NO_RANK`] if registration failed.
    pub rank: Mutex<u32>,
    /// The replica this one believes is coordinator, if any.
    pub coordinator: Mutex<Option<String>>,
    /// Guards against concurrent elections on this replica.
    pub in_election: Mutex<bool>,
    /// The ranked peer roster last learned from the reference.
    pub servers_list: Mutex<Vec<Peer>>,

    pub users: Mutex<NameSet>,
    pub channels: Mutex<NameSet>,
    pub logins: Mutex<Vec<crate::model::LoginRecord>>,
    pub messages: Mutex<MessageLog>,
    pub publications: Mutex<PublicationLog>,
}

impl Replica {
    pub fn new(config: Config, store: DurableStore) -> Self {
        let users = NameSet::from_vec(store.load_users());
        let channels = NameSet::from_vec(store.load_channels());
        let logins = store.load_logins();
        let messages = MessageLog::from_vec(store.load_messages());
        let publications = PublicationLog::from_vec(store.load_publications());

        Replica {
            config,
            store,
            logical_clock: LogicalClock::new(),
            physical_clock: PhysicalClock::new(),
            rank: Mutex::new(NO_RANK),
            coordinator: Mutex::new(None),
            in_election: Mutex::new(false),
            servers_list: Mutex::new(Vec::new()),
            users: Mutex::new(users),
            channels: Mutex::new(channels),
            logins: Mutex::new(logins),
            messages: Mutex::new(messages),
            publications: Mutex::new(publications),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.server_name
    }

    pub fn has_rank(&self) -> bool {
        *self.rank.lock() != NO_RANK
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator.lock().as_deref() == Some(self.name())
    }

    /// A snapshot of the whole application state, used for the `sync` RPC
    /// and for persistence after a merge.
    pub fn snapshot(&self) -> crate::model::StateSnapshot {
        crate::model::StateSnapshot {
            users: self.users.lock().items().to_vec(),
            channels: self.channels.lock().items().to_vec(),
            logins: self.logins.lock().clone(),
            messages: self.messages.lock().items().to_vec(),
            publications: self.publications.lock().items().to_vec(),
        }
    }

    /// Persists every collection to the durable store. Best-effort: a
    /// failure is logged by the store itself and never propagated to the
    /// caller.
    pub fn persist_all(&self) {
        self.store.save_users(self.users.lock().items());
        self.store.save_channels(self.channels.lock().items());
        self.store.save_logins(&self.logins.lock());
        self.store.save_messages(self.messages.lock().items());
        self.store
            .save_publications(self.publications.lock().items());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
        // keep tempdir alive for the duration of the test by leaking it;
        // acceptable in a unit test, avoided in production code.
        std::mem::forget(dir);
        Replica::new(config, store)
    }

    #[test]
    fn fresh_replica_has_no_rank_and_no_coordinator() {
        let replica = test_replica();
        assert!(!replica.has_rank());
        assert!(!replica.is_coordinator());
    }

    #[test]
    fn snapshot_reflects_mutations() {
        let replica = test_replica();
        replica.users.lock().insert("alice".into());
        assert_eq!(replica.snapshot().users, vec!["alice".to_string()]);
    }
}
