//! Application data model: the replicated collections and the small helper
//! types layered on top of plain `Vec`/`HashSet` to keep the uniqueness and
//! dedup invariants in one place instead of scattered across every call
//! site that touches a collection.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One entry in the reference's ranked roster, as last learned from the
/// reference service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub rank: u32,
}

/// One recorded login: an append-only `{user, timestamp}` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRecord {
    pub user: String,
    pub timestamp: String,
}

/// One private message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub src: String,
    pub dst: String,
    pub message: String,
    pub timestamp: String,
    pub clock: u64,
}

impl PrivateMessage {
    fn dedup_key(&self) -> (&str, &str, &str, &str) {
        (&self.src, &self.dst, &self.message, &self.timestamp)
    }
}

/// One channel publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPublication {
    pub channel: String,
    pub user: String,
    pub message: String,
    pub timestamp: String,
    pub clock: u64,
}

impl ChannelPublication {
    fn dedup_key(&self) -> (&str, &str, &str, &str) {
        (&self.channel, &self.user, &self.message, &self.timestamp)
    }
}

fn hash_key<T: std::hash::Hash>(key: &T) -> u64 {
    use std::hash::{BuildHasher, Hasher};
    let mut hasher = ahash::RandomState::with_seeds(1, 2, 3, 4).build_hasher();
    key.hash(&mut hasher);
    hasher.finish()
}

/// A duplicate-free, insertion-ordered set of names. Backs both the `users`
/// and `channels` collections, neither of which may contain duplicates.
#[derive(Debug, Default, Clone)]
pub struct NameSet {
    order: Vec<String>,
    present: HashSet<String>,
}

impl NameSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<String>) -> Self {
        let mut set = NameSet::new();
        for item in items {
            set.insert(item);
        }
        set
    }

    /// Inserts `name` if absent. Returns `true` if it was newly added.
    pub fn insert(&mut self, name: String) -> bool {
        if self.present.insert(name.clone()) {
            self.order.push(name);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.present.contains(name)
    }

    pub fn items(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// An insertion-ordered, tuple-deduplicated log of private messages, kept
/// sorted by Lamport clock after every merge.
#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    items: Vec<PrivateMessage>,
    seen: AHashSet<u64>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<PrivateMessage>) -> Self {
        let mut log = MessageLog::new();
        for item in items {
            log.insert(item);
        }
        log
    }

    /// Appends `entry` if its `(src, dst, message, timestamp)` tuple has not
    /// been seen before. Returns `true` if it was newly added.
    pub fn insert(&mut self, entry: PrivateMessage) -> bool {
        let key = hash_key(&entry.dedup_key());
        if self.seen.insert(key) {
            self.items.push(entry);
            true
        } else {
            false
        }
    }

    pub fn sort_by_clock(&mut self) {
        self.items.sort_by_key(|m| m.clock);
    }

    pub fn items(&self) -> &[PrivateMessage] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Same shape as [`MessageLog`] but for channel publications.
#[derive(Debug, Default, Clone)]
pub struct PublicationLog {
    items: Vec<ChannelPublication>,
    seen: AHashSet<u64>,
}

impl PublicationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<ChannelPublication>) -> Self {
        let mut log = PublicationLog::new();
        for item in items {
            log.insert(item);
        }
        log
    }

    pub fn insert(&mut self, entry: ChannelPublication) -> bool {
        let key = hash_key(&entry.dedup_key());
        if self.seen.insert(key) {
            self.items.push(entry);
            true
        } else {
            false
        }
    }

    pub fn sort_by_clock(&mut self) {
        self.items.sort_by_key(|p| p.clock);
    }

    pub fn items(&self) -> &[ChannelPublication] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// A full application-state snapshot, used both as the durable-store payload
/// shape and as the `sync` RPC response for a joining or recovering peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub users: Vec<String>,
    pub channels: Vec<String>,
    pub logins: Vec<LoginRecord>,
    pub messages: Vec<PrivateMessage>,
    pub publications: Vec<ChannelPublication>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_set_rejects_duplicates_but_keeps_order() {
        let mut set = NameSet::new();
        assert!(set.insert("alice".into()));
        assert!(!set.insert("alice".into()));
        assert!(set.insert("bob".into()));
        assert_eq!(set.items(), ["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn message_log_dedups_by_tuple_not_clock() {
        let mut log = MessageLog::new();
        let m = PrivateMessage {
            src: "a".into(),
            dst: "b".into(),
            message: "hi".into(),
            timestamp: "t1".into(),
            clock: 5,
        };
        assert!(log.insert(m.clone()));
        let mut replayed = m.clone();
        replayed.clock = 999; // different clock, same identity tuple
        assert!(!log.insert(replayed));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn message_log_sorts_by_clock_after_merge() {
        let mut log = MessageLog::new();
        for (i, clock) in [(0, 3u64), (1, 1), (2, 2)] {
            log.insert(PrivateMessage {
                src: "a".into(),
                dst: "b".into(),
                message: format!("m{i}"),
                timestamp: format!("t{i}"),
                clock,
            });
        }
        log.sort_by_clock();
        let clocks: Vec<_> = log.items().iter().map(|m| m.clock).collect();
        assert_eq!(clocks, vec![1, 2, 3]);
    }
}
