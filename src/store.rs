//! Durable store: five JSON slots, whole-slot overwrite and whole-slot load.
//!
//! Each slot file is `{ "service": <name>, "data": { "timestamp": <iso>,
//! <payload-key>: <value> } }`. Writes go to a sibling `.tmp` file and are
//! then atomically renamed into place, so a crash mid-write never leaves a
//! half-written slot behind (losing the last write is acceptable;
//! corrupting an earlier one is not).
//!
//! The `channels` slot keeps a deliberate historical quirk: its payload key
//! on disk is `"users"`, not `"channels"`. We preserve that on write for
//! backward compatibility with files already on disk, and accept either
//! key on read.

use crate::model::{ChannelPublication, LoginRecord, PrivateMessage};
use chrono::Utc;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub struct DurableStore {
    dir: PathBuf,
}

impl DurableStore {
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(DurableStore { dir })
    }

    fn path(&self, file_stem: &str) -> PathBuf {
        self.dir.join(format!("{file_stem}.json"))
    }

    fn write_slot(&self, file_stem: &str, service: &str, key: &str, value: Value) {
        let path = self.path(file_stem);
        let tmp_path = self.dir.join(format!("{file_stem}.json.tmp"));
        let wrapper = json!({
            "service": service,
            "data": {
                "timestamp": Utc::now().to_rfc3339(),
                key: value,
            }
        });
        let result = serde_json::to_vec_pretty(&wrapper)
            .map_err(std::io::Error::other)
            .and_then(|bytes| fs::write(&tmp_path, bytes))
            .and_then(|_| fs::rename(&tmp_path, &path));
        if let Err(e) = result {
            log::warn!("failed to persist {file_stem}: {e}");
        }
    }

    /// Loads a slot's payload under any of `keys`, accepting either the
    /// wrapped `{service, data: {..}}` form or a bare array — a file written
    /// by an older or differently-shaped writer should still load.
    fn read_slot(&self, file_stem: &str, keys: &[&str]) -> Option<Value> {
        let path = self.path(file_stem);
        if !path.exists() {
            return None;
        }
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("failed to read {file_stem}: {e}");
                return None;
            }
        };
        let parsed: Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("failed to parse {file_stem}: {e}");
                return None;
            }
        };
        match parsed {
            Value::Array(_) => Some(parsed),
            Value::Object(ref top) => {
                if let Some(Value::Object(data)) = top.get("data") {
                    for key in keys {
                        if let Some(v) = data.get(*key) {
                            return Some(v.clone());
                        }
                    }
                    log::warn!(
                        "{file_stem}: wrapper present but none of {keys:?} found in data"
                    );
                    None
                } else {
                    log::warn!("{file_stem}: malformed wrapper, missing 'data' object");
                    None
                }
            }
            _ => {
                log::warn!("{file_stem}: unexpected top-level JSON shape");
                None
            }
        }
    }

    fn load_typed<T: serde::de::DeserializeOwned>(&self, file_stem: &str, keys: &[&str]) -> Vec<T> {
        self.read_slot(file_stem, keys)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    pub fn load_users(&self) -> Vec<String> {
        self.load_typed("users", &["users"])
    }

    pub fn save_users(&self, users: &[String]) {
        self.write_slot("users", "users", "users", json!(users));
    }

    /// Deliberately accepts either `"channels"` (the intuitive key) or
    /// `"users"` (the historical quirk) on read.
    pub fn load_channels(&self) -> Vec<String> {
        self.load_typed("channels", &["channels", "users"])
    }

    /// Writes under the `"users"` key to stay compatible with files already
    /// on disk.
    pub fn save_channels(&self, channels: &[String]) {
        self.write_slot("channels", "channels", "users", json!(channels));
    }

    pub fn load_logins(&self) -> Vec<LoginRecord> {
        self.load_typed("logins", &["logins"])
    }

    pub fn save_logins(&self, logins: &[LoginRecord]) {
        self.write_slot("logins", "login", "logins", json!(logins));
    }

    pub fn load_messages(&self) -> Vec<PrivateMessage> {
        self.load_typed("messages", &["messages"])
    }

    pub fn save_messages(&self, messages: &[PrivateMessage]) {
        self.write_slot("messages", "message", "messages", json!(messages));
    }

    pub fn load_publications(&self) -> Vec<ChannelPublication> {
        self.load_typed("publications", &["publications"])
    }

    pub fn save_publications(&self, publications: &[ChannelPublication]) {
        self.write_slot("publications", "publish", "publications", json!(publications));
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_users() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        store.save_users(&["alice".into(), "bob".into()]);
        assert_eq!(store.load_users(), vec!["alice", "bob"]);
    }

    #[test]
    fn channels_slot_written_under_users_key_but_read_back_correctly() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        store.save_channels(&["ops".into()]);

        let raw = fs::read_to_string(dir.path().join("channels.json")).unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert!(parsed["data"]["users"].is_array());
        assert!(parsed["data"].get("channels").is_none());

        assert_eq!(store.load_channels(), vec!["ops"]);
    }

    #[test]
    fn channels_slot_also_accepts_the_unquirked_key() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        let path = dir.path().join("channels.json");
        fs::write(
            &path,
            serde_json::to_vec(&json!({
                "service": "channels",
                "data": {"timestamp": "t", "channels": ["eng"]}
            }))
            .unwrap(),
        )
        .unwrap();
        assert_eq!(store.load_channels(), vec!["eng"]);
    }

    #[test]
    fn missing_slot_returns_empty_default() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        assert!(store.load_messages().is_empty());
    }

    #[test]
    fn malformed_slot_logs_and_returns_default_instead_of_panicking() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("users.json"), b"not json").unwrap();
        assert!(store.load_users().is_empty());
    }

    #[test]
    fn bare_payload_without_wrapper_is_accepted() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        fs::write(
            dir.path().join("users.json"),
            serde_json::to_vec(&json!(["carol"])).unwrap(),
        )
        .unwrap();
        assert_eq!(store.load_users(), vec!["carol"]);
    }
}
