//! Length-delimited MessagePack wire codec shared by every socket role,
//! plus the typed request/response schema for each of them.
//!
//! Framing: a 4-byte big-endian length prefix followed by that many bytes
//! of MessagePack. Pub/sub frames are two such frames back to back: a topic
//! string, then a payload.

use crate::error::{CoreError, Result};
use crate::model::{ChannelPublication, LoginRecord, Peer, PrivateMessage, StateSnapshot};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::{Read, Write};

const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Reads one length-delimited frame's raw bytes.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = r.read_u32::<BigEndian>()?;
    if len > MAX_FRAME_BYTES {
        return Err(CoreError::Protocol(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Writes one length-delimited frame.
pub fn write_frame<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    w.write_u32::<BigEndian>(bytes.len() as u32)?;
    w.write_all(bytes)?;
    Ok(())
}

/// Decodes a MessagePack value out of one frame read from `r`.
pub fn recv<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<T> {
    let bytes = read_frame(r)?;
    Ok(rmp_serde::from_slice(&bytes)?)
}

/// Encodes `value` as MessagePack and writes it as one frame to `w`.
pub fn send<W: Write, T: Serialize>(w: &mut W, value: &T) -> Result<()> {
    let bytes = rmp_serde::to_vec_named(value)?;
    write_frame(w, &bytes)
}

// ---------------------------------------------------------------------
// Broker-facing client requests/responses.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "service", content = "data")]
pub enum ClientRequest {
    #[serde(rename = "login")]
    Login {
        user: String,
        timestamp: String,
        clock: u64,
    },
    #[serde(rename = "users")]
    Users { clock: u64 },
    #[serde(rename = "channel")]
    Channel {
        channel: String,
        timestamp: String,
        clock: u64,
    },
    #[serde(rename = "channels")]
    Channels { clock: u64 },
    #[serde(rename = "publish")]
    Publish {
        user: String,
        channel: String,
        message: String,
        timestamp: String,
        clock: u64,
    },
    #[serde(rename = "message")]
    Message {
        src: String,
        dst: String,
        message: String,
        timestamp: String,
        clock: u64,
    },
}

/// `status` values used across every response.
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
    pub const OK: &str = "OK";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusData {
    pub status: String,
    pub timestamp: String,
    pub clock: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersData {
    pub timestamp: String,
    pub users: Vec<String>,
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsData {
    pub timestamp: String,
    pub channels: Vec<String>,
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub status: String,
    pub timestamp: String,
    pub description: String,
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "service", content = "data")]
pub enum ClientResponse {
    #[serde(rename = "login")]
    Login(StatusData),
    #[serde(rename = "users")]
    Users(UsersData),
    #[serde(rename = "channel")]
    Channel(StatusData),
    #[serde(rename = "channels")]
    Channels(ChannelsData),
    #[serde(rename = "publish")]
    Publish(StatusData),
    #[serde(rename = "message")]
    Message(StatusData),
    #[serde(rename = "error")]
    Error(ErrorData),
}

// ---------------------------------------------------------------------
// Peer RPC.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "service", content = "data")]
pub enum PeerRequest {
    #[serde(rename = "election")]
    Election { timestamp: String, clock: u64 },
    #[serde(rename = "clock")]
    Clock { timestamp: String, clock: u64 },
    #[serde(rename = "sync")]
    Sync { timestamp: String, clock: u64 },
    #[serde(rename = "who_coordinator")]
    WhoCoordinator { timestamp: String, clock: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionAckData {
    pub status: String,
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockData {
    pub now: f64,
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncData {
    #[serde(flatten)]
    pub snapshot: StateSnapshot,
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoCoordinatorData {
    pub coordinator: Option<String>,
    pub name: String,
    pub rank: u32,
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "service", content = "data")]
pub enum PeerResponse {
    #[serde(rename = "election")]
    Election(ElectionAckData),
    #[serde(rename = "clock")]
    Clock(ClockData),
    #[serde(rename = "sync")]
    Sync(SyncData),
    #[serde(rename = "who_coordinator")]
    WhoCoordinator(WhoCoordinatorData),
}

// ---------------------------------------------------------------------
// Reference client.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "service", content = "data")]
pub enum ReferenceRequest {
    #[serde(rename = "rank")]
    Rank {
        user: String,
        timestamp: String,
        clock: u64,
    },
    #[serde(rename = "list")]
    List { timestamp: String, clock: u64 },
    #[serde(rename = "heartbeat")]
    Heartbeat {
        user: String,
        timestamp: String,
        clock: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankData {
    pub rank: u32,
    pub timestamp: String,
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListData {
    pub list: Vec<Peer>,
    pub timestamp: String,
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatData {
    pub timestamp: String,
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "service", content = "data")]
pub enum ReferenceResponse {
    #[serde(rename = "rank")]
    Rank(RankData),
    #[serde(rename = "list")]
    List(ListData),
    #[serde(rename = "heartbeat")]
    Heartbeat(HeartbeatData),
}

// ---------------------------------------------------------------------
// `servers` topic frames: coordinator announcements and replication
// events.
// ---------------------------------------------------------------------

pub const SERVERS_TOPIC: &str = "servers";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", content = "operation_data")]
pub enum ReplicationOperation {
    #[serde(rename = "login")]
    Login { user: String, timestamp: String },
    #[serde(rename = "channel")]
    Channel { channel: String, timestamp: String },
    #[serde(rename = "publish")]
    Publish {
        channel: String,
        user: String,
        message: String,
        timestamp: String,
    },
    #[serde(rename = "message")]
    Message {
        src: String,
        dst: String,
        message: String,
        timestamp: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationEvent {
    pub server: String,
    #[serde(flatten)]
    pub operation: ReplicationOperation,
    pub timestamp: String,
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "service")]
pub enum ServersTopicFrame {
    #[serde(rename = "election")]
    Election {
        coordinator: String,
        timestamp: String,
        clock: u64,
    },
    #[serde(rename = "replication")]
    Replication(ReplicationEvent),
}

/// Pub/sub payload for a channel publication fan-out (topic = channel
/// name). Omits the channel itself, since the topic already carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationFanout {
    pub user: Option<String>,
    pub message: String,
    pub timestamp: String,
    pub clock: u64,
}

/// Pub/sub payload for a private message fan-out (topic = recipient's user
/// name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageFanout {
    pub from: Option<String>,
    pub message: String,
    pub timestamp: String,
    pub clock: u64,
}

/// Reconstructs a [`LoginRecord`] list into the durable-store payload shape;
/// kept here (rather than in `model`) since it is purely a wire/storage
/// concern.
pub fn logins_payload(logins: &[LoginRecord]) -> Vec<LoginRecord> {
    logins.to_vec()
}

/// Same for publications, exposed for the `sync` handler.
pub fn publications_payload(items: &[ChannelPublication]) -> Vec<ChannelPublication> {
    items.to_vec()
}

/// Same for private messages.
pub fn messages_payload(items: &[PrivateMessage]) -> Vec<PrivateMessage> {
    items.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_arbitrary_bytes() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello world").unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let out = read_frame(&mut cursor).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn client_request_round_trips_through_msgpack() {
        let req = ClientRequest::Login {
            user: "alice".into(),
            timestamp: "2026-08-01T00:00:00Z".into(),
            clock: 7,
        };
        let mut buf = Vec::new();
        send(&mut buf, &req).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let decoded: ClientRequest = recv(&mut cursor).unwrap();
        match decoded {
            ClientRequest::Login { user, clock, .. } => {
                assert_eq!(user, "alice");
                assert_eq!(clock, 7);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn oversized_frame_is_rejected_before_allocating() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(MAX_FRAME_BYTES + 1).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(matches!(err, CoreError::Protocol(_)));
    }

    #[test]
    fn replication_event_round_trips() {
        let event = ReplicationEvent {
            server: "a".into(),
            operation: ReplicationOperation::Message {
                src: "a".into(),
                dst: "b".into(),
                message: "hi".into(),
                timestamp: "t".into(),
            },
            timestamp: "t".into(),
            clock: 3,
        };
        let frame = ServersTopicFrame::Replication(event);
        let mut buf = Vec::new();
        send(&mut buf, &frame).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let decoded: ServersTopicFrame = recv(&mut cursor).unwrap();
        match decoded {
            ServersTopicFrame::Replication(ev) => assert_eq!(ev.server, "a"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
