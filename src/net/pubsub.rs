//! Pub/sub fan-out: a lazily-reconnecting publisher used for both
//! application fan-out (`publish`/`message`) and `servers`-topic control
//! frames, plus the `servers`-topic subscriber loop that feeds the
//! Replication Engine and the Election Engine's announcement wait.
//!
//! Wire shape: two length-delimited frames per message — a raw UTF-8 topic,
//! then a MessagePack payload. Subscribing is a single frame naming the
//! topic of interest, sent once right after connecting; every replica
//! subscribes only to `"servers"`.

use crate::effect::FanoutPayload;
use crate::election::Announcer;
use crate::error::{CoreError, Result};
use crate::replica::Replica;
use crate::wire::{self, ServersTopicFrame, SERVERS_TOPIC};
use parking_lot::Mutex;
use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;

pub struct Publisher {
    address: String,
    stream: Mutex<Option<TcpStream>>,
}

impl Publisher {
    pub fn new(address: impl Into<String>) -> Self {
        Publisher {
            address: address.into(),
            stream: Mutex::new(None),
        }
    }

    fn with_connection<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut TcpStream) -> Result<()>,
    {
        let mut slot = self.stream.lock();
        if slot.is_none() {
            let stream = TcpStream::connect(&self.address)
                .map_err(|e| CoreError::Unavailable(format!("proxy at {}: {e}", self.address)))?;
            *slot = Some(stream);
        }
        let result = f(slot.as_mut().expect("just populated"));
        if result.is_err() {
            // Drop the broken connection so the next publish reconnects.
            *slot = None;
        }
        result
    }

    pub fn publish_raw(&self, topic: &str, payload_bytes: &[u8]) -> Result<()> {
        self.with_connection(|stream| {
            wire::write_frame(stream, topic.as_bytes())?;
            wire::write_frame(stream, payload_bytes)?;
            stream.flush().map_err(CoreError::from)
        })
    }

    pub fn publish<T: serde::Serialize>(&self, topic: &str, payload: &T) -> Result<()> {
        let bytes = rmp_serde::to_vec_named(payload)?;
        self.publish_raw(topic, &bytes)
    }
}

/// Publishes the outcome of a state-machine effect: channel publications
/// and private messages each go out on their own topic, independent of the
/// `servers` control topic below.
pub fn publish_fanout(publisher: &Publisher, topic: &str, payload: FanoutPayload) {
    let result = match payload {
        FanoutPayload::Publication(p) => publisher.publish(topic, &p),
        FanoutPayload::Message(m) => publisher.publish(topic, &m),
    };
    if let Err(e) = result {
        log::warn!("fan-out publish on topic {topic} failed: {e}");
    }
}

/// [`Announcer`] implementation backed by a [`Publisher`] to the `servers`
/// topic, used by the Election Engine to announce a new coordinator.
pub struct PubSubAnnouncer {
    publisher: Publisher,
}

impl PubSubAnnouncer {
    pub fn new(proxy_address: impl Into<String>) -> Self {
        PubSubAnnouncer {
            publisher: Publisher::new(proxy_address),
        }
    }
}

impl Announcer for PubSubAnnouncer {
    fn announce_coordinator(&self, frame: ServersTopicFrame) {
        if let Err(e) = self.publisher.publish(SERVERS_TOPIC, &frame) {
            log::warn!("coordinator announcement failed: {e}");
        }
    }
}

/// Publishes a replication event on the `servers` topic.
pub fn publish_replication_event(
    publisher: &Publisher,
    operation: crate::wire::ReplicationOperation,
    server: String,
    timestamp: String,
    clock: u64,
) {
    let frame = ServersTopicFrame::Replication(crate::wire::ReplicationEvent {
        server,
        operation,
        timestamp,
        clock,
    });
    if let Err(e) = publisher.publish(SERVERS_TOPIC, &frame) {
        log::warn!("replication publish failed: {e}");
    }
}

/// Subscribes to `"servers"` and applies every inbound frame forever (spec
/// §4.9 inbound, §5 task 4). Reconnects with a short backoff if the proxy
/// connection drops.
pub fn subscribe_servers_loop(replica: Arc<Replica>, sub_address: &str) {
    loop {
        match run_subscriber_once(&replica, sub_address) {
            Ok(()) => {}
            Err(e) => log::warn!("servers subscriber disconnected: {e}"),
        }
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
}

fn run_subscriber_once(replica: &Replica, sub_address: &str) -> Result<()> {
    let mut stream = TcpStream::connect(sub_address)
        .map_err(|e| CoreError::Unavailable(format!("proxy sub at {sub_address}: {e}")))?;
    wire::write_frame(&mut stream, SERVERS_TOPIC.as_bytes())?;
    loop {
        let _topic = wire::read_frame(&mut stream)?;
        let payload = wire::read_frame(&mut stream)?;
        let frame: ServersTopicFrame = match rmp_serde::from_slice(&payload) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("malformed servers-topic frame: {e}");
                continue;
            }
        };
        crate::replication::apply_frame(replica, frame);
    }
}
