//! Reference Client: registration, heartbeat, and roster listing against
//! the external reference service. Only the client side is in scope — the
//! reference process itself is an external collaborator this crate does
//! not implement.

use crate::error::{CoreError, Result};
use crate::model::Peer;
use crate::replica::Replica;
use crate::wire::{self, ReferenceRequest, ReferenceResponse};
use chrono::Utc;
use std::net::TcpStream;
use std::time::Duration;

/// Connects fresh for every call. No read timeout is set here, unlike peer
/// RPC — the reference service is assumed highly available, so a call is
/// allowed to block rather than failing over.
#[derive(Clone)]
pub struct ReferenceClient {
    address: String,
}

impl ReferenceClient {
    pub fn new(address: impl Into<String>) -> Self {
        ReferenceClient {
            address: address.into(),
        }
    }

    fn connect(&self) -> Result<TcpStream> {
        TcpStream::connect(&self.address).map_err(|e| {
            CoreError::Unavailable(format!("reference at {}: {e}", self.address))
        })
    }

    /// One-shot rank acquisition at startup. A failure here is the caller's
    /// responsibility to log and treat as partial mode.
    pub fn rank(&self, replica: &Replica) -> Result<u32> {
        let clock = replica.logical_clock.tick();
        let mut stream = self.connect()?;
        wire::send(
            &mut stream,
            &ReferenceRequest::Rank {
                user: replica.name().to_string(),
                timestamp: Utc::now().to_rfc3339(),
                clock,
            },
        )?;
        match wire::recv::<_, ReferenceResponse>(&mut stream)? {
            ReferenceResponse::Rank(data) => {
                replica.logical_clock.observe(data.clock);
                Ok(data.rank)
            }
            other => Err(CoreError::Protocol(format!(
                "unexpected reference reply to rank: {other:?}"
            ))),
        }
    }

    /// Periodic liveness signal, sent every 5 seconds.
    pub fn heartbeat(&self, replica: &Replica) -> Result<()> {
        let clock = replica.logical_clock.tick();
        let mut stream = self.connect()?;
        wire::send(
            &mut stream,
            &ReferenceRequest::Heartbeat {
                user: replica.name().to_string(),
                timestamp: Utc::now().to_rfc3339(),
                clock,
            },
        )?;
        match wire::recv::<_, ReferenceResponse>(&mut stream)? {
            ReferenceResponse::Heartbeat(data) => {
                replica.logical_clock.observe(data.clock);
                Ok(())
            }
            other => Err(CoreError::Protocol(format!(
                "unexpected reference reply to heartbeat: {other:?}"
            ))),
        }
    }

    /// Fetches the current ranked roster.
    pub fn list(&self, replica: &Replica) -> Result<Vec<Peer>> {
        let clock = replica.logical_clock.tick();
        let mut stream = self.connect()?;
        wire::send(&mut stream, &ReferenceRequest::List {
            timestamp: Utc::now().to_rfc3339(),
            clock,
        })?;
        match wire::recv::<_, ReferenceResponse>(&mut stream)? {
            ReferenceResponse::List(data) => {
                replica.logical_clock.observe(data.clock);
                *replica.servers_list.lock() = data.list.clone();
                Ok(data.list)
            }
            other => Err(CoreError::Protocol(format!(
                "unexpected reference reply to list: {other:?}"
            ))),
        }
    }
}

/// Runs the heartbeat loop forever, on its own thread.
pub fn heartbeat_loop(replica: std::sync::Arc<Replica>, client: ReferenceClient) {
    loop {
        std::thread::sleep(Duration::from_secs(5));
        if let Err(e) = client.heartbeat(&replica) {
            log::warn!("heartbeat to reference failed: {e}");
        }
    }
}
