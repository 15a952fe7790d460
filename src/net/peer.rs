//! Peer RPC: the server side accepting `election`/`clock`/`sync`/
//! `who_coordinator`, and the client-side request helpers used by the
//! Election Engine and the Clock Sync Engine, each bounded by a 2-second
//! connect-and-reply budget so a dead peer never stalls an election or
//! clock-sync round.

use crate::election;
use crate::error::{CoreError, Result};
use crate::replica::Replica;
use crate::wire::{self, PeerRequest, PeerResponse};
use chrono::Utc;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

const PEER_RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs the peer RPC accept loop forever. Each connection is a single
/// request/reply pair, handled on its own thread.
pub fn serve(replica: Arc<Replica>, port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .map_err(|e| CoreError::Internal(format!("binding peer RPC port {port}: {e}")))?;
    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(s) => s,
            Err(e) => {
                log::warn!("peer RPC accept failed: {e}");
                continue;
            }
        };
        let replica = Arc::clone(&replica);
        std::thread::spawn(move || {
            if let Err(e) = handle_connection(replica, stream) {
                log::warn!("peer RPC connection error: {e}");
            }
        });
    }
    Ok(())
}

fn handle_connection(replica: Arc<Replica>, mut stream: TcpStream) -> Result<()> {
    let request: PeerRequest = wire::recv(&mut stream)?;
    let is_election = matches!(request, PeerRequest::Election { .. });
    let response = dispatch(&replica, request);
    wire::send(&mut stream, &response)?;
    if is_election {
        // A replica that receives `election` starts its own election round,
        // after the OK reply is on the wire.
        spawn_election_on_receipt(replica);
    }
    Ok(())
}

fn dispatch(replica: &Replica, request: PeerRequest) -> PeerResponse {
    match request {
        PeerRequest::Election { clock, .. } => {
            let clock = replica.logical_clock.observe(clock);
            PeerResponse::Election(wire::ElectionAckData {
                status: wire::status::OK.to_string(),
                clock,
            })
        }
        PeerRequest::Clock { clock, .. } => {
            let clock = replica.logical_clock.observe(clock);
            PeerResponse::Clock(wire::ClockData {
                now: replica.physical_clock.now(),
                clock,
            })
        }
        PeerRequest::Sync { clock, .. } => {
            let clock = replica.logical_clock.observe(clock);
            PeerResponse::Sync(wire::SyncData {
                snapshot: replica.snapshot(),
                clock,
            })
        }
        PeerRequest::WhoCoordinator { clock, .. } => {
            let clock = replica.logical_clock.observe(clock);
            PeerResponse::WhoCoordinator(wire::WhoCoordinatorData {
                coordinator: replica.coordinator.lock().clone(),
                name: replica.name().to_string(),
                rank: *replica.rank.lock(),
                clock,
            })
        }
    }
}

fn connect_with_timeout(address: &str) -> Result<TcpStream> {
    let timeout = || CoreError::Timeout {
        peer: address.to_string(),
        millis: PEER_RPC_TIMEOUT.as_millis() as u64,
    };
    let addr = address
        .to_socket_addrs()
        .map_err(|_| timeout())?
        .next()
        .ok_or_else(timeout)?;
    let stream = TcpStream::connect_timeout(&addr, PEER_RPC_TIMEOUT).map_err(|_| timeout())?;
    let _ = stream.set_read_timeout(Some(PEER_RPC_TIMEOUT));
    let _ = stream.set_write_timeout(Some(PEER_RPC_TIMEOUT));
    Ok(stream)
}

fn peer_address(peer_name: &str, port: u16) -> String {
    format!("{peer_name}:{port}")
}

pub fn request_election(peer_name: &str, port: u16, clock: u64) -> Result<wire::ElectionAckData> {
    let address = peer_address(peer_name, port);
    let mut stream = connect_with_timeout(&address)?;
    wire::send(
        &mut stream,
        &PeerRequest::Election {
            timestamp: Utc::now().to_rfc3339(),
            clock,
        },
    )?;
    match wire::recv::<_, PeerResponse>(&mut stream)? {
        PeerResponse::Election(data) => Ok(data),
        other => Err(CoreError::Protocol(format!("unexpected reply: {other:?}"))),
    }
}

pub fn request_clock(peer_name: &str, port: u16, clock: u64) -> Result<wire::ClockData> {
    let address = peer_address(peer_name, port);
    let mut stream = connect_with_timeout(&address)?;
    wire::send(
        &mut stream,
        &PeerRequest::Clock {
            timestamp: Utc::now().to_rfc3339(),
            clock,
        },
    )?;
    match wire::recv::<_, PeerResponse>(&mut stream)? {
        PeerResponse::Clock(data) => Ok(data),
        other => Err(CoreError::Protocol(format!("unexpected reply: {other:?}"))),
    }
}

pub fn request_sync(peer_name: &str, port: u16, clock: u64) -> Result<wire::SyncData> {
    let address = peer_address(peer_name, port);
    let mut stream = connect_with_timeout(&address)?;
    wire::send(
        &mut stream,
        &PeerRequest::Sync {
            timestamp: Utc::now().to_rfc3339(),
            clock,
        },
    )?;
    match wire::recv::<_, PeerResponse>(&mut stream)? {
        PeerResponse::Sync(data) => Ok(data),
        other => Err(CoreError::Protocol(format!("unexpected reply: {other:?}"))),
    }
}

pub fn request_who_coordinator(
    peer_name: &str,
    port: u16,
    clock: u64,
) -> Result<wire::WhoCoordinatorData> {
    let address = peer_address(peer_name, port);
    let mut stream = connect_with_timeout(&address)?;
    wire::send(
        &mut stream,
        &PeerRequest::WhoCoordinator {
            timestamp: Utc::now().to_rfc3339(),
            clock,
        },
    )?;
    match wire::recv::<_, PeerResponse>(&mut stream)? {
        PeerResponse::WhoCoordinator(data) => Ok(data),
        other => Err(CoreError::Protocol(format!("unexpected reply: {other:?}"))),
    }
}

fn spawn_election_on_receipt(replica: Arc<Replica>) {
    std::thread::spawn(move || {
        if let Err(e) = election::run(&replica) {
            log::warn!("election triggered by incoming request failed: {e}");
        }
    });
}
