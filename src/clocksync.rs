//! Clock Sync Engine — Berkeley algorithm. The averaging step runs only on
//! the coordinator; followers independently pull rather than receiving a
//! push-back adjustment — a coordinator-initiated push was never finished
//! upstream, so this follows the pull-only half that actually ships.

use crate::net::peer;
use crate::net::reference::ReferenceClient;
use crate::replica::Replica;

/// Coordinator procedure: average this replica's time with every reachable
/// peer's, then set the local offset to read that mean.
pub fn run_as_coordinator(replica: &Replica, reference: &ReferenceClient) -> crate::error::Result<()> {
    let roster = reference.list(replica)?;
    let t_self = crate::clock::PhysicalClock::wall();
    let mut samples = vec![t_self];

    for p in roster.iter().filter(|p| p.name != replica.name()) {
        let clock = replica.logical_clock.tick();
        match peer::request_clock(&p.name, replica.config.peer_port, clock) {
            Ok(data) => {
                replica.logical_clock.observe(data.clock);
                samples.push(data.now);
            }
            Err(_) => continue, // that peer did not respond, excluded from the mean
        }
    }

    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    replica
        .physical_clock
        .set_offset(mean - crate::clock::PhysicalClock::wall());
    Ok(())
}

/// Follower procedure: RTT-compensated pull from the believed coordinator.
/// A timeout here means the coordinator is presumed failed and triggers an
/// election.
pub fn run_as_follower(replica: &Replica, coordinator_name: &str) -> crate::error::Result<()> {
    let t1 = crate::clock::PhysicalClock::wall();
    let clock = replica.logical_clock.tick();
    let reply = peer::request_clock(coordinator_name, replica.config.peer_port, clock);
    let t2 = crate::clock::PhysicalClock::wall();

    match reply {
        Ok(data) => {
            replica.logical_clock.observe(data.clock);
            let rtt = t2 - t1;
            let adjusted = data.now + rtt / 2.0;
            replica
                .physical_clock
                .set_offset(adjusted - crate::clock::PhysicalClock::wall());
            Ok(())
        }
        Err(e) => {
            log::warn!("clock pull from coordinator {coordinator_name} failed: {e}, starting election");
            crate::election::run(replica)
        }
    }
}

/// Dispatches to the coordinator or follower procedure depending on this
/// replica's current belief. Called on every 10th ingress message.
pub fn run_on_boundary(replica: &Replica, reference: &ReferenceClient) {
    let coordinator = replica.coordinator.lock().clone();
    let result = match coordinator {
        Some(name) if name == replica.name() => run_as_coordinator(replica, reference),
        Some(name) => run_as_follower(replica, &name),
        None => Ok(()),
    };
    if let Err(e) = result {
        log::warn!("clock sync round failed: {e}");
    }
}
