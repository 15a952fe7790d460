//! Binary entry point: wires configuration, the durable store, and every
//! background loop a replica runs.

use meridian::config::Config;
use meridian::election;
use meridian::net::ingress::Ingress;
use meridian::net::reference::{self, ReferenceClient};
use meridian::net::{peer, pubsub};
use meridian::replica::{Replica, NO_RANK};
use meridian::store::DurableStore;
use std::sync::Arc;
use std::time::Duration;

fn main() {
    env_logger::init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            log::error!("startup configuration error: {e}");
            std::process::exit(1);
        }
    };

    let store = match DurableStore::open(&config.data_dir) {
        Ok(s) => s,
        Err(e) => {
            log::error!("could not open data directory {}: {e}", config.data_dir.display());
            std::process::exit(1);
        }
    };

    log::info!("starting replica '{}'", config.server_name);
    let peer_port = config.peer_port;
    let replica = Arc::new(Replica::new(config, store));

    // One-shot rank acquisition. A failure leaves the replica in partial
    // mode: it still serves ingress and replication, but never calls for
    // or answers an election.
    let reference = ReferenceClient::new(&replica.config.reference_address);
    match reference.rank(&replica) {
        Ok(rank) => {
            *replica.rank.lock() = rank;
            log::info!("registered with reference, rank {rank}");
        }
        Err(e) => {
            log::warn!("could not register with reference: {e}, running without rank");
            *replica.rank.lock() = NO_RANK;
        }
    }

    // Peer RPC server.
    {
        let replica = Arc::clone(&replica);
        std::thread::spawn(move || {
            if let Err(e) = peer::serve(replica, peer_port) {
                log::error!("peer RPC server exited: {e}");
            }
        });
    }

    // `servers` topic subscriber: feeds replication and coordinator
    // announcements.
    {
        let replica = Arc::clone(&replica);
        let sub_address = replica.config.proxy_sub_address.clone();
        std::thread::spawn(move || {
            pubsub::subscribe_servers_loop(replica, &sub_address);
        });
    }

    // Reference heartbeat, every 5 seconds.
    {
        let replica = Arc::clone(&replica);
        let client = ReferenceClient::new(replica.config.reference_address.clone());
        std::thread::spawn(move || {
            reference::heartbeat_loop(replica, client);
        });
    }

    // Full-sync join: wait for the subscriber to attach, then try every
    // known peer until one answers or the roster is exhausted.
    {
        let replica = Arc::clone(&replica);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(5));
            join_via_full_sync(&replica);
        });
    }

    // Initial election after a settling delay so the peer RPC server and
    // subscriber are up before anyone calls for or answers an election.
    {
        let replica = Arc::clone(&replica);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(2));
            if let Err(e) = election::run(&replica) {
                log::warn!("startup election failed: {e}");
            }
        });
    }

    let broker_address = replica.config.broker_address.clone();
    let ingress = Ingress::new(replica);
    if let Err(e) = ingress.serve(&broker_address) {
        log::error!("request ingress exited: {e}");
        std::process::exit(1);
    }
}

/// Issues `sync` to each known peer until one answers. If no peer answers,
/// the replica proceeds empty — it is the first.
fn join_via_full_sync(replica: &Replica) {
    let reference = ReferenceClient::new(&replica.config.reference_address);
    let roster = match reference.list(replica) {
        Ok(r) => r,
        Err(e) => {
            log::warn!("full-sync join: could not fetch roster: {e}");
            return;
        }
    };

    for p in roster.iter().filter(|p| p.name != replica.name()) {
        let clock = replica.logical_clock.tick();
        match peer::request_sync(&p.name, replica.config.peer_port, clock) {
            Ok(data) => {
                replica.logical_clock.observe(data.clock);
                meridian::replication::merge_snapshot(replica, data.snapshot);
                log::info!("full-sync completed against peer '{}'", p.name);
                return;
            }
            Err(_) => continue,
        }
    }
    log::info!("no peer answered full-sync; starting empty");
}
