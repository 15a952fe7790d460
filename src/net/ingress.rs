//! Request Ingress: the broker-facing loop that decodes one client request
//! at a time, dispatches it to the State Machine, carries out any
//! resulting effects, and triggers a clock-sync round on every 10th
//! request — all without blocking the reply path.
//!
//! The replica dials out to the broker's single request/reply socket and
//! loops on that connection; the broker is the thing that binds and
//! routes, not each replica.

use crate::effect::Effect;
use crate::error::{CoreError, Result};
use crate::net::pubsub::{self, Publisher};
use crate::net::reference::ReferenceClient;
use crate::replica::Replica;
use crate::state_machine;
use crate::wire::{self, ClientRequest, ClientResponse, ErrorData};
use chrono::Utc;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

const CLOCK_SYNC_BOUNDARY: u64 = 10;

pub struct Ingress {
    replica: Arc<Replica>,
    publisher: Publisher,
    reference: ReferenceClient,
}

impl Ingress {
    pub fn new(replica: Arc<Replica>) -> Self {
        let publisher = Publisher::new(replica.config.proxy_address.clone());
        let reference = ReferenceClient::new(replica.config.reference_address.clone());
        Ingress {
            replica,
            publisher,
            reference,
        }
    }

    /// Connects to the broker's request/reply socket and loops, dequeuing
    /// one request at a time, forever. Reconnects with a short backoff if
    /// the broker connection drops.
    pub fn serve(&self, address: &str) -> Result<()> {
        let mut ingress_count: u64 = 0;
        loop {
            match self.run_connection(address, &mut ingress_count) {
                Ok(()) => {}
                Err(e) => log::warn!("broker connection lost: {e}"),
            }
            std::thread::sleep(Duration::from_secs(1));
        }
    }

    fn run_connection(&self, address: &str, ingress_count: &mut u64) -> Result<()> {
        let mut stream = TcpStream::connect(address)
            .map_err(|e| CoreError::Internal(format!("connecting to broker {address}: {e}")))?;
        loop {
            self.handle_request(&mut stream)?;
            *ingress_count += 1;
            if *ingress_count % CLOCK_SYNC_BOUNDARY == 0 {
                let replica = Arc::clone(&self.replica);
                let reference = self.reference.clone();
                std::thread::spawn(move || {
                    crate::clocksync::run_on_boundary(&replica, &reference);
                });
            }
        }
    }

    fn handle_request(&self, stream: &mut TcpStream) -> Result<()> {
        let request: Result<ClientRequest> = wire::recv(stream);
        let response = match request {
            Ok(req) => self.dispatch(req),
            Err(e) => {
                log::warn!("undecodable client request: {e}");
                ClientResponse::Error(ErrorData {
                    status: wire::status::ERROR.to_string(),
                    timestamp: Utc::now().to_rfc3339(),
                    description: "undecodable request".to_string(),
                    clock: self.replica.logical_clock.peek(),
                })
            }
        };
        wire::send(stream, &response)
    }

    fn dispatch(&self, request: ClientRequest) -> ClientResponse {
        let (response, effects) = match request {
            ClientRequest::Login {
                user,
                timestamp,
                clock,
            } => state_machine::handle_login(&self.replica, user, timestamp, clock),
            ClientRequest::Users { clock } => {
                (state_machine::handle_users(&self.replica, clock), Vec::new())
            }
            ClientRequest::Channel {
                channel,
                timestamp,
                clock,
            } => state_machine::handle_channel(&self.replica, channel, timestamp, clock),
            ClientRequest::Channels { clock } => (
                state_machine::handle_channels(&self.replica, clock),
                Vec::new(),
            ),
            ClientRequest::Publish {
                user,
                channel,
                message,
                timestamp,
                clock,
            } => state_machine::handle_publish(&self.replica, user, channel, message, timestamp, clock),
            ClientRequest::Message {
                src,
                dst,
                message,
                timestamp,
                clock,
            } => state_machine::handle_message(&self.replica, src, dst, message, timestamp, clock),
        };

        if !effects.is_empty() {
            self.replica.persist_all();
        }
        for effect in effects {
            self.carry_out(effect);
        }
        response
    }

    fn carry_out(&self, effect: Effect) {
        match effect {
            Effect::Fanout { topic, payload } => pubsub::publish_fanout(&self.publisher, &topic, payload),
            Effect::Replicate {
                operation,
                timestamp,
                clock,
            } => pubsub::publish_replication_event(
                &self.publisher,
                operation,
                self.replica.name().to_string(),
                timestamp,
                clock,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::DurableStore;
    use tempfile::tempdir;

    fn test_replica() -> Arc<Replica> {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        let config = Config {
            server_name: "r1".into(),
            broker_address: "tcp://broker:5556".into(),
            proxy_address: "127.0.0.1:0".into(),
            proxy_sub_address: "tcp://proxy:5558".into(),
            reference_address: "tcp://reference:5559".into(),
            peer_port: 5561,
            data_dir: dir.path().to_path_buf(),
        };
        std::mem::forget(dir);
        Arc::new(Replica::new(config, store))
    }

    #[test]
    fn dispatch_login_then_users_reflects_the_new_user() {
        let replica = test_replica();
        let ingress = Ingress::new(Arc::clone(&replica));
        let resp = ingress.dispatch(ClientRequest::Login {
            user: "alice".into(),
            timestamp: "t0".into(),
            clock: 0,
        });
        assert!(matches!(resp, ClientResponse::Login(d) if d.status == wire::status::SUCCESS));

        let resp = ingress.dispatch(ClientRequest::Users { clock: 1 });
        match resp {
            ClientResponse::Users(d) => assert_eq!(d.users, vec!["alice".to_string()]),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
