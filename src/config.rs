//! Environment-driven configuration.

use crate::error::{CoreError, Result};
use std::env;

/// Addresses and identity a replica needs before it can start any of its
/// background loops.
#[derive(Debug, Clone)]
pub struct Config {
    /// This replica's stable, human-readable name.
    pub server_name: String,
    /// Request/reply address of the client-facing broker.
    pub broker_address: String,
    /// Address of the pub/sub proxy's publish-facing socket.
    pub proxy_address: String,
    /// Address of the pub/sub proxy's subscribe-facing socket.
    pub proxy_sub_address: String,
    /// Request/reply address of the reference (coordination) service.
    pub reference_address: String,
    /// TCP port this replica's peer RPC server listens on.
    pub peer_port: u16,
    /// Directory the durable store reads and writes its five JSON slots in.
    pub data_dir: std::path::PathBuf,
}

const DEFAULT_PEER_PORT: u16 = 5561;
const DEFAULT_DATA_DIR: &str = "./data";

impl Config {
    /// Reads `SERVER_NAME`, `BROKER_ADDRESS`, `PROXY_ADDRESS`,
    /// `PROXY_SUB_ADDRESS`, `REFERENCE_ADDRESS` plus the optional
    /// `PEER_PORT` and `DATA_DIR` extensions.
    pub fn from_env() -> Result<Self> {
        let server_name = env::var("SERVER_NAME")
            .map_err(|_| CoreError::InvalidRequest("SERVER_NAME is not set".into()))?;
        if server_name.trim().is_empty() {
            return Err(CoreError::InvalidRequest("SERVER_NAME is empty".into()));
        }

        let broker_address = env::var("BROKER_ADDRESS")
            .map_err(|_| CoreError::InvalidRequest("BROKER_ADDRESS is not set".into()))?;
        let proxy_address = env::var("PROXY_ADDRESS")
            .map_err(|_| CoreError::InvalidRequest("PROXY_ADDRESS is not set".into()))?;
        let proxy_sub_address = env::var("PROXY_SUB_ADDRESS")
            .map_err(|_| CoreError::InvalidRequest("PROXY_SUB_ADDRESS is not set".into()))?;
        let reference_address = env::var("REFERENCE_ADDRESS")
            .map_err(|_| CoreError::InvalidRequest("REFERENCE_ADDRESS is not set".into()))?;

        let peer_port = match env::var("PEER_PORT") {
            Ok(v) => v
                .parse()
                .map_err(|_| CoreError::InvalidRequest(format!("PEER_PORT is not a u16: {v}")))?,
            Err(_) => DEFAULT_PEER_PORT,
        };

        let data_dir = env::var("DATA_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| std::path::PathBuf::from(DEFAULT_DATA_DIR));

        Ok(Config {
            server_name,
            broker_address,
            proxy_address,
            proxy_sub_address,
            reference_address,
            peer_port,
            data_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "SERVER_NAME",
            "BROKER_ADDRESS",
            "PROXY_ADDRESS",
            "PROXY_SUB_ADDRESS",
            "REFERENCE_ADDRESS",
            "PEER_PORT",
            "DATA_DIR",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn missing_server_name_is_invalid_request() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[test]
    fn defaults_apply_when_optional_vars_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("SERVER_NAME", "replica-a");
        env::set_var("BROKER_ADDRESS", "tcp://broker:5556");
        env::set_var("PROXY_ADDRESS", "tcp://proxy:5557");
        env::set_var("PROXY_SUB_ADDRESS", "tcp://proxy:5558");
        env::set_var("REFERENCE_ADDRESS", "tcp://reference:5559");

        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.peer_port, DEFAULT_PEER_PORT);
        assert_eq!(cfg.data_dir, std::path::PathBuf::from(DEFAULT_DATA_DIR));
        clear_env();
    }
}
