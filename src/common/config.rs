//! Configuration for ringkv nodes

use crate::common::hash::{ring_space, MAX_HASH_BITS};
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment prefix, e.g. `RINGKV__HASH_BITS=8`
pub const ENV_PREFIX: &str = "RINGKV";

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ring space is `2^hash_bits`
    pub hash_bits: u32,

    /// Node name = prefix + bootstrap id
    pub name_prefix: String,

    /// Node port = base port + bootstrap id
    pub base_port: u16,

    /// Listen host for the peer RPC server
    pub bind_host: String,

    /// Bootstrap address list
    pub address_file: PathBuf,

    /// Base directory for BATCH input and output files
    pub resource_dir: PathBuf,

    /// Liveness probe period
    pub heartbeat_interval_ms: u64,

    /// Settle delay before repairing the ring
    pub recovery_delay_ms: u64,

    /// Poll period while waiting on peers' recovery flags
    pub join_poll_interval_ms: u64,

    /// Transport timeout budget for one peer call
    pub rpc_timeout_ms: u64,

    /// How the replication invariant is restored after a failure
    pub repair_strategy: RepairStrategy,

    /// Bound on the iterative reconcile strategy
    pub max_reconcile_passes: usize,

    /// Logging level
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairStrategy {
    /// Leader collects and redistributes every key
    Rebalance,
    /// Each repairing node re-pushes its own keys until nothing changes
    Reconcile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hash_bits: 7,
            name_prefix: "vm-".to_string(),
            base_port: 10000,
            bind_host: "0.0.0.0".to_string(),
            address_file: PathBuf::from("res/address.txt"),
            resource_dir: PathBuf::from("res"),
            heartbeat_interval_ms: 500,
            recovery_delay_ms: 1000,
            join_poll_interval_ms: 1000,
            rpc_timeout_ms: 2000,
            repair_strategy: RepairStrategy::Rebalance,
            max_reconcile_passes: 5,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then `RINGKV__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("ringkv").required(false)),
        };
        let loaded: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Short timings for in-process clusters.
    pub fn test_config() -> Self {
        Self {
            heartbeat_interval_ms: 50,
            recovery_delay_ms: 100,
            join_poll_interval_ms: 50,
            rpc_timeout_ms: 500,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hash_bits == 0 || self.hash_bits > MAX_HASH_BITS {
            return Err(Error::InvalidConfig(format!(
                "hash_bits must be in 1..={}, got {}",
                MAX_HASH_BITS, self.hash_bits
            )));
        }
        if self.name_prefix.is_empty() {
            return Err(Error::InvalidConfig("name_prefix cannot be empty".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat_interval_ms must be positive".into(),
            ));
        }
        if self.join_poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "join_poll_interval_ms must be positive".into(),
            ));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(Error::InvalidConfig("rpc_timeout_ms must be positive".into()));
        }
        if self.max_reconcile_passes == 0 {
            return Err(Error::InvalidConfig(
                "max_reconcile_passes must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn space(&self) -> u64 {
        ring_space(self.hash_bits)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }

    pub fn join_poll_interval(&self) -> Duration {
        Duration::from_millis(self.join_poll_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Longest successor walk that can still be a valid ring.
    pub fn max_ring_hops(&self) -> usize {
        self.space() as usize + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.hash_bits, 7);
        assert_eq!(config.space(), 128);
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(500));
        assert_eq!(config.repair_strategy, RepairStrategy::Rebalance);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_hash_bits() {
        let config = Config {
            hash_bits: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            hash_bits: 40,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let config = Config {
            heartbeat_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "hash_bits = 9\nname_prefix = \"node-\"\nrepair_strategy = \"reconcile\""
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.hash_bits, 9);
        assert_eq!(config.name_prefix, "node-");
        assert_eq!(config.repair_strategy, RepairStrategy::Reconcile);
        // untouched fields keep their defaults
        assert_eq!(config.base_port, 10000);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "hash_bits = 99").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }
}
