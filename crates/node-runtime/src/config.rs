//! # Node Configuration
//!
//! A TOML configuration file with environment-variable overrides.
//! Every recognized option has a compiled-in default, so an empty file
//! (or none at all) yields a working single-node configuration.
//!
//! Environment variables are the option name upper-cased with a
//! `FERRITE_` prefix (`FERRITE_P2P_PORT`, `FERRITE_ENABLE_MINING`, ...)
//! and take precedence over the file.

use std::path::Path;

use ferrite_chain::ForkChoiceRule;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading failures (process exit code 1).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File unreadable.
    #[error("Cannot read config file {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for the schema.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// An environment override has an unusable value.
    #[error("Bad value for {variable}: {value}")]
    BadOverride { variable: String, value: String },
}

/// Which consensus rule the node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusKind {
    /// Proof of work.
    Pow,
    /// Proof of authority.
    Poa,
    /// Proof of stake.
    Pos,
}

/// Which storage engine backs the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Ordered key-value engine (RocksDB when built with the `rocksdb`
    /// feature, in-memory otherwise).
    Kv,
    /// JSON file store.
    Json,
}

/// All recognized options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Path for the block store.
    pub data_directory: String,
    /// Path for the state store; defaults alongside the block store.
    pub state_directory: String,
    /// Listen port for the P2P transport.
    pub p2p_port: u16,
    /// Start the gossip layer.
    pub enable_p2p: bool,
    /// Start the producer loop.
    pub enable_mining: bool,
    /// Storage engine.
    pub storage_backend: StorageBackend,
    /// Initial PoW difficulty.
    pub mining_difficulty: u64,
    /// Gas allowance per produced block.
    pub block_gas_limit: u64,
    /// Size allowance per produced block, bytes.
    pub block_size_limit: usize,
    /// Mempool capacity.
    pub max_mempool_size: usize,
    /// API listen port.
    pub api_port: u16,
    /// API listen host.
    pub api_host: String,
    /// HTTP Basic user; empty disables authentication.
    pub api_username: String,
    /// HTTP Basic password.
    pub api_password: String,
    /// Initial dial list, `host:port` entries.
    pub bootstrap_nodes: Vec<String>,
    /// Consensus rule.
    pub consensus: ConsensusKind,
    /// PoA authority addresses, in slot order. Empty under PoA means a
    /// single-authority chain run by this node.
    pub authorities: Vec<String>,
    /// Self-stake the node locks when running PoS.
    pub validator_stake: u64,
    /// Fork-choice rule.
    pub fork_choice: ForkChoiceRule,
    /// Network identifier for `net_version`.
    pub network_id: u64,
    /// Secret key hex for the node identity / producer signer; generated
    /// when empty.
    pub node_key: String,
    /// Maintenance tick, seconds.
    pub cleanup_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_directory: "./data".to_string(),
            state_directory: String::new(),
            p2p_port: 30333,
            enable_p2p: true,
            enable_mining: false,
            storage_backend: StorageBackend::Kv,
            mining_difficulty: 1,
            block_gas_limit: 10_000_000,
            block_size_limit: ferrite_types::MAX_BLOCK_BYTES,
            max_mempool_size: 10_000,
            api_port: 8545,
            api_host: "127.0.0.1".to_string(),
            api_username: String::new(),
            api_password: String::new(),
            bootstrap_nodes: vec![],
            consensus: ConsensusKind::Pow,
            authorities: vec![],
            validator_stake: 1_000_000,
            fork_choice: ForkChoiceRule::HeaviestChain,
            network_id: 1337,
            node_key: String::new(),
            cleanup_interval_secs: 30,
        }
    }
}

impl NodeConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| {
                    ConfigError::Unreadable {
                        path: path.display().to_string(),
                        source,
                    }
                })?;
                toml::from_str(&raw).map_err(|e| ConfigError::Invalid(e.to_string()))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply `FERRITE_*` overrides from the given lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(
            variable: &str,
            value: String,
        ) -> Result<T, ConfigError> {
            value.parse().map_err(|_| ConfigError::BadOverride {
                variable: variable.to_string(),
                value,
            })
        }

        if let Some(value) = lookup("FERRITE_DATA_DIRECTORY") {
            self.data_directory = value;
        }
        if let Some(value) = lookup("FERRITE_STATE_DIRECTORY") {
            self.state_directory = value;
        }
        if let Some(value) = lookup("FERRITE_P2P_PORT") {
            self.p2p_port = parse("FERRITE_P2P_PORT", value)?;
        }
        if let Some(value) = lookup("FERRITE_ENABLE_P2P") {
            self.enable_p2p = parse("FERRITE_ENABLE_P2P", value)?;
        }
        if let Some(value) = lookup("FERRITE_ENABLE_MINING") {
            self.enable_mining = parse("FERRITE_ENABLE_MINING", value)?;
        }
        if let Some(value) = lookup("FERRITE_STORAGE_BACKEND") {
            self.storage_backend = match value.as_str() {
                "kv" => StorageBackend::Kv,
                "json" => StorageBackend::Json,
                _ => {
                    return Err(ConfigError::BadOverride {
                        variable: "FERRITE_STORAGE_BACKEND".to_string(),
                        value,
                    })
                }
            };
        }
        if let Some(value) = lookup("FERRITE_MINING_DIFFICULTY") {
            self.mining_difficulty = parse("FERRITE_MINING_DIFFICULTY", value)?;
        }
        if let Some(value) = lookup("FERRITE_BLOCK_GAS_LIMIT") {
            self.block_gas_limit = parse("FERRITE_BLOCK_GAS_LIMIT", value)?;
        }
        if let Some(value) = lookup("FERRITE_BLOCK_SIZE_LIMIT") {
            self.block_size_limit = parse("FERRITE_BLOCK_SIZE_LIMIT", value)?;
        }
        if let Some(value) = lookup("FERRITE_MAX_MEMPOOL_SIZE") {
            self.max_mempool_size = parse("FERRITE_MAX_MEMPOOL_SIZE", value)?;
        }
        if let Some(value) = lookup("FERRITE_API_PORT") {
            self.api_port = parse("FERRITE_API_PORT", value)?;
        }
        if let Some(value) = lookup("FERRITE_API_HOST") {
            self.api_host = value;
        }
        if let Some(value) = lookup("FERRITE_API_USERNAME") {
            self.api_username = value;
        }
        if let Some(value) = lookup("FERRITE_API_PASSWORD") {
            self.api_password = value;
        }
        if let Some(value) = lookup("FERRITE_BOOTSTRAP_NODES") {
            self.bootstrap_nodes = value
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = lookup("FERRITE_CONSENSUS") {
            self.consensus = match value.as_str() {
                "pow" => ConsensusKind::Pow,
                "poa" => ConsensusKind::Poa,
                "pos" => ConsensusKind::Pos,
                _ => {
                    return Err(ConfigError::BadOverride {
                        variable: "FERRITE_CONSENSUS".to_string(),
                        value,
                    })
                }
            };
        }
        if let Some(value) = lookup("FERRITE_NODE_KEY") {
            self.node_key = value;
        }
        Ok(())
    }

    /// Effective state directory: configured, or under the data dir.
    pub fn effective_state_directory(&self) -> String {
        if self.state_directory.is_empty() {
            format!("{}/state", self.data_directory)
        } else {
            self.state_directory.clone()
        }
    }

    /// Parsed bootstrap peers; bad entries are skipped.
    pub fn bootstrap_peers(&self) -> Vec<ferrite_types::PeerKey> {
        self.bootstrap_nodes
            .iter()
            .filter_map(|entry| {
                let (addr, port) = entry.rsplit_once(':')?;
                Some(ferrite_types::PeerKey::new(addr, port.parse().ok()?))
            })
            .collect()
    }
}
