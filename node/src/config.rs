//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use dpos_state::Wallet;
use dpos_types::{Block, MilestoneSchedule};

use crate::NodeError;

/// Configuration for a DPoS node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Start a brand new network from the genesis block instead of syncing.
    #[serde(default)]
    pub network_start: bool,

    /// Unix time (seconds) of the network epoch; timestamps count from here.
    #[serde(default = "default_epoch")]
    pub epoch_unix_secs: u64,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Height-activated network parameters.
    #[serde(default = "default_milestones")]
    pub milestones: MilestoneSchedule,

    /// Genesis block and wallets, used when the store is empty.
    #[serde(default)]
    pub genesis: Option<GenesisConfig>,

    /// Semver requirements a peer must satisfy (any of them).
    #[serde(default)]
    pub minimum_versions: Vec<String>,

    /// Peers exempt from version checks.
    #[serde(default = "default_whitelist")]
    pub whitelist: Vec<IpAddr>,

    /// Idle time before checking the network for new blocks.
    #[serde(default = "default_wake_up_secs")]
    pub wake_up_secs: u64,

    /// Recent blocks kept in the state store.
    #[serde(default = "default_max_last_blocks")]
    pub max_last_blocks: usize,

    /// Queue length above which downloading pauses.
    #[serde(default = "default_queue_pause_threshold")]
    pub queue_pause_threshold: usize,

    /// Empty downloads tolerated before declaring the network halted.
    #[serde(default = "default_max_no_block_attempts")]
    pub max_no_block_attempts: u32,

    /// Halts tolerated before checking network health.
    #[serde(default = "default_max_p2p_update_attempts")]
    pub max_p2p_update_attempts: u32,

    /// Pause after an empty download before retrying.
    #[serde(default = "default_download_retry_ms")]
    pub download_retry_ms: u64,

    #[serde(default)]
    pub database_rollback: DatabaseRollbackConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub block: Block,
    #[serde(default)]
    pub wallets: Vec<Wallet>,
}

/// How far and in which increments a corrupt store is rewound at startup.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DatabaseRollbackConfig {
    #[serde(default = "default_max_block_rewind")]
    pub max_block_rewind: u64,
    #[serde(default = "default_rollback_steps")]
    pub steps: u64,
}

impl Default for DatabaseRollbackConfig {
    fn default() -> Self {
        Self {
            max_block_rewind: default_max_block_rewind(),
            steps: default_rollback_steps(),
        }
    }
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_epoch() -> u64 {
    // 2017-03-21T13:00:00Z
    1_490_101_200
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_milestones() -> MilestoneSchedule {
    MilestoneSchedule::single(51, 8, 0)
}

fn default_whitelist() -> Vec<IpAddr> {
    vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
}

fn default_wake_up_secs() -> u64 {
    60
}

fn default_max_last_blocks() -> usize {
    100
}

fn default_queue_pause_threshold() -> usize {
    100
}

fn default_max_no_block_attempts() -> u32 {
    5
}

fn default_max_p2p_update_attempts() -> u32 {
    3
}

fn default_download_retry_ms() -> u64 {
    1000
}

fn default_max_block_rewind() -> u64 {
    10_000
}

fn default_rollback_steps() -> u64 {
    1000
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network_start: false,
            epoch_unix_secs: default_epoch(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            milestones: default_milestones(),
            genesis: None,
            minimum_versions: Vec::new(),
            whitelist: default_whitelist(),
            wake_up_secs: default_wake_up_secs(),
            max_last_blocks: default_max_last_blocks(),
            queue_pause_threshold: default_queue_pause_threshold(),
            max_no_block_attempts: default_max_no_block_attempts(),
            max_p2p_update_attempts: default_max_p2p_update_attempts(),
            download_retry_ms: default_download_retry_ms(),
            database_rollback: DatabaseRollbackConfig::default(),
        }
    }
}
