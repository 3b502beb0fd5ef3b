//! Configuration management for the tracer.
//!
//! Supports loading from environment variables, config files, and CLI arguments.

use crate::schemas::{TraceDirection, TransferKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Highest end block sent to the explorer when no end is configured
pub const OPEN_END_BLOCK: u64 = 99_999_999;

/// Main tracer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracerConfig {
    /// Explorer connection and pacing
    #[serde(default)]
    pub explorer: ExplorerConfig,

    /// Traversal parameters
    #[serde(default)]
    pub trace: TraceConfig,

    /// Output directory paths
    #[serde(default)]
    pub paths: PathConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// Etherscan API key
    #[serde(default)]
    pub api_key: String,

    /// Base URL of the Etherscan-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Chain id for the v2 multichain endpoint
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Rows requested per page (the explorer caps page * offset at 10000)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Fixed delay between successful pages (ms)
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    /// First backoff sleep after a rate-limit signal (ms)
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Backoff ceiling (ms)
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Per-request HTTP timeout (s)
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Client-wide request ceiling
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl ExplorerConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: default_base_url(),
            chain_id: default_chain_id(),
            page_size: default_page_size(),
            throttle_ms: default_throttle_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            request_timeout_secs: default_timeout_secs(),
            requests_per_second: default_rps(),
        }
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Address the traversal starts from
    #[serde(default)]
    pub root_address: String,

    /// Deepest layer explored (1..=10)
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    #[serde(default)]
    pub direction: TraceDirection,

    /// Largest transfers kept per address; 0 keeps everything
    #[serde(default = "default_top_k")]
    pub top_k_per_address: usize,

    /// Inclusive block range
    #[serde(default)]
    pub start_block: u64,

    #[serde(default = "default_end_block")]
    pub end_block: u64,

    #[serde(default)]
    pub kind: TransferKind,

    /// Skip transactions carrying call data
    #[serde(default = "default_pure_transfers_only")]
    pub pure_transfers_only: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            root_address: String::new(),
            max_depth: default_max_depth(),
            direction: TraceDirection::default(),
            top_k_per_address: default_top_k(),
            start_block: 0,
            end_block: default_end_block(),
            kind: TransferKind::default(),
            pure_transfers_only: default_pure_transfers_only(),
        }
    }
}

impl TraceConfig {
    /// Whether the call-data filter applies; token transfer events carry no call data
    pub fn filters_contract_calls(&self) -> bool {
        self.pure_transfers_only && self.kind == TransferKind::Native
    }

    /// Validate traversal bounds
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_depth < 1 || self.max_depth > 10 {
            anyhow::bail!("max_depth must be between 1 and 10");
        }
        if self.top_k_per_address > 1000 {
            anyhow::bail!("top_k_per_address must be between 0 and 1000");
        }
        if self.end_block != 0 && self.end_block < self.start_block {
            anyhow::bail!(
                "end_block {} is before start_block {}",
                self.end_block,
                self.start_block
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

// Default value functions
fn default_base_url() -> String {
    "https://api.etherscan.io/v2/api".to_string()
}

fn default_chain_id() -> u64 {
    1
}

fn default_page_size() -> usize {
    1000
}

fn default_throttle_ms() -> u64 {
    200
}

fn default_backoff_initial_ms() -> u64 {
    1000
}

fn default_backoff_cap_ms() -> u64 {
    8000
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_rps() -> u32 {
    5 // Etherscan free tier
}

fn default_max_depth() -> u32 {
    3
}

fn default_top_k() -> usize {
    10
}

fn default_end_block() -> u64 {
    OPEN_END_BLOCK
}

fn default_pure_transfers_only() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("traces")
}

impl TracerConfig {
    /// Load configuration from environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        // Missing keys are reported by validate(); offline commands never need one
        let api_key = std::env::var("ETHERSCAN_API_KEY").unwrap_or_default();

        let mut config = Self {
            explorer: ExplorerConfig::new(api_key),
            trace: TraceConfig::default(),
            paths: PathConfig::default(),
        };
        config.apply_env_overrides();

        Ok(config)
    }

    /// Load from a TOML config file with environment overrides
    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = ::toml::from_str(&contents)?;

        if let Ok(key) = std::env::var("ETHERSCAN_API_KEY") {
            config.explorer.api_key = key;
        }
        config.apply_env_overrides();

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ETHERSCAN_BASE_URL") {
            self.explorer.base_url = url;
        }
        if let Some(chain_id) = std::env::var("ETHERSCAN_CHAIN_ID")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.explorer.chain_id = chain_id;
        }
    }

    /// Validate the whole configuration before a run that calls the explorer
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.explorer.api_key.trim().is_empty() {
            anyhow::bail!("ETHERSCAN_API_KEY is not set and the config has no api_key");
        }
        self.validate_settings()
    }

    /// Everything [`Self::validate`] checks except the API key
    pub fn validate_settings(&self) -> anyhow::Result<()> {
        if self.explorer.page_size == 0 || self.explorer.page_size > 10_000 {
            anyhow::bail!("page_size must be between 1 and 10000");
        }
        if self.explorer.backoff_cap_ms < self.explorer.backoff_initial_ms {
            anyhow::bail!("backoff_cap_ms must be >= backoff_initial_ms");
        }
        if self.explorer.requests_per_second == 0 {
            anyhow::bail!("requests_per_second must be > 0");
        }
        self.trace.validate()
    }

    /// Ensure the output directory exists
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.paths.output_dir)?;
        Ok(())
    }
}
