use std::env;
use std::path::PathBuf;
use std::time::Duration;

use dotenv::dotenv;

use crate::app::errors::{NodeError, Result};

/// Node configuration, loaded from the environment (.env supported).
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for the node databases.
    pub dir: PathBuf,
    pub port: u16,
    /// Ethereum JSON-RPC endpoint.
    pub eth_url: String,
    /// Voting contract address whose events are synced.
    pub contract_addr: String,
    /// Block to start syncing from on first run.
    pub start_block: u64,
    pub chain_id: u64,
    pub prover_url: String,
    /// Component toggles; at least one must be enabled.
    pub census_builder: bool,
    pub votes_aggregator: bool,
    /// Circuit shape used for proof dispatches.
    pub n_max_votes: usize,
    pub n_levels: usize,
    /// Timeout applied to chain and prover HTTP requests.
    pub http_timeout: Duration,
    pub sync_poll_interval: Duration,
    pub sweep_interval: Duration,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T> {
    let raw = var_or(name, default);
    raw.parse()
        .map_err(|_| NodeError::InvalidInput(format!("invalid {}: {}", name, raw)))
}

impl Config {
    pub fn from_env() -> Result<Config> {
        dotenv().ok();

        let config = Config {
            dir: PathBuf::from(var_or("NODE_DIR", "ovote-node-data")),
            port: parse_var("PORT", "8080")?,
            eth_url: var_or("ETH_URL", "http://127.0.0.1:8545"),
            contract_addr: var_or("CONTRACT_ADDR", ""),
            start_block: parse_var("START_BLOCK", "0")?,
            chain_id: parse_var("CHAIN_ID", "1")?,
            prover_url: var_or("PROVER_URL", "http://127.0.0.1:3000"),
            census_builder: parse_var("CENSUS_BUILDER", "true")?,
            votes_aggregator: parse_var("VOTES_AGGREGATOR", "true")?,
            n_max_votes: parse_var("N_MAX_VOTES", "64")?,
            n_levels: parse_var("N_LEVELS", "16")?,
            http_timeout: Duration::from_secs(parse_var("HTTP_TIMEOUT_SECS", "30")?),
            sync_poll_interval: Duration::from_secs(parse_var("SYNC_POLL_SECS", "6")?),
            sweep_interval: Duration::from_secs(parse_var("SWEEP_SECS", "6")?),
        };

        if !config.census_builder && !config.votes_aggregator {
            return Err(NodeError::InvalidInput(
                "at least censusBuilder or votesAggregator must be enabled".to_string(),
            ));
        }
        Ok(config)
    }
}
