//! # CLI Interface
//!
//! Defines the command-line argument structure for `childchain-node` using
//! `clap` derive. Three subcommands: `run`, `inspect`, and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use childchain_protocol::config::{
    DEFAULT_DATA_DIR, DEFAULT_METRICS_PORT, DEFAULT_RPC_PORT, DEFAULT_TREE_HEIGHT, ZERO_ADDRESS,
};

/// Child-chain operator node.
///
/// Accepts signed light transactions, keeps the off-chain ledger, builds
/// stage checkpoints and serves inclusion proofs.
#[derive(Parser, Debug)]
#[command(
    name = "childchain-node",
    about = "Child-chain operator node",
    version,
    propagate_version = true
)]
pub struct ChildChainCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the operator node.
    Run(RunArgs),
    /// Print what the database holds for a stage, without starting a node.
    Inspect(InspectArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory for the settlement database. Created on first run.
    #[arg(long, short = 'd', env = "CHILDCHAIN_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Port for the HTTP and WebSocket API.
    #[arg(long, env = "CHILDCHAIN_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "CHILDCHAIN_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Height of the receipt and account trees. Fixed for the life of the
    /// database.
    #[arg(long, env = "CHILDCHAIN_TREE_HEIGHT", default_value_t = DEFAULT_TREE_HEIGHT)]
    pub tree_height: u32,

    /// Ethereum address whose signature must fill the server slot.
    #[arg(long, env = "CHILDCHAIN_OPERATOR_ADDRESS")]
    pub operator_address: String,

    /// Address of the settlement contract on the parent chain.
    #[arg(long, env = "CHILDCHAIN_SIDECHAIN_ADDRESS", default_value = ZERO_ADDRESS)]
    pub sidechain_address: String,

    /// Commit only the receipt tree, not the account tree.
    #[arg(long, env = "CHILDCHAIN_NO_ACCOUNT_TREE")]
    pub no_account_tree: bool,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "CHILDCHAIN_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `inspect` subcommand.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    #[arg(long, short = 'd', env = "CHILDCHAIN_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Stage to inspect. Lists committed stages when omitted.
    #[arg(long)]
    pub stage: Option<u64>,
}
