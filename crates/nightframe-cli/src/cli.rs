//! Command-line argument parsing with clap.

use clap::{Parser, Subcommand, ValueEnum};

/// NIGHTFRAME - offline mesh tooling.
#[derive(Parser, Debug, Clone)]
#[command(name = "nightframe")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table, global = true)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build a random mesh and measure gossip and relay coverage.
    Simulate(SimulateArgs),

    /// Resolve a relay path along a chain of nodes.
    ///
    /// Only the last node of the chain has internet access.
    Chain(ChainArgs),

    /// Sample host load and report the degradation level it maps to.
    Load(LoadArgs),
}

/// Arguments for the simulate command.
#[derive(Parser, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of nodes.
    #[arg(short, long, default_value_t = 100)]
    pub nodes: usize,

    /// Target peers per node.
    #[arg(short, long, default_value_t = 4)]
    pub degree: usize,

    /// Fraction of nodes with internet access.
    #[arg(long, default_value_t = 0.1)]
    pub internet_fraction: f64,

    /// Fraction of nodes taken offline after the mesh is built.
    #[arg(long, default_value_t = 0.0)]
    pub offline_fraction: f64,

    /// Probability that a single forward is lost.
    #[arg(long, default_value_t = 0.0)]
    pub loss: f64,

    /// Peers each node forwards to.
    #[arg(long, default_value_t = 3)]
    pub fanout: usize,

    /// Gossip hop limit.
    #[arg(long, default_value_t = 6)]
    pub max_hops: u32,

    /// Relay search hop limit.
    #[arg(long, default_value_t = 5)]
    pub relay_max_hops: usize,

    /// Gossip rounds to average over.
    #[arg(short, long, default_value_t = 10)]
    pub runs: usize,

    /// Seed for a reproducible run.
    #[arg(short, long)]
    pub seed: Option<u64>,
}

/// Arguments for the chain command.
#[derive(Parser, Debug, Clone)]
pub struct ChainArgs {
    /// Nodes in the chain.
    #[arg(short, long, default_value_t = 5)]
    pub length: usize,

    /// Relay search hop limit.
    #[arg(long, default_value_t = 5)]
    pub max_hops: usize,
}

/// Arguments for the load command.
#[derive(Parser, Debug, Clone)]
pub struct LoadArgs {
    /// Queue depth to combine with the sampled CPU and memory.
    #[arg(short, long, default_value_t = 0)]
    pub queue_depth: usize,
}
