//! Mesh simulation command implementation.
//!
//! Builds a random mesh, takes a fraction of it offline, then measures:
//! - Gossip coverage from the first online node, averaged over several runs
//! - Relay reachability for every online node without internet

use std::io::Write;
use std::sync::Arc;

use nightframe_mesh::{GossipConfig, GossipEngine, MeshTopology, NodeId, RelayConfig, RelayResolver};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::info;

use crate::cli::SimulateArgs;
use crate::error::CliError;
use crate::output::{OutputFormat, SimulationReport};

/// Simulate command executor.
#[derive(Debug, Default)]
pub struct SimulateCommand;

impl SimulateCommand {
    /// Execute the simulate command.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid arguments or if output fails.
    pub fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        args: &SimulateArgs,
    ) -> Result<(), CliError> {
        let report = Self::simulate(args)?;
        format.write(writer, &report)
    }

    /// Runs the simulation.
    ///
    /// The same seed and arguments always produce the same report.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::InvalidArgument`] for out-of-range arguments or
    /// when every node ends up offline.
    pub fn simulate(args: &SimulateArgs) -> Result<SimulationReport, CliError> {
        validate(args)?;

        let gossip_config = GossipConfig::default()
            .with_fanout(args.fanout)
            .with_max_hops(args.max_hops)
            .with_packet_loss_rate(args.loss);
        gossip_config.validate()?;

        let mut rng = args
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

        let topology = Arc::new(MeshTopology::new());
        for i in 0..args.nodes {
            let has_internet = rng.gen_bool(args.internet_fraction);
            topology.create_node(Some(NodeId::new(format!("node-{i:04}"))), has_internet)?;
        }
        let edges = topology.create_mesh_topology(args.degree, &mut rng);
        let failed = topology.inject_failures(args.offline_fraction, &mut rng);
        info!(nodes = args.nodes, edges, failed = failed.len(), "mesh built");

        let source = topology
            .node_ids()
            .into_iter()
            .find(|id| topology.snapshot(id).is_some_and(|n| n.online))
            .ok_or_else(|| CliError::InvalidArgument("every node is offline".into()))?;

        let engine = GossipEngine::new(Arc::clone(&topology), gossip_config)
            .with_seed(rng.next_u64());
        let gossip = engine.propagate_many(&source, args.runs)?;

        let resolver = RelayResolver::new(
            Arc::clone(&topology),
            RelayConfig::default().with_max_hops(args.relay_max_hops),
        );
        let relay = resolver.relay_coverage();

        Ok(SimulationReport {
            seed: args.seed,
            topology: topology.stats(),
            failed: failed.len(),
            source: source.to_string(),
            gossip,
            relay,
        })
    }
}

fn validate(args: &SimulateArgs) -> Result<(), CliError> {
    if args.nodes == 0 {
        return Err(CliError::InvalidArgument("nodes must be at least 1".into()));
    }
    if args.runs == 0 {
        return Err(CliError::InvalidArgument("runs must be at least 1".into()));
    }
    for (name, value) in [
        ("internet-fraction", args.internet_fraction),
        ("offline-fraction", args.offline_fraction),
        ("loss", args.loss),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(CliError::InvalidArgument(format!(
                "{name} must be between 0 and 1, got {value}"
            )));
        }
    }
    Ok(())
}
