//! Chain relay command implementation.

use std::io::Write;
use std::sync::Arc;

use nightframe_mesh::{MeshTopology, NodeId, RelayConfig, RelayResolver};

use crate::cli::ChainArgs;
use crate::error::CliError;
use crate::output::{ChainReport, OutputFormat};

/// Chain command executor.
#[derive(Debug, Default)]
pub struct ChainCommand;

impl ChainCommand {
    /// Execute the chain command.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty chain or if output fails.
    pub fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        args: &ChainArgs,
    ) -> Result<(), CliError> {
        let report = Self::resolve(args)?;
        format.write(writer, &report)
    }

    /// Builds `node-0 - node-1 - ... - node-(k-1)` and resolves from `node-0`.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::InvalidArgument`] for a zero-length chain.
    pub fn resolve(args: &ChainArgs) -> Result<ChainReport, CliError> {
        if args.length == 0 {
            return Err(CliError::InvalidArgument(
                "chain length must be at least 1".into(),
            ));
        }

        let topology = Arc::new(MeshTopology::new());
        let mut ids = Vec::with_capacity(args.length);
        for i in 0..args.length {
            let id = topology.create_node(Some(NodeId::new(format!("node-{i}"))), i + 1 == args.length)?;
            ids.push(id);
        }
        for pair in ids.windows(2) {
            topology.connect_nodes(&pair[0], &pair[1])?;
        }

        let resolver = RelayResolver::new(
            topology,
            RelayConfig::default().with_max_hops(args.max_hops),
        );
        Ok(ChainReport {
            length: args.length,
            max_hops: args.max_hops,
            relay: resolver.find_relay_path(&ids[0]),
        })
    }
}
