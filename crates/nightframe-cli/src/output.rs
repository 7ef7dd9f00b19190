//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use nightframe_mesh::{CoverageSummary, RelayCoverage, RelayPath, TopologyStats};
use nightframe_resilience::{DegradationLevel, LoadSample};
use serde::Serialize;

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Get the current format.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }

    /// Write a serializable value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// Result of a mesh simulation.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Seed used, when one was given.
    pub seed: Option<u64>,
    /// Topology after failures were injected.
    pub topology: TopologyStats,
    /// Nodes taken offline.
    pub failed: usize,
    /// Node the gossip rounds started from.
    pub source: String,
    /// Gossip coverage across all rounds.
    pub gossip: CoverageSummary,
    /// Relay reachability for internet-less nodes.
    pub relay: RelayCoverage,
}

impl TableDisplay for SimulationReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Mesh Simulation")?;
        writeln!(writer, "══════════════════════════════════")?;
        if let Some(seed) = self.seed {
            writeln!(writer, "Seed:             {seed}")?;
        }
        writeln!(writer)?;
        writeln!(writer, "Topology")?;
        writeln!(writer, "  Nodes:          {}", self.topology.nodes)?;
        writeln!(writer, "  Edges:          {}", self.topology.edges)?;
        writeln!(writer, "  Avg degree:     {:.2}", self.topology.average_degree)?;
        writeln!(writer, "  Online:         {}", self.topology.online)?;
        writeln!(writer, "  Offline:        {}", self.failed)?;
        writeln!(writer, "  With internet:  {}", self.topology.with_internet)?;
        writeln!(writer)?;
        writeln!(writer, "Gossip ({} runs from {})", self.gossip.runs, self.source)?;
        writeln!(writer, "  Mean coverage:  {:.1}%", self.gossip.mean_coverage_percent)?;
        writeln!(
            writer,
            "  Range:          {:.1}% - {:.1}%",
            self.gossip.min_coverage_percent, self.gossip.max_coverage_percent
        )?;
        writeln!(writer, "  Lost per run:   {:.1}", self.gossip.mean_packets_lost)?;
        writeln!(writer)?;
        writeln!(writer, "Relay")?;
        writeln!(writer, "  Candidates:     {}", self.relay.candidates)?;
        writeln!(writer, "  Resolved:       {}", self.relay.resolved)?;
        writeln!(writer, "  Unresolved:     {}", self.relay.unresolved)?;
        writeln!(writer, "  Mean hops:      {:.2}", self.relay.mean_hops)?;
        Ok(())
    }
}

/// Result of a chain relay check.
#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    /// Nodes in the chain.
    pub length: usize,
    /// Hop limit used.
    pub max_hops: usize,
    /// Resolved path.
    pub relay: RelayPath,
}

impl TableDisplay for ChainReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Relay Path")?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Chain length:     {}", self.length)?;
        writeln!(writer, "Max hops:         {}", self.max_hops)?;
        writeln!(writer, "Source:           {}", self.relay.source)?;
        writeln!(writer)?;
        if self.relay.success {
            let path: Vec<&str> = self.relay.path.iter().map(|id| id.as_str()).collect();
            writeln!(writer, "Path:             {}", path.join(" -> "))?;
            writeln!(writer, "Hops:             {}", self.relay.hop_count)?;
            writeln!(writer, "Est. latency:     {:?}", self.relay.estimated_latency)?;
        } else {
            let reason = self
                .relay
                .failure_reason
                .map_or_else(|| "unknown".to_string(), |r| r.to_string());
            writeln!(writer, "No relay path:    {reason}")?;
        }
        Ok(())
    }
}

/// Sampled load and the level it maps to.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    /// The sample.
    pub sample: LoadSample,
    /// Degradation level.
    pub level: DegradationLevel,
    /// Whether incoming work would be throttled.
    pub throttle: bool,
    /// Whether non-essential work would be skipped.
    pub skip_non_essential: bool,
}

impl TableDisplay for LoadReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Node Load")?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Queue depth:      {}", self.sample.queue_depth)?;
        writeln!(writer, "CPU:              {:.1}%", self.sample.cpu_percent)?;
        writeln!(writer, "Memory:           {:.1}%", self.sample.memory_percent)?;
        writeln!(writer)?;
        writeln!(
            writer,
            "Level:            {} ({})",
            self.level.as_u8(),
            self.level
        )?;
        writeln!(writer, "Throttle:         {}", yes_no(self.throttle))?;
        writeln!(writer, "Skip non-essential: {}", yes_no(self.skip_non_essential))?;
        Ok(())
    }
}

const fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightframe_mesh::{MeshTopology, NodeId, RelayConfig, RelayResolver};
    use std::sync::Arc;

    fn chain_report(length: usize, max_hops: usize) -> ChainReport {
        let topology = Arc::new(MeshTopology::new());
        let ids: Vec<NodeId> = (0..length)
            .map(|i| {
                topology
                    .create_node(Some(NodeId::new(i.to_string())), i + 1 == length)
                    .expect("node")
            })
            .collect();
        for pair in ids.windows(2) {
            topology.connect_nodes(&pair[0], &pair[1]).expect("connect");
        }
        let resolver = RelayResolver::new(topology, RelayConfig::default().with_max_hops(max_hops));
        ChainReport {
            length,
            max_hops,
            relay: resolver.find_relay_path(&ids[0]),
        }
    }

    #[test]
    fn chain_table_shows_path() {
        let out = OutputFormat::default()
            .to_string(&chain_report(3, 5))
            .expect("render");
        assert!(out.contains("0 -> 1 -> 2"));
        assert!(out.contains("Hops:             2"));
    }

    #[test]
    fn chain_table_shows_failure_reason() {
        let out = OutputFormat::default()
            .to_string(&chain_report(7, 5))
            .expect("render");
        assert!(out.contains("no path within max hops"));
    }

    #[test]
    fn load_report_json() {
        let report = LoadReport {
            sample: LoadSample::new(600, 10.0, 20.0),
            level: DegradationLevel::Minimal,
            throttle: true,
            skip_non_essential: true,
        };
        let out = OutputFormat::new(Format::Json)
            .to_string(&report)
            .expect("render");
        let value: serde_json::Value = serde_json::from_str(&out).expect("json");
        assert_eq!(value["level"], "minimal");
        assert_eq!(value["sample"]["queue_depth"], 600);
    }
}
