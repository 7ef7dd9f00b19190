//! Load command implementation.

use std::io::Write;

use nightframe_resilience::{
    DegradationLevel, DegradationThresholds, LoadSample, LoadSource, SystemLoadSampler,
};

use crate::cli::LoadArgs;
use crate::error::CliError;
use crate::output::{LoadReport, OutputFormat};

/// Load command executor.
#[derive(Debug, Default)]
pub struct LoadCommand {
    thresholds: DegradationThresholds,
}

impl LoadCommand {
    /// Create a load command using the given thresholds.
    #[must_use]
    pub const fn new(thresholds: DegradationThresholds) -> Self {
        Self { thresholds }
    }

    /// Execute the load command.
    ///
    /// # Errors
    ///
    /// Returns an error if output fails.
    pub fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        args: &LoadArgs,
    ) -> Result<(), CliError> {
        let sample = SystemLoadSampler::new().sample(args.queue_depth);
        format.write(writer, &self.report(sample))
    }

    /// Maps a sample to a report.
    #[must_use]
    pub fn report(&self, sample: LoadSample) -> LoadReport {
        let level = self.thresholds.level_for(&sample);
        LoadReport {
            sample,
            level,
            throttle: level >= DegradationLevel::Reduced,
            skip_non_essential: level >= DegradationLevel::Minimal,
        }
    }
}
