//! Adapters that drive the `aws` CLI with JSON output.
//!
//! Every provider call shells out through the [`CommandRunner`] seam and
//! parses the CLI's `--output json` response with serde, so tests can script
//! full interactions without credentials or network access.

mod cloudformation;
mod ec2;
mod s3;
mod ssm;

pub use cloudformation::AwsStacks;
pub use ec2::AwsCompute;
pub use s3::{AwsArtifacts, template_url};
pub use ssm::AwsMetadata;

use std::ffi::OsString;

use serde::de::DeserializeOwned;

use super::ProviderError;
use crate::exec::{CommandOutput, CommandRunner};

/// Thin wrapper owning the CLI binary name and the runner seam.
#[derive(Clone, Debug)]
pub struct AwsCli<R: CommandRunner> {
    bin: String,
    runner: R,
}

impl<R: CommandRunner> AwsCli<R> {
    /// Creates a wrapper around the given binary and runner.
    pub fn new(bin: impl Into<String>, runner: R) -> Self {
        Self {
            bin: bin.into(),
            runner,
        }
    }

    /// Runs a CLI subcommand scoped to `region`, requiring exit code zero.
    pub(crate) fn run(
        &self,
        region: &str,
        args: &[OsString],
    ) -> Result<CommandOutput, ProviderError> {
        let mut full = Vec::with_capacity(args.len() + 4);
        full.extend(args.iter().cloned());
        full.push(OsString::from("--region"));
        full.push(OsString::from(region));
        full.push(OsString::from("--output"));
        full.push(OsString::from("json"));

        let output = self.runner.run(&self.bin, &full)?;
        if output.is_success() {
            return Ok(output);
        }

        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(ProviderError::CommandFailure {
            program: self.bin.clone(),
            status: output.code,
            status_text,
            stderr: output.stderr,
        })
    }

    /// Runs a subcommand and parses its JSON stdout into `T`.
    pub(crate) fn run_json<T: DeserializeOwned>(
        &self,
        region: &str,
        args: &[OsString],
        resource: &str,
    ) -> Result<T, ProviderError> {
        let output = self.run(region, args)?;
        serde_json::from_str::<T>(&output.stdout).map_err(|err| ProviderError::Parse {
            resource: resource.to_owned(),
            message: err.to_string(),
        })
    }

    /// Runs a subcommand and discards its output.
    pub(crate) fn run_discarding(
        &self,
        region: &str,
        args: &[OsString],
    ) -> Result<(), ProviderError> {
        self.run(region, args).map(|_| ())
    }
}

/// Converts a string slice list into the owned argument vector the runner
/// expects.
pub(crate) fn os_args(parts: &[&str]) -> Vec<OsString> {
    parts.iter().map(OsString::from).collect()
}

/// Returns `true` when a CLI failure's stderr names one of the given
/// provider error markers (used to map "not found" onto `Ok(None)`).
pub(crate) fn failure_names(err: &ProviderError, markers: &[&str]) -> bool {
    match err {
        ProviderError::CommandFailure { stderr, .. } => {
            markers.iter().any(|marker| stderr.contains(marker))
        }
        _ => false,
    }
}
