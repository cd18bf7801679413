//! Authenticated remote sessions to a provisioned build host.
//!
//! Commands run through the system `ssh` client and file transfer through
//! `scp`, both via the [`CommandRunner`] seam. The step runner executes an
//! ordered list of `(description, command)` pairs and aborts the whole
//! pipeline on the first non-zero exit code; no retries happen at this
//! layer.

use std::ffi::OsString;
use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::info;

use crate::exec::{CommandRunner, ExecError};

/// Connection details for one build host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteTarget {
    /// Public address of the host.
    pub host: IpAddr,
    /// Remote-session TCP port.
    pub port: u16,
    /// User the session authenticates as.
    pub user: String,
    /// Path to the session's single-use private key.
    pub identity_file: Utf8PathBuf,
}

/// Output captured from a remote command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Exit code reported by the remote command.
    pub exit_code: i32,
    /// Captured standard output stream.
    pub stdout: String,
    /// Captured standard error stream.
    pub stderr: String,
}

/// Errors surfaced while executing remote commands or transfers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when the local client binary cannot be executed.
    #[error(transparent)]
    Exec(#[from] ExecError),
    /// Raised when the client finishes without yielding an exit status.
    #[error("{program} did not return an exit code")]
    MissingExitCode {
        /// Client binary that completed without a status.
        program: String,
    },
    /// Raised when a file transfer exits non-zero.
    #[error("transfer of {local} to {remote} failed with status {status}: {stderr}")]
    TransferFailed {
        /// Local path that was being transferred.
        local: Utf8PathBuf,
        /// Remote destination path.
        remote: String,
        /// Exit status reported by the transfer client.
        status: i32,
        /// Stderr captured from the transfer client.
        stderr: String,
    },
}

/// One remote setup step: an operator-facing description plus the command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SetupStep {
    /// Short description reported to the operator before execution.
    pub description: String,
    /// Shell command executed on the host.
    pub command: String,
}

impl SetupStep {
    /// Builds a step from a description and command.
    pub fn new(description: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            command: command.into(),
        }
    }
}

/// A failed setup step, carrying everything the operator needs to diagnose
/// it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StepFailure {
    /// Description of the step that failed.
    pub description: String,
    /// Command that returned non-zero.
    pub command: String,
    /// Exit code the command returned.
    pub exit_code: i32,
    /// Stderr captured from the command.
    pub stderr: String,
}

/// An authenticated channel to one provisioned host.
#[derive(Clone, Debug)]
pub struct RemoteSession<R: CommandRunner> {
    ssh_bin: String,
    scp_bin: String,
    target: RemoteTarget,
    runner: R,
}

impl<R: CommandRunner> RemoteSession<R> {
    /// Opens a session value bound to the given target.
    pub fn new(
        ssh_bin: impl Into<String>,
        scp_bin: impl Into<String>,
        target: RemoteTarget,
        runner: R,
    ) -> Self {
        Self {
            ssh_bin: ssh_bin.into(),
            scp_bin: scp_bin.into(),
            target,
            runner,
        }
    }

    /// Returns the session's connection target.
    #[must_use]
    pub const fn target(&self) -> &RemoteTarget {
        &self.target
    }

    fn common_options(&self) -> Vec<OsString> {
        vec![
            OsString::from("-i"),
            OsString::from(self.target.identity_file.as_str()),
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from("-o"),
            OsString::from("StrictHostKeyChecking=no"),
            OsString::from("-o"),
            OsString::from("UserKnownHostsFile=/dev/null"),
        ]
    }

    /// Executes `command` on the host and returns its captured output.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::MissingExitCode`] when the client exits
    /// without a status, or an [`ExecError`] when it cannot be spawned.
    pub fn exec(&self, command: &str) -> Result<RemoteCommandOutput, RemoteError> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(self.target.port.to_string()),
        ];
        args.extend(self.common_options());
        args.push(OsString::from(format!(
            "{}@{}",
            self.target.user, self.target.host
        )));
        args.push(OsString::from(command));

        let output = self.runner.run(&self.ssh_bin, &args)?;
        let Some(exit_code) = output.code else {
            return Err(RemoteError::MissingExitCode {
                program: self.ssh_bin.clone(),
            });
        };

        Ok(RemoteCommandOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Streams a local file to `remote_path` on the host.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::TransferFailed`] when the transfer client
    /// exits non-zero.
    pub fn upload(&self, local: &Utf8Path, remote_path: &str) -> Result<(), RemoteError> {
        let mut args = vec![
            OsString::from("-P"),
            OsString::from(self.target.port.to_string()),
        ];
        args.extend(self.common_options());
        args.push(OsString::from(local.as_str()));
        args.push(OsString::from(format!(
            "{}@{}:{remote_path}",
            self.target.user, self.target.host
        )));

        let output = self.runner.run(&self.scp_bin, &args)?;
        if output.is_success() {
            return Ok(());
        }

        Err(RemoteError::TransferFailed {
            local: local.to_path_buf(),
            remote: remote_path.to_owned(),
            status: output.code.unwrap_or(-1),
            stderr: output.stderr,
        })
    }

    /// Runs an ordered list of setup steps, aborting on the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] for client failures, or `Ok(Err(failure))`
    /// when a step exits non-zero; remaining steps are not attempted.
    pub fn run_steps(&self, steps: &[SetupStep]) -> Result<Result<(), StepFailure>, RemoteError> {
        for step in steps {
            info!(step = %step.description, command = %step.command, "running setup step");
            let output = self.exec(&step.command)?;
            if output.exit_code != 0 {
                return Ok(Err(StepFailure {
                    description: step.description.clone(),
                    command: step.command.clone(),
                    exit_code: output.exit_code,
                    stderr: output.stderr,
                }));
            }
        }
        Ok(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use rstest::rstest;
    use std::net::Ipv4Addr;

    fn session(runner: ScriptedRunner) -> RemoteSession<ScriptedRunner> {
        RemoteSession::new(
            "ssh",
            "scp",
            RemoteTarget {
                host: IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)),
                port: 22,
                user: String::from("ec2-user"),
                identity_file: Utf8PathBuf::from("/tmp/key.pem"),
            },
            runner,
        )
    }

    #[rstest]
    fn exec_builds_batch_mode_ssh_invocation() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "ok", "");
        let output = session(runner.clone())
            .exec("uname -a")
            .expect("exec should succeed");
        assert_eq!(output.exit_code, 0);

        let call = runner.invocations().remove(0);
        assert_eq!(call.program, "ssh");
        let rendered = call.command_string();
        assert!(rendered.contains("-i /tmp/key.pem"), "call: {rendered}");
        assert!(rendered.contains("BatchMode=yes"), "call: {rendered}");
        assert!(
            rendered.contains("ec2-user@198.51.100.7"),
            "call: {rendered}"
        );
        assert!(rendered.ends_with("uname -a"), "call: {rendered}");
    }

    #[rstest]
    fn upload_targets_remote_staging_path() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        session(runner.clone())
            .upload(Utf8Path::new("/work/app.zip"), "/tmp/app.zip")
            .expect("upload should succeed");

        let call = runner.invocations().remove(0);
        assert_eq!(call.program, "scp");
        let rendered = call.command_string();
        assert!(
            rendered.ends_with("/work/app.zip ec2-user@198.51.100.7:/tmp/app.zip"),
            "call: {rendered}"
        );
    }

    #[rstest]
    fn upload_failure_carries_stderr() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(1), "", "connection reset");
        let err = session(runner)
            .upload(Utf8Path::new("/work/app.zip"), "/tmp/app.zip")
            .expect_err("upload should fail");
        let RemoteError::TransferFailed { status, stderr, .. } = err else {
            panic!("expected TransferFailed");
        };
        assert_eq!(status, 1);
        assert_eq!(stderr, "connection reset");
    }

    #[rstest]
    fn run_steps_aborts_on_first_nonzero_exit() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_output(Some(2), "", "no such package");
        // A third response is deliberately queued to prove it goes unused.
        runner.push_success();

        let steps = vec![
            SetupStep::new("Update packages", "sudo dnf upgrade -y"),
            SetupStep::new("Install runtime", "sudo dnf install -y nodejs"),
            SetupStep::new("Verify runtime", "node --version"),
        ];
        let failure = session(runner.clone())
            .run_steps(&steps)
            .expect("client should run")
            .expect_err("second step should fail");

        assert_eq!(failure.description, "Install runtime");
        assert_eq!(failure.exit_code, 2);
        assert_eq!(failure.stderr, "no such package");
        assert_eq!(runner.invocations().len(), 2, "third step must not run");
    }

    #[rstest]
    fn run_steps_completes_when_all_steps_succeed() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_success();

        let steps = vec![
            SetupStep::new("One", "true"),
            SetupStep::new("Two", "true"),
        ];
        session(runner)
            .run_steps(&steps)
            .expect("client should run")
            .expect("all steps should pass");
    }
}
