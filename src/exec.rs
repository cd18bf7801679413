//! Command execution abstraction shared by every external-tool adapter.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::process::{Command, Stdio};

use thiserror::Error;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Errors raised while executing external commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// Raised when a command cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that could not be started.
        program: String,
        /// Underlying OS error message.
        message: String,
    },
    /// Raised when waiting on a running command fails.
    #[error("failed waiting for {program}: {message}")]
    Wait {
        /// Program being waited on.
        program: String,
        /// Underlying OS error message.
        message: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| ExecError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Command runner that mirrors child output to the operator's terminal
/// while still capturing it for inspection.
///
/// Long-running remote setup steps use this so progress is visible as it
/// happens rather than only after the step completes.
#[derive(Clone, Debug, Default)]
pub struct StreamingCommandRunner;

fn tee(reader: Option<impl Read>, mut sink: impl Write) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut captured = Vec::new();
    let mut buffer = [0_u8; 4096];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(count) => {
                let chunk = &buffer[..count];
                // Terminal echo is best effort; capture is what matters.
                let _ = sink.write_all(chunk);
                let _ = sink.flush();
                captured.extend_from_slice(chunk);
            }
        }
    }
    String::from_utf8_lossy(&captured).into_owned()
}

impl CommandRunner for StreamingCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ExecError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_thread = std::thread::spawn(move || tee(stdout_pipe, std::io::stdout()));
        let stderr_thread = std::thread::spawn(move || tee(stderr_pipe, std::io::stderr()));

        let status = child.wait().map_err(|err| ExecError::Wait {
            program: program.to_owned(),
            message: err.to_string(),
        })?;

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();

        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sh(script: &str) -> Vec<OsString> {
        vec![OsString::from("-c"), OsString::from(script)]
    }

    #[rstest]
    fn process_runner_captures_streams_and_code() {
        let output = ProcessCommandRunner
            .run("sh", &sh("printf out; printf err >&2; exit 3"))
            .expect("command should spawn");
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
        assert!(!output.is_success());
    }

    #[rstest]
    fn process_runner_reports_spawn_failure() {
        let err = ProcessCommandRunner
            .run("/nonexistent/definitely-not-a-binary", &[])
            .expect_err("spawn should fail");
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[rstest]
    fn streaming_runner_still_captures_output() {
        let output = StreamingCommandRunner
            .run("sh", &sh("printf hello"))
            .expect("command should spawn");
        assert_eq!(output.code, Some(0));
        assert_eq!(output.stdout, "hello");
    }
}
