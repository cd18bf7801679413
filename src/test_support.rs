//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::rc::Rc;

use crate::exec::{CommandOutput, CommandRunner, ExecError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code with empty output streams.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with canned stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ExecError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Canned provider responses for scripting whole build pipelines.
///
/// One scripted runner backs both the provider CLI and the remote session
/// clients, so a complete image build is a single FIFO script of command
/// outcomes.
pub mod build_script {
    use super::ScriptedRunner;

    /// Key pair creation response.
    pub const KEY_PAIR_JSON: &str =
        r#"{"KeyName":"skylift-build-test","KeyMaterial":"-----BEGIN KEY-----"}"#;
    /// Instance described as running with a public address.
    pub const RUNNING_JSON: &str = r#"{"Reservations":[{"Instances":[
        {"State":{"Name":"running"},"PublicIpAddress":"198.51.100.7"}]}]}"#;
    /// Instance described as still pending.
    pub const PENDING_JSON: &str =
        r#"{"Reservations":[{"Instances":[{"State":{"Name":"pending"}}]}]}"#;
    /// Instance described as stopped.
    pub const STOPPED_JSON: &str =
        r#"{"Reservations":[{"Instances":[{"State":{"Name":"stopped"}}]}]}"#;
    /// Instance described as terminated.
    pub const TERMINATED_JSON: &str =
        r#"{"Reservations":[{"Instances":[{"State":{"Name":"terminated"}}]}]}"#;
    /// A single available vendor base image.
    pub const BASE_IMAGE_JSON: &str =
        r#"{"Images":[{"ImageId":"ami-base","Name":"al2023-ami-2025",
        "State":"available","CreationDate":"2025-01-01T00:00:00+00:00"}]}"#;
    /// A booted instance identifier.
    pub const INSTANCE_JSON: &str = r#"{"Instances":[{"InstanceId":"i-1"}]}"#;
    /// Image registration response for the baked image.
    pub const BAKED_IMAGE_JSON: &str = r#"{"ImageId":"ami-baked"}"#;
    /// The baked image reported as available.
    pub const IMAGE_AVAILABLE_JSON: &str =
        r#"{"Images":[{"ImageId":"ami-baked","Name":"baked","State":"available"}]}"#;
    /// The baked image reported as still pending.
    pub const IMAGE_PENDING_JSON: &str =
        r#"{"Images":[{"ImageId":"ami-baked","Name":"baked","State":"pending"}]}"#;

    /// Number of host configuration steps.
    pub const CONFIGURE_STEPS: usize = 9;
    /// Number of bundle unpack steps.
    pub const UNPACK_STEPS: usize = 4;
    /// Number of sanitisation steps.
    pub const SANITIZE_STEPS: usize = 9;

    /// Queues a successful provisioning sequence ending with a running host.
    pub fn push_provision_script(runner: &ScriptedRunner) {
        runner.push_output(Some(0), KEY_PAIR_JSON, "");
        runner.push_output(Some(0), r#"{"Vpcs":[{"VpcId":"vpc-1"}]}"#, "");
        runner.push_output(Some(0), r#"{"GroupId":"sg-1"}"#, "");
        runner.push_success(); // authorize ingress
        runner.push_success(); // revoke default egress
        runner.push_success(); // authorize egress
        runner.push_output(Some(0), BASE_IMAGE_JSON, "");
        runner.push_output(Some(0), INSTANCE_JSON, "");
        runner.push_output(Some(0), RUNNING_JSON, "");
    }

    /// Queues `count` successful remote command outcomes.
    pub fn push_remote_successes(runner: &ScriptedRunner, count: usize) {
        for _ in 0..count {
            runner.push_success();
        }
    }

    /// Queues a successful stop, snapshot, and availability sequence.
    pub fn push_bake_script(runner: &ScriptedRunner) {
        runner.push_success(); // stop-instances
        runner.push_output(Some(0), STOPPED_JSON, "");
        runner.push_output(Some(0), BAKED_IMAGE_JSON, "");
        runner.push_output(Some(0), IMAGE_AVAILABLE_JSON, "");
    }

    /// Queues a complete teardown of the session's resources.
    pub fn push_teardown_script(runner: &ScriptedRunner) {
        runner.push_success(); // terminate-instances
        runner.push_output(Some(0), TERMINATED_JSON, "");
        runner.push_success(); // delete-security-group
        runner.push_success(); // delete-key-pair
    }

    /// Queues everything a fully successful build consumes, from key pair
    /// creation through teardown.
    pub fn push_full_build_script(runner: &ScriptedRunner) {
        push_provision_script(runner);
        push_remote_successes(runner, CONFIGURE_STEPS);
        runner.push_success(); // scp upload
        push_remote_successes(runner, UNPACK_STEPS + SANITIZE_STEPS);
        push_bake_script(runner);
        push_teardown_script(runner);
    }
}
