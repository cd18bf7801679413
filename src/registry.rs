//! Tracking and best-effort release of ephemeral build resources.
//!
//! Every provider-side resource a build session creates is registered here
//! the moment its creation call returns, before anything else can fail.
//! Release removes local key material as soon as the session ends, then
//! walks the provider-side resources in reverse creation order so
//! dependent resources go first, and never aborts early: each failure is
//! logged and the sweep continues.

use std::time::Duration;

use camino::Utf8PathBuf;
use tracing::{debug, warn};

use crate::poll::{PollOutcome, poll};
use crate::provider::{Compute, ProviderError};

const TERMINATION_POLL_INTERVAL: Duration = Duration::from_secs(15);
const TERMINATION_POLL_ATTEMPTS: u32 = 20;

/// One provider-side resource owned by a build session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TrackedResource {
    /// Private key material written to the local filesystem.
    PrivateKeyFile(Utf8PathBuf),
    /// Single-use credential pair, by provider-side name.
    KeyPair(String),
    /// Build-host network policy, by identifier.
    SecurityGroup(String),
    /// Ephemeral build host, by instance identifier.
    Instance(String),
    /// Instance profile attached to the build host, by name.
    InstanceProfile(String),
}

/// Ordered ledger of resources to release when a session ends.
#[derive(Debug)]
pub struct ResourceRegistry {
    region: String,
    resources: Vec<TrackedResource>,
    termination_interval: Duration,
    termination_attempts: u32,
}

impl ResourceRegistry {
    /// Creates an empty registry scoped to one region.
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            resources: Vec::new(),
            termination_interval: TERMINATION_POLL_INTERVAL,
            termination_attempts: TERMINATION_POLL_ATTEMPTS,
        }
    }

    /// Overrides the termination poll cadence.
    #[must_use]
    pub fn with_termination_poll(mut self, interval: Duration, attempts: u32) -> Self {
        self.termination_interval = interval;
        self.termination_attempts = attempts;
        self
    }

    /// Records a freshly created resource.
    pub fn register(&mut self, resource: TrackedResource) {
        debug!(?resource, "tracking build resource");
        self.resources.push(resource);
    }

    /// Returns `true` when nothing remains to release.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Releases every tracked resource, local key material first, then the
    /// provider-side resources in reverse creation order.
    ///
    /// Failures are logged and skipped so one stuck resource cannot strand
    /// the rest. Returns the number of resources that failed to release.
    pub async fn release_all(&mut self, compute: &impl Compute) -> usize {
        let mut failures = 0;
        let mut provider_resources = Vec::new();
        while let Some(resource) = self.resources.pop() {
            if matches!(resource, TrackedResource::PrivateKeyFile(_)) {
                if !self.release_one(compute, &resource).await {
                    failures += 1;
                }
            } else {
                provider_resources.push(resource);
            }
        }
        for resource in provider_resources {
            if !self.release_one(compute, &resource).await {
                failures += 1;
            }
        }
        failures
    }

    async fn release_one(&self, compute: &impl Compute, resource: &TrackedResource) -> bool {
        match resource {
            TrackedResource::PrivateKeyFile(path) => match std::fs::remove_file(path) {
                Ok(()) => true,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
                Err(err) => {
                    warn!(%path, error = %err, "failed to remove private key file");
                    false
                }
            },
            TrackedResource::KeyPair(name) => {
                if let Err(err) = compute.delete_key_pair(name, &self.region) {
                    warn!(key_pair = %name, error = %err, "failed to delete key pair");
                    return false;
                }
                true
            }
            TrackedResource::SecurityGroup(group_id) => {
                if let Err(err) = compute.delete_security_group(group_id, &self.region) {
                    warn!(group = %group_id, error = %err, "failed to delete security group");
                    return false;
                }
                true
            }
            TrackedResource::Instance(instance_id) => {
                self.terminate_and_wait(compute, instance_id).await
            }
            TrackedResource::InstanceProfile(name) => {
                // No create path exists yet; flag the leak for the operator.
                warn!(profile = %name, "instance profile release is manual");
                false
            }
        }
    }

    /// Terminates an instance and waits until the provider reports it gone.
    ///
    /// Waiting matters because the network policy cannot be deleted while
    /// the instance still holds a reference to it.
    async fn terminate_and_wait(&self, compute: &impl Compute, instance_id: &str) -> bool {
        if let Err(err) = compute.terminate_instance(instance_id, &self.region) {
            warn!(instance = %instance_id, error = %err, "failed to terminate instance");
            return false;
        }

        let waited = poll::<_, ProviderError, _, _>(
            self.termination_interval,
            self.termination_attempts,
            || {
                let described = compute.describe_instance(instance_id, &self.region);
                async move {
                    match described? {
                        None => Ok(Some(())),
                        Some(description) if description.state == "terminated" => Ok(Some(())),
                        Some(_) => Ok(None),
                    }
                }
            },
        )
        .await;

        match waited {
            Ok(PollOutcome::Ready { .. }) => true,
            Ok(PollOutcome::TimedOut { attempts }) => {
                warn!(instance = %instance_id, attempts, "instance did not reach terminated state");
                false
            }
            Err(err) => {
                warn!(instance = %instance_id, error = %err, "failed to observe instance termination");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::aws::{AwsCli, AwsCompute};
    use crate::test_support::ScriptedRunner;
    use rstest::rstest;

    fn registry() -> ResourceRegistry {
        ResourceRegistry::new("eu-west-2").with_termination_poll(Duration::from_millis(1), 3)
    }

    fn compute(runner: ScriptedRunner) -> AwsCompute<ScriptedRunner> {
        AwsCompute::new(AwsCli::new("aws", runner))
    }

    fn terminated_json() -> &'static str {
        r#"{"Reservations":[{"Instances":[{"State":{"Name":"terminated"}}]}]}"#
    }

    #[rstest]
    #[tokio::test]
    async fn releases_in_reverse_creation_order() {
        let runner = ScriptedRunner::new();
        runner.push_success(); // terminate-instances
        runner.push_output(Some(0), terminated_json(), "");
        runner.push_success(); // delete-security-group
        runner.push_success(); // delete-key-pair

        let dir = tempfile::tempdir().expect("tempdir");
        let key_path = Utf8PathBuf::from_path_buf(dir.path().join("session.pem"))
            .expect("utf-8 temp path");
        std::fs::write(&key_path, "material").expect("write key");

        let mut registry = registry();
        registry.register(TrackedResource::KeyPair(String::from("skylift-abc")));
        registry.register(TrackedResource::PrivateKeyFile(key_path.clone()));
        registry.register(TrackedResource::SecurityGroup(String::from("sg-1")));
        registry.register(TrackedResource::Instance(String::from("i-1")));

        let failures = registry.release_all(&compute(runner.clone())).await;
        assert_eq!(failures, 0);
        assert!(registry.is_empty());
        assert!(!key_path.as_std_path().exists(), "key file must be removed");

        let calls: Vec<_> = runner
            .invocations()
            .iter()
            .map(crate::test_support::CommandInvocation::command_string)
            .collect();
        assert!(calls[0].contains("terminate-instances"), "calls: {calls:?}");
        assert!(calls[2].contains("delete-security-group"), "calls: {calls:?}");
        assert!(calls[3].contains("delete-key-pair"), "calls: {calls:?}");
    }

    #[rstest]
    #[tokio::test]
    async fn one_stuck_resource_does_not_strand_the_rest() {
        let runner = ScriptedRunner::new();
        runner.push_success(); // terminate-instances
        runner.push_output(Some(0), terminated_json(), "");
        runner.push_output(Some(254), "", "DependencyViolation"); // delete-security-group
        runner.push_success(); // delete-key-pair

        let mut registry = registry();
        registry.register(TrackedResource::KeyPair(String::from("skylift-abc")));
        registry.register(TrackedResource::SecurityGroup(String::from("sg-1")));
        registry.register(TrackedResource::Instance(String::from("i-1")));

        let failures = registry.release_all(&compute(runner.clone())).await;
        assert_eq!(failures, 1);
        assert!(registry.is_empty());
        assert_eq!(runner.invocations().len(), 4, "key pair delete must still run");
    }

    #[rstest]
    #[tokio::test]
    async fn termination_wait_gives_up_after_bounded_attempts() {
        let runner = ScriptedRunner::new();
        runner.push_success(); // terminate-instances
        let running = r#"{"Reservations":[{"Instances":[{"State":{"Name":"shutting-down"}}]}]}"#;
        runner.push_output(Some(0), running, "");
        runner.push_output(Some(0), running, "");
        runner.push_output(Some(0), running, "");

        let mut registry = registry();
        registry.register(TrackedResource::Instance(String::from("i-1")));

        let failures = registry.release_all(&compute(runner)).await;
        assert_eq!(failures, 1);
        assert!(registry.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn key_material_is_removed_even_when_every_provider_release_fails() {
        // No scripted responses: every provider call errors immediately.
        let runner = ScriptedRunner::new();

        let dir = tempfile::tempdir().expect("tempdir");
        let key_path = Utf8PathBuf::from_path_buf(dir.path().join("session.pem"))
            .expect("utf-8 temp path");
        std::fs::write(&key_path, "material").expect("write key");

        let mut registry = registry();
        registry.register(TrackedResource::KeyPair(String::from("skylift-abc")));
        registry.register(TrackedResource::PrivateKeyFile(key_path.clone()));
        registry.register(TrackedResource::SecurityGroup(String::from("sg-1")));
        registry.register(TrackedResource::Instance(String::from("i-1")));

        let failures = registry.release_all(&compute(runner)).await;
        assert_eq!(failures, 3, "all three provider releases fail");
        assert!(registry.is_empty());
        assert!(!key_path.as_std_path().exists(), "key file goes regardless");
    }

    #[rstest]
    #[tokio::test]
    async fn missing_private_key_file_is_not_a_failure() {
        let runner = ScriptedRunner::new();
        let mut registry = registry();
        registry.register(TrackedResource::PrivateKeyFile(Utf8PathBuf::from(
            "/nonexistent/session.pem",
        )));
        let failures = registry.release_all(&compute(runner)).await;
        assert_eq!(failures, 0);
    }
}
