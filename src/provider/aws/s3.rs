//! Artifact-store adapter over the provider's object store.

use std::ffi::OsString;

use camino::Utf8Path;

use super::{AwsCli, failure_names, os_args};
use crate::exec::CommandRunner;
use crate::provider::{ArtifactStore, ProviderError};

const MISSING_OBJECT_MARKERS: &[&str] = &["Not Found", "NoSuchKey", "404"];

/// Composes the public template URL the stack service fetches from.
#[must_use]
pub fn template_url(org_region: &str, bucket: &str, key: &str) -> String {
    format!("https://s3.{org_region}.amazonaws.com/{bucket}/{key}")
}

/// Artifact store backed by one bucket in the org home region.
#[derive(Clone, Debug)]
pub struct AwsArtifacts<R: CommandRunner> {
    cli: AwsCli<R>,
    bucket: String,
    org_region: String,
}

impl<R: CommandRunner> AwsArtifacts<R> {
    /// Creates the adapter scoped to the organisation bucket.
    pub fn new(cli: AwsCli<R>, bucket: impl Into<String>, org_region: impl Into<String>) -> Self {
        Self {
            cli,
            bucket: bucket.into(),
            org_region: org_region.into(),
        }
    }
}

impl<R: CommandRunner> ArtifactStore for AwsArtifacts<R> {
    fn upload(&self, key: &str, local_path: &Utf8Path) -> Result<(), ProviderError> {
        let mut args = os_args(&[
            "s3api",
            "put-object",
            "--bucket",
            &self.bucket,
            "--key",
            key,
            "--body",
        ]);
        args.push(OsString::from(local_path.as_str()));
        self.cli.run_discarding(&self.org_region, &args)
    }

    fn exists(&self, key: &str) -> Result<bool, ProviderError> {
        let args = os_args(&[
            "s3api",
            "head-object",
            "--bucket",
            &self.bucket,
            "--key",
            key,
        ]);
        match self.cli.run_discarding(&self.org_region, &args) {
            Ok(()) => Ok(true),
            Err(err) if failure_names(&err, MISSING_OBJECT_MARKERS) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn copy(&self, source_key: &str, dest_key: &str) -> Result<(), ProviderError> {
        let source = format!("{}/{source_key}", self.bucket);
        let args = os_args(&[
            "s3api",
            "copy-object",
            "--bucket",
            &self.bucket,
            "--copy-source",
            &source,
            "--key",
            dest_key,
        ]);
        self.cli.run_discarding(&self.org_region, &args)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, ProviderError> {
        let uri = format!("s3://{}/{key}", self.bucket);
        let args = os_args(&["s3", "cp", &uri, "-"]);
        let output = self.cli.run(&self.org_region, &args)?;
        Ok(output.stdout.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use rstest::rstest;

    fn artifacts(runner: ScriptedRunner) -> AwsArtifacts<ScriptedRunner> {
        AwsArtifacts::new(AwsCli::new("aws", runner), "org-infra", "us-east-1")
    }

    #[rstest]
    fn template_url_is_region_and_bucket_scoped() {
        assert_eq!(
            template_url("us-east-1", "org-infra", "apps/demo/2.1/stack.yaml"),
            "https://s3.us-east-1.amazonaws.com/org-infra/apps/demo/2.1/stack.yaml"
        );
    }

    #[rstest]
    fn exists_maps_head_failure_to_false() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(254), "", "An error occurred (404): Not Found");
        assert_eq!(
            artifacts(runner).exists("apps/demo/2.1/stack.yaml"),
            Ok(false)
        );
    }

    #[rstest]
    fn get_streams_object_bytes_from_stdout() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "template body", "");
        let bytes = artifacts(runner.clone())
            .get("apps/demo/2.1/stack.yaml")
            .expect("get should succeed");
        assert_eq!(bytes, b"template body");
        let call = runner.invocations().remove(0).command_string();
        assert!(
            call.contains("s3 cp s3://org-infra/apps/demo/2.1/stack.yaml -"),
            "call: {call}"
        );
    }

    #[rstest]
    fn copy_uses_bucket_scoped_source() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        artifacts(runner.clone())
            .copy("stacks/default.yaml", "apps/demo/2.1/stack.yaml")
            .expect("copy should succeed");
        let call = runner.invocations().remove(0).command_string();
        assert!(
            call.contains("--copy-source org-infra/stacks/default.yaml"),
            "call: {call}"
        );
    }
}
