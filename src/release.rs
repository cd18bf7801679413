//! Releasing a new build of an application version.
//!
//! A release validates its inputs before anything is created, archives the
//! bundle and stack template in the artifact store, bakes the image on an
//! ephemeral build host, and finally records the new build in the app's
//! metadata. The build counter only advances when the whole release
//! succeeds, because the version record is written last.

use camino::Utf8PathBuf;
use chrono::Utc;
use thiserror::Error;
use tracing::info;

use crate::build::{BakeRequest, BuildError, BuildSession};
use crate::config::OrgConfig;
use crate::exec::CommandRunner;
use crate::model::{
    VersionFormatError, VersionRecord, bundle_key, image_name, template_key, validate_version,
};
use crate::provider::aws::template_url;
use crate::provider::{ArtifactStore, Compute, MetadataStore, ProviderError};

/// What to release: an application version and the bundle to bake into it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleaseRequest {
    /// Application being released.
    pub app_name: String,
    /// Version the build belongs to, as `major.minor`.
    pub version: String,
    /// Local path of the packaged application bundle.
    pub bundle_path: Utf8PathBuf,
    /// Version-specific stack template to upload alongside the bundle.
    /// When absent, the app's default template is used.
    pub template_path: Option<Utf8PathBuf>,
}

/// A completed release.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuiltVersion {
    /// Version string the build belongs to.
    pub version: String,
    /// Build number this release produced.
    pub build: u32,
    /// Provider identifier of the baked image.
    pub image_id: String,
    /// Name the image registered under.
    pub image_name: String,
}

/// Errors raised by the release pipeline.
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// Raised when the version string fails the format gate.
    #[error(transparent)]
    InvalidVersion(#[from] VersionFormatError),
    /// Raised when the bundle is not a `.zip` archive.
    #[error("bundle {0} must be a .zip archive")]
    BundleNotZip(Utf8PathBuf),
    /// Raised when the bundle does not exist on disk.
    #[error("bundle {0} does not exist")]
    BundleMissing(Utf8PathBuf),
    /// Raised when no metadata record exists for the application.
    #[error("no application named {0} is registered")]
    UnknownApp(String),
    /// Raised by provider adapter failures.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Raised when the image build itself fails.
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Builds and records a new image for `request.version`.
///
/// # Errors
///
/// Returns [`ReleaseError`] when validation fails, the app is unknown, or
/// any stage of the build fails. A failed build leaves the version record
/// untouched, so the next attempt reuses the same build number.
pub async fn build_image<C, M, A, R>(
    config: &OrgConfig,
    metadata: &M,
    artifacts: &A,
    session: &BuildSession<'_, C, R>,
    request: &ReleaseRequest,
) -> Result<BuiltVersion, ReleaseError>
where
    C: Compute,
    M: MetadataStore,
    A: ArtifactStore,
    R: CommandRunner + Clone,
{
    validate_version(&request.version)?;
    if request.bundle_path.extension() != Some("zip") {
        return Err(ReleaseError::BundleNotZip(request.bundle_path.clone()));
    }
    if !request.bundle_path.as_std_path().is_file() {
        return Err(ReleaseError::BundleMissing(request.bundle_path.clone()));
    }

    let mut record = metadata
        .get_app(&request.app_name)?
        .ok_or_else(|| ReleaseError::UnknownApp(request.app_name.clone()))?;

    let build = record
        .versions
        .get(&request.version)
        .map_or(1, |version| version.current_build + 1);
    let image = image_name(&request.app_name, &request.version, build);
    info!(
        app = %request.app_name,
        version = %request.version,
        build,
        image = %image,
        "starting release"
    );

    let bundle = bundle_key(&request.app_name, &request.version);
    artifacts.upload(&bundle, &request.bundle_path)?;

    let template = template_key(&request.app_name, &request.version);
    if let Some(template_path) = &request.template_path {
        artifacts.upload(&template, template_path)?;
    } else if !artifacts.exists(&template)? {
        // First build of this version without a bespoke template: seed it
        // from the app's default.
        artifacts.copy(&record.stack_key, &template)?;
    }

    let baked = session
        .execute(&BakeRequest {
            app_name: request.app_name.clone(),
            image_name: image.clone(),
            bundle_path: request.bundle_path.clone(),
        })
        .await?;

    record.versions.insert(
        request.version.clone(),
        VersionRecord {
            image_name: baked.image_name.clone(),
            image_id: baked.image_id.clone(),
            stack_key: template.clone(),
            stack_url: template_url(&config.org_region, &config.org_bucket, &template),
            current_build: build,
            updated: Utc::now(),
        },
    );
    metadata.put_app(&record)?;
    info!(image = %baked.image_id, build, "release recorded");

    Ok(BuiltVersion {
        version: request.version.clone(),
        build,
        image_id: baked.image_id,
        image_name: baked.image_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::aws::{AwsArtifacts, AwsCli, AwsCompute, AwsMetadata};
    use crate::test_support::ScriptedRunner;
    use rstest::rstest;
    use std::time::Duration;

    fn session<'a>(
        config: &'a OrgConfig,
        compute: &'a AwsCompute<ScriptedRunner>,
        runner: &ScriptedRunner,
        key_dir: &camino::Utf8Path,
    ) -> BuildSession<'a, AwsCompute<ScriptedRunner>, ScriptedRunner> {
        BuildSession::new(config, compute, runner.clone(), "us-east-1", key_dir)
            .with_instance_poll(Duration::from_millis(1), 2)
            .with_image_poll(Duration::from_millis(1), 2)
            .with_settle_wait(Duration::ZERO)
    }

    fn request(version: &str, bundle: &camino::Utf8Path) -> ReleaseRequest {
        ReleaseRequest {
            app_name: String::from("demo"),
            version: version.to_owned(),
            bundle_path: bundle.to_path_buf(),
            template_path: None,
        }
    }

    struct Fixture {
        runner: ScriptedRunner,
        config: OrgConfig,
        compute: AwsCompute<ScriptedRunner>,
        metadata: AwsMetadata<ScriptedRunner>,
        artifacts: AwsArtifacts<ScriptedRunner>,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let runner = ScriptedRunner::new();
            Self {
                config: crate::config::sample(),
                compute: AwsCompute::new(AwsCli::new("aws", runner.clone())),
                metadata: AwsMetadata::new(AwsCli::new("aws", runner.clone()), "us-east-1"),
                artifacts: AwsArtifacts::new(
                    AwsCli::new("aws", runner.clone()),
                    "org-infra",
                    "us-east-1",
                ),
                dir: tempfile::tempdir().expect("tempdir"),
                runner,
            }
        }

        fn bundle(&self) -> camino::Utf8PathBuf {
            let path = camino::Utf8PathBuf::from_path_buf(self.dir.path().join("demo.zip"))
                .expect("utf-8 temp path");
            std::fs::write(&path, b"bundle").expect("write bundle");
            path
        }

        fn key_dir(&self) -> camino::Utf8PathBuf {
            camino::Utf8PathBuf::from_path_buf(self.dir.path().to_path_buf())
                .expect("utf-8 temp path")
        }
    }

    #[rstest]
    #[case::missing_minor("2")]
    #[case::zero_major("0.1")]
    #[case::leading_zero_minor("2.01")]
    #[case::empty("")]
    #[tokio::test]
    async fn bad_versions_fail_before_any_provider_call(#[case] version: &str) {
        let fixture = Fixture::new();
        let bundle = fixture.bundle();
        let key_dir = fixture.key_dir();
        let session = session(&fixture.config, &fixture.compute, &fixture.runner, &key_dir);

        let err = build_image(
            &fixture.config,
            &fixture.metadata,
            &fixture.artifacts,
            &session,
            &request(version, &bundle),
        )
        .await
        .expect_err("version gate should reject");
        assert!(matches!(err, ReleaseError::InvalidVersion(_)), "got {err}");
        assert!(fixture.runner.invocations().is_empty(), "no commands may run");
    }

    #[rstest]
    #[tokio::test]
    async fn non_zip_bundle_is_rejected() {
        let fixture = Fixture::new();
        let key_dir = fixture.key_dir();
        let session = session(&fixture.config, &fixture.compute, &fixture.runner, &key_dir);

        let err = build_image(
            &fixture.config,
            &fixture.metadata,
            &fixture.artifacts,
            &session,
            &request("2.1", camino::Utf8Path::new("/work/demo.tar.gz")),
        )
        .await
        .expect_err("bundle type should be rejected");
        assert!(matches!(err, ReleaseError::BundleNotZip(_)), "got {err}");
        assert!(fixture.runner.invocations().is_empty());
    }

    fn app_record_response() -> String {
        let record = crate::model::AppRecord {
            name: String::from("demo"),
            stack_key: String::from("stacks/default.yaml"),
            versions: std::collections::BTreeMap::from([(
                String::from("2.1"),
                VersionRecord {
                    image_name: String::from("demo-v2.1.3"),
                    image_id: String::from("ami-213"),
                    stack_key: String::from("apps/demo/2.1/stack.yaml"),
                    stack_url: String::from(
                        "https://s3.us-east-1.amazonaws.com/org-infra/apps/demo/2.1/stack.yaml",
                    ),
                    current_build: 3,
                    updated: Utc::now(),
                },
            )]),
            instances: Vec::new(),
        };
        let value = serde_json::to_string(&record).expect("record serializes");
        serde_json::json!({"Parameter": {"Value": value}}).to_string()
    }

    #[rstest]
    #[tokio::test]
    async fn release_advances_the_build_counter_and_records_the_image() {
        let fixture = Fixture::new();
        let bundle = fixture.bundle();
        let key_dir = fixture.key_dir();

        fixture.runner.push_output(Some(0), app_record_response(), "");
        fixture.runner.push_success(); // bundle upload
        fixture.runner.push_success(); // template head-object: already present
        crate::test_support::build_script::push_full_build_script(&fixture.runner);
        fixture.runner.push_success(); // put-parameter

        let session = session(&fixture.config, &fixture.compute, &fixture.runner, &key_dir);
        let built = build_image(
            &fixture.config,
            &fixture.metadata,
            &fixture.artifacts,
            &session,
            &request("2.1", &bundle),
        )
        .await
        .expect("release should succeed");

        assert_eq!(built.build, 4, "build counter advances past the recorded build");
        assert_eq!(built.image_name, "demo-v2.1.4");
        assert_eq!(built.image_id, "ami-baked");

        let calls: Vec<String> = fixture
            .runner
            .invocations()
            .iter()
            .map(crate::test_support::CommandInvocation::command_string)
            .collect();
        let persisted = calls
            .iter()
            .find(|call| call.contains("put-parameter"))
            .expect("version record persisted");
        assert!(persisted.contains("\"current_build\":4"), "call: {persisted}");
        assert!(persisted.contains("demo-v2.1.4"), "call: {persisted}");
        let upload = calls
            .iter()
            .find(|call| call.contains("put-object"))
            .expect("bundle uploaded");
        assert!(upload.contains("apps/demo/2.1/app.zip"), "call: {upload}");
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_app_is_rejected_before_any_upload() {
        let fixture = Fixture::new();
        let bundle = fixture.bundle();
        let key_dir = fixture.key_dir();
        // Metadata lookup: parameter does not exist.
        fixture
            .runner
            .push_output(Some(254), "", "An error occurred (ParameterNotFound)");
        let session = session(&fixture.config, &fixture.compute, &fixture.runner, &key_dir);

        let err = build_image(
            &fixture.config,
            &fixture.metadata,
            &fixture.artifacts,
            &session,
            &request("2.1", &bundle),
        )
        .await
        .expect_err("unknown app should fail");
        assert!(matches!(err, ReleaseError::UnknownApp(_)), "got {err}");
        assert_eq!(fixture.runner.invocations().len(), 1, "only the lookup ran");
    }
}
