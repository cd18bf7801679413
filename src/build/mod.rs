//! The image build pipeline.
//!
//! A [`BuildSession`] provisions an ephemeral build host, configures it,
//! stages the application bundle, sanitises the host, and snapshots it into
//! a named machine image. Whatever happens, every resource the session
//! created is released before [`BuildSession::execute`] returns: teardown
//! runs on success, on every stage failure, and on operator interruption.

mod configure;
mod image;
mod package;
mod provision;


use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::OrgConfig;
use crate::exec::CommandRunner;
use crate::provider::{Compute, ProviderError};
use crate::registry::ResourceRegistry;
use crate::remote::{RemoteError, RemoteSession, StepFailure};

const INSTANCE_POLL: (Duration, u32) = (Duration::from_secs(15), 20);
const IMAGE_POLL: (Duration, u32) = (Duration::from_secs(30), 120);
const SETTLE_WAIT: Duration = Duration::from_secs(60);

/// What to bake: the bundle on disk and the name the image registers under.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BakeRequest {
    /// Application the bundle belongs to.
    pub app_name: String,
    /// Name the finished image registers under.
    pub image_name: String,
    /// Local path of the packaged application bundle.
    pub bundle_path: Utf8PathBuf,
}

/// A finished, available machine image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BakedImage {
    /// Provider identifier of the image.
    pub image_id: String,
    /// Name the image was registered under.
    pub image_name: String,
}

/// Errors raised by the build pipeline.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Raised when the build host cannot be provisioned.
    #[error("provisioning failed: {message}")]
    Provisioning {
        /// Description of what went wrong.
        message: String,
    },
    /// Raised when a host setup step exits non-zero.
    #[error("setup step '{step}' failed with exit code {exit_code}: {stderr}")]
    Configuration {
        /// Description of the failing step.
        step: String,
        /// Exit code the step returned.
        exit_code: i32,
        /// Stderr captured from the step.
        stderr: String,
    },
    /// Raised when stopping or imaging the host does not complete in time.
    #[error("imaging failed while {stage} (elapsed {elapsed:?})")]
    Imaging {
        /// Activity that was in progress.
        stage: String,
        /// Time spent in the imaging phase before giving up.
        elapsed: Duration,
    },
    /// Raised when the operator interrupts the build.
    #[error("build interrupted; releasing resources")]
    Interrupted,
    /// Raised by provider adapter failures.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Raised by remote session and transfer failures.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl From<StepFailure> for BuildError {
    fn from(failure: StepFailure) -> Self {
        Self::Configuration {
            step: failure.description,
            exit_code: failure.exit_code,
            stderr: failure.stderr,
        }
    }
}

/// One end-to-end image build, with guaranteed resource teardown.
pub struct BuildSession<'a, C: Compute, R: CommandRunner + Clone> {
    config: &'a OrgConfig,
    compute: &'a C,
    runner: R,
    region: String,
    key_dir: Utf8PathBuf,
    instance_poll: (Duration, u32),
    image_poll: (Duration, u32),
    settle_wait: Duration,
}

impl<'a, C: Compute, R: CommandRunner + Clone> BuildSession<'a, C, R> {
    /// Creates a session that builds in `region` and keeps private key
    /// material under `key_dir` for its own lifetime.
    pub fn new(
        config: &'a OrgConfig,
        compute: &'a C,
        runner: R,
        region: impl Into<String>,
        key_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            config,
            compute,
            runner,
            region: region.into(),
            key_dir: key_dir.into(),
            instance_poll: INSTANCE_POLL,
            image_poll: IMAGE_POLL,
            settle_wait: SETTLE_WAIT,
        }
    }

    /// Overrides the instance state poll cadence.
    #[must_use]
    pub fn with_instance_poll(mut self, interval: Duration, attempts: u32) -> Self {
        self.instance_poll = (interval, attempts);
        self
    }

    /// Overrides the image availability poll cadence.
    #[must_use]
    pub fn with_image_poll(mut self, interval: Duration, attempts: u32) -> Self {
        self.image_poll = (interval, attempts);
        self
    }

    /// Overrides the post-boot settle wait.
    #[must_use]
    pub fn with_settle_wait(mut self, wait: Duration) -> Self {
        self.settle_wait = wait;
        self
    }

    /// Runs the whole pipeline and releases every created resource before
    /// returning, whether the build succeeded, failed, or was interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] describing the first stage that failed.
    pub async fn execute(&self, request: &BakeRequest) -> Result<BakedImage, BuildError> {
        let mut registry = ResourceRegistry::new(&self.region);
        info!(app = %request.app_name, image = %request.image_name, "starting image build");

        let outcome = tokio::select! {
            result = self.run_stages(request, &mut registry) => result,
            _ = tokio::signal::ctrl_c() => Err(BuildError::Interrupted),
        };

        let failures = registry.release_all(self.compute).await;
        if failures > 0 {
            warn!(failures, "some build resources could not be released");
        }

        match &outcome {
            Ok(baked) => info!(image = %baked.image_id, "image build complete"),
            Err(err) => warn!(error = %err, "image build failed"),
        }
        outcome
    }

    async fn run_stages(
        &self,
        request: &BakeRequest,
        registry: &mut ResourceRegistry,
    ) -> Result<BakedImage, BuildError> {
        let host = provision::provision(
            self.config,
            self.compute,
            &self.region,
            &self.key_dir,
            self.instance_poll,
            self.settle_wait,
            registry,
        )
        .await?;

        let session = RemoteSession::new(
            self.config.ssh_bin.clone(),
            self.config.scp_bin.clone(),
            host.target.clone(),
            self.runner.clone(),
        );

        configure::configure(&session, self.config)?;
        package::stage_bundle(&session, &request.bundle_path, self.config)?;
        image::sanitize(&session, &self.config.ssh_user)?;

        let image_id = image::bake(
            self.compute,
            &self.region,
            &host.instance_id,
            &request.image_name,
            self.instance_poll,
            self.image_poll,
        )
        .await?;

        Ok(BakedImage {
            image_id,
            image_name: request.image_name.clone(),
        })
    }
}

/// Resolves a directory for session key material, preferring the system
/// temporary directory.
#[must_use]
pub fn default_key_dir() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}
