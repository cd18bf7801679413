//! The launch pipeline: placing a built version onto a deployed instance.
//!
//! A launch resolves the app, instance, and version from the metadata
//! store, makes the version's image available in the instance's region
//! (copying across regions when needed), records the intended state before
//! touching any infrastructure, and then creates or updates the instance's
//! stack. Superseded images are pruned afterwards.

mod prune;
pub mod status;


use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

pub use status::StackHealth;

use crate::config::OrgConfig;
use crate::model::{
    APP_VERSION_PARAMETER, IMAGE_ID_PARAMETER, composed_version, version_image_prefix,
};
use crate::poll::poll;
use crate::provider::{Compute, MetadataStore, ProviderError, Stacks};

const REPLICA_POLL: (Duration, u32) = (Duration::from_secs(30), 15);

/// What to launch and where.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchRequest {
    /// Application being deployed.
    pub app_name: String,
    /// Domain of the deployed instance to update.
    pub domain: String,
    /// Version to place on the instance, as `major.minor`.
    pub version: String,
    /// When set, the prune pass may remove the version's current build
    /// image as well.
    pub force_prune: bool,
}

/// How a launch concluded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LaunchOutcome {
    /// A new stack was created for the instance.
    Created {
        /// Identifier of the created stack.
        stack_id: String,
    },
    /// The instance's existing stack was updated in place.
    Updated {
        /// Identifier of the updated stack.
        stack_id: String,
    },
    /// The stack was left untouched because it is not in a mutable state.
    Skipped {
        /// Why the stack could not be mutated.
        health: StackHealth,
    },
}

/// Errors raised by the launch pipeline.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Raised when no metadata record exists for the application.
    #[error("no application named {0} is registered")]
    UnknownApp(String),
    /// Raised when the application has no instance with the given domain.
    #[error("application {app} has no instance {domain}")]
    UnknownInstance {
        /// Application that was looked up.
        app: String,
        /// Domain that was not found.
        domain: String,
    },
    /// Raised when the application has no record of the given version.
    #[error("application {app} has no built version {version}")]
    UnknownVersion {
        /// Application that was looked up.
        app: String,
        /// Version that was not found.
        version: String,
    },
    /// Raised when a cross-region image copy does not finish in time.
    /// The stack is left untouched.
    #[error("image {image} did not become available in {region} after {attempts} checks")]
    ReplicationTimeout {
        /// Image being replicated.
        image: String,
        /// Region the replica was destined for.
        region: String,
        /// Number of availability checks performed.
        attempts: u32,
    },
    /// Raised by provider adapter failures.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Coordinates launches against one organisation's metadata and regions.
pub struct DeploymentCoordinator<'a, C: Compute, S: Stacks, M: MetadataStore> {
    config: &'a OrgConfig,
    compute: &'a C,
    stacks: &'a S,
    metadata: &'a M,
    replica_poll: (Duration, u32),
}

impl<'a, C: Compute, S: Stacks, M: MetadataStore> DeploymentCoordinator<'a, C, S, M> {
    /// Creates a coordinator over the given provider seams.
    pub const fn new(config: &'a OrgConfig, compute: &'a C, stacks: &'a S, metadata: &'a M) -> Self {
        Self {
            config,
            compute,
            stacks,
            metadata,
            replica_poll: REPLICA_POLL,
        }
    }

    /// Overrides the replica availability poll cadence.
    #[must_use]
    pub fn with_replica_poll(mut self, interval: Duration, attempts: u32) -> Self {
        self.replica_poll = (interval, attempts);
        self
    }

    /// Places `request.version` onto the named instance.
    ///
    /// The intended state is persisted to the metadata store before any
    /// stack mutation, so a failed apply can be retried from the record.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when the app, instance, or version is
    /// unknown, when image replication times out, or when a provider call
    /// fails.
    pub async fn launch(&self, request: &LaunchRequest) -> Result<LaunchOutcome, LaunchError> {
        let mut record = self
            .metadata
            .get_app(&request.app_name)?
            .ok_or_else(|| LaunchError::UnknownApp(request.app_name.clone()))?;
        let version = record
            .versions
            .get(&request.version)
            .cloned()
            .ok_or_else(|| LaunchError::UnknownVersion {
                app: request.app_name.clone(),
                version: request.version.clone(),
            })?;
        let instance = record
            .instance(&request.domain)
            .cloned()
            .ok_or_else(|| LaunchError::UnknownInstance {
                app: request.app_name.clone(),
                domain: request.domain.clone(),
            })?;
        let region = instance.region.clone();
        info!(
            app = %request.app_name,
            instance = %request.domain,
            version = %request.version,
            build = version.current_build,
            %region,
            "launching version"
        );

        // Resolve the image in the launch region, starting a copy from the
        // org home region when no local replica exists yet.
        let (image_id, already_available) =
            match self.compute.find_image(&version.image_name, &region)? {
                Some(image) if image.is_available() => (image.id, true),
                Some(image) => (image.id, false),
                None => {
                    let replica_id = self.compute.copy_image(
                        &version.image_name,
                        &version.image_id,
                        &self.config.org_region,
                        &region,
                    )?;
                    info!(image = %version.image_name, replica = %replica_id, %region, "replicating image");
                    (replica_id, false)
                }
            };

        let mut parameters = instance.stack_parameters.clone();
        parameters.insert(IMAGE_ID_PARAMETER.to_owned(), image_id.clone());
        parameters.insert(
            APP_VERSION_PARAMETER.to_owned(),
            composed_version(&request.version, version.current_build),
        );

        // The record states the intent before any stack call happens, so an
        // interrupted apply can be diagnosed and retried from metadata.
        {
            let entry = record.instance_mut(&request.domain).ok_or_else(|| {
                LaunchError::UnknownInstance {
                    app: request.app_name.clone(),
                    domain: request.domain.clone(),
                }
            })?;
            entry.version = request.version.clone();
            entry.build = version.current_build;
            entry.image_name = version.image_name.clone();
            entry.stack_parameters = parameters.clone();
            entry.last_deployed = Some(Utc::now());
        }
        self.metadata.put_app(&record)?;

        if !already_available {
            self.await_replica(&image_id, &region).await?;
        }

        let outcome = self
            .apply_stack(request, &instance.stack_name, &version.stack_url, &parameters, &region)?;

        if matches!(
            outcome,
            LaunchOutcome::Created { .. } | LaunchOutcome::Updated { .. }
        ) {
            let prefix = version_image_prefix(&request.app_name, &request.version);
            let regions = [region.as_str(), self.config.org_region.as_str()];
            match prune::prune_images(
                self.compute,
                &record,
                &prefix,
                &version.image_name,
                &regions,
                request.force_prune,
            ) {
                Ok(removed) if removed > 0 => info!(removed, "pruned superseded images"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "image prune failed"),
            }
        }

        Ok(outcome)
    }

    async fn await_replica(&self, image_id: &str, region: &str) -> Result<(), LaunchError> {
        let (interval, attempts) = self.replica_poll;
        let outcome = poll::<_, ProviderError, _, _>(interval, attempts, || {
            let state = self.compute.image_state(image_id, region);
            async move {
                match state? {
                    Some(state) if state.eq_ignore_ascii_case("available") => Ok(Some(())),
                    _ => Ok(None),
                }
            }
        })
        .await?;
        if outcome.into_ready().is_none() {
            return Err(LaunchError::ReplicationTimeout {
                image: image_id.to_owned(),
                region: region.to_owned(),
                attempts,
            });
        }
        Ok(())
    }

    fn apply_stack(
        &self,
        request: &LaunchRequest,
        stack_name: &str,
        template_url: &str,
        parameters: &BTreeMap<String, String>,
        region: &str,
    ) -> Result<LaunchOutcome, LaunchError> {
        match self.stacks.describe_stack(stack_name, region)? {
            None => {
                let tags = BTreeMap::from([
                    (String::from("purpose"), String::from("app")),
                    (String::from("app"), request.app_name.clone()),
                    (String::from("instance"), request.domain.clone()),
                ]);
                let stack_id =
                    self.stacks
                        .create_stack(stack_name, template_url, parameters, &tags, region)?;
                info!(stack = %stack_name, %stack_id, "stack creation started");
                Ok(LaunchOutcome::Created { stack_id })
            }
            Some(description) => match StackHealth::classify(&description) {
                StackHealth::Pending => {
                    info!(stack = %stack_name, "stack creation still in progress; skipping");
                    Ok(LaunchOutcome::Skipped {
                        health: StackHealth::Pending,
                    })
                }
                StackHealth::Failed { reason } => {
                    warn!(stack = %stack_name, %reason, "stack needs operator attention; skipping");
                    Ok(LaunchOutcome::Skipped {
                        health: StackHealth::Failed { reason },
                    })
                }
                StackHealth::Stable => {
                    let stack_id =
                        self.stacks
                            .update_stack(stack_name, template_url, parameters, region)?;
                    info!(stack = %stack_name, %stack_id, "stack update started");
                    Ok(LaunchOutcome::Updated { stack_id })
                }
            },
        }
    }
}
