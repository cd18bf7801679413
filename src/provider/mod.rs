//! Cloud provider seams consumed by the build and launch pipelines.
//!
//! Four narrow traits cover the external collaborators: [`Compute`] for
//! images and instances, [`Stacks`] for the infrastructure-stack service,
//! [`MetadataStore`] for whole-record application metadata, and
//! [`ArtifactStore`] for bundles and templates. The production adapters in
//! [`aws`] drive the provider CLI; tests substitute in-memory fakes.

pub mod aws;

use std::collections::BTreeMap;
use std::net::IpAddr;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::exec::ExecError;
use crate::model::AppRecord;

/// A machine image as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageSummary {
    /// Provider identifier.
    pub id: String,
    /// Human-readable name the image was registered under.
    pub name: String,
    /// Provider lifecycle state (for example `available` or `pending`).
    pub state: String,
    /// Registration time, when the provider reports one.
    pub created_at: Option<DateTime<Utc>>,
}

impl ImageSummary {
    /// Returns `true` when the image can boot instances independently.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state.eq_ignore_ascii_case("available")
    }
}

/// Observed run-state of a compute instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceDescription {
    /// Provider run-state string (`pending`, `running`, `stopped`, ...).
    pub state: String,
    /// Public address, once one is assigned.
    pub public_ip: Option<IpAddr>,
}

/// Parameters for booting one ephemeral build host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceLaunchSpec {
    /// Base image the host boots from.
    pub base_image_id: String,
    /// Commercial instance type.
    pub instance_type: String,
    /// Name of the single-use credential pair to attach.
    pub key_pair_name: String,
    /// Identifier of the locked-down network policy to attach.
    pub security_group_id: String,
    /// Value for the `Name` tag.
    pub name_tag: String,
    /// Root volume size in GiB.
    pub root_volume_gib: u32,
}

/// A freshly created single-use credential pair.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPairMaterial {
    /// Provider-side name of the pair.
    pub name: String,
    /// PEM-encoded private key, held locally for the session only.
    pub private_key: String,
}

/// An existing infrastructure stack's status snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackDescription {
    /// Provider identifier of the stack.
    pub stack_id: String,
    /// Raw provider status string.
    pub status: String,
    /// Provider-supplied reason accompanying failure states.
    pub status_reason: Option<String>,
}

/// One provisioned resource inside a stack.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackResource {
    /// Template-side logical identifier.
    pub logical_id: String,
    /// Provider-side physical identifier.
    pub physical_id: String,
    /// Provider resource type.
    pub resource_type: String,
}

/// Errors surfaced by provider adapters.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Raised when the provider CLI exits non-zero.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when CLI JSON output cannot be parsed.
    #[error("failed to parse {resource} output: {message}")]
    Parse {
        /// Resource type being parsed (for example `images`).
        resource: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when a required provider object cannot be found.
    #[error("no {what} found")]
    Missing {
        /// Description of the missing object.
        what: String,
    },
    /// Raised when command execution itself fails.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Compute operations: images, instances, credentials, network policies.
pub trait Compute {
    /// Looks an image up by exact name in a region.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the lookup fails.
    fn find_image(&self, name: &str, region: &str)
    -> Result<Option<ImageSummary>, ProviderError>;

    /// Lists images owned by the organisation whose names match a prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the listing fails.
    fn list_images(&self, name_prefix: &str, region: &str)
    -> Result<Vec<ImageSummary>, ProviderError>;

    /// Resolves the newest available vendor base image matching a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Missing`] when no image matches.
    fn latest_base_image(
        &self,
        name_pattern: &str,
        owner: &str,
        region: &str,
    ) -> Result<ImageSummary, ProviderError>;

    /// Starts a cross-region copy, returning the replica's identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the copy request fails.
    fn copy_image(
        &self,
        name: &str,
        source_image_id: &str,
        source_region: &str,
        dest_region: &str,
    ) -> Result<String, ProviderError>;

    /// Reports an image's lifecycle state, or `None` when it is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the lookup fails.
    fn image_state(&self, image_id: &str, region: &str)
    -> Result<Option<String>, ProviderError>;

    /// Deregisters an image.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when deregistration fails.
    fn deregister_image(&self, image_id: &str, region: &str) -> Result<(), ProviderError>;

    /// Creates a single-use credential pair, returning its private material.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when creation fails.
    fn create_key_pair(&self, name: &str, region: &str)
    -> Result<KeyPairMaterial, ProviderError>;

    /// Deletes a credential pair.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when deletion fails.
    fn delete_key_pair(&self, name: &str, region: &str) -> Result<(), ProviderError>;

    /// Creates the build-host network policy: inbound remote-session access
    /// only, egress limited to secure transport, plaintext web, name
    /// resolution, and time sync.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when any policy call fails.
    fn create_security_group(
        &self,
        name: &str,
        description: &str,
        region: &str,
    ) -> Result<String, ProviderError>;

    /// Deletes a network policy.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when deletion fails.
    fn delete_security_group(&self, group_id: &str, region: &str) -> Result<(), ProviderError>;

    /// Boots one instance and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the boot request fails.
    fn run_instance(
        &self,
        spec: &InstanceLaunchSpec,
        region: &str,
    ) -> Result<String, ProviderError>;

    /// Describes an instance's run-state, or `None` when it is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the lookup fails.
    fn describe_instance(
        &self,
        instance_id: &str,
        region: &str,
    ) -> Result<Option<InstanceDescription>, ProviderError>;

    /// Requests an instance stop.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the request fails.
    fn stop_instance(&self, instance_id: &str, region: &str) -> Result<(), ProviderError>;

    /// Requests an instance termination.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the request fails.
    fn terminate_instance(&self, instance_id: &str, region: &str) -> Result<(), ProviderError>;

    /// Snapshots a stopped instance into an image without rebooting it.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the snapshot request fails.
    fn create_image(
        &self,
        instance_id: &str,
        name: &str,
        description: &str,
        region: &str,
    ) -> Result<String, ProviderError>;
}

/// Infrastructure-stack operations.
pub trait Stacks {
    /// Describes a stack, or returns `None` when no such stack exists.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the lookup fails for another reason.
    fn describe_stack(
        &self,
        stack_name: &str,
        region: &str,
    ) -> Result<Option<StackDescription>, ProviderError>;

    /// Creates a stack from a template URL with parameters and tags.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when creation fails.
    fn create_stack(
        &self,
        stack_name: &str,
        template_url: &str,
        parameters: &BTreeMap<String, String>,
        tags: &BTreeMap<String, String>,
        region: &str,
    ) -> Result<String, ProviderError>;

    /// Updates an existing stack from a template URL.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the update fails.
    fn update_stack(
        &self,
        stack_name: &str,
        template_url: &str,
        parameters: &BTreeMap<String, String>,
        region: &str,
    ) -> Result<String, ProviderError>;

    /// Deletes a stack.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when deletion fails.
    fn delete_stack(&self, stack_name: &str, region: &str) -> Result<(), ProviderError>;

    /// Lists a stack's provisioned resources with their physical ids.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the listing fails.
    fn stack_resources(
        &self,
        stack_name: &str,
        region: &str,
    ) -> Result<Vec<StackResource>, ProviderError>;
}

/// Whole-record application metadata store.
pub trait MetadataStore {
    /// Reads the record for an app, keyed by lower-cased name.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the read fails.
    fn get_app(&self, app_name: &str) -> Result<Option<AppRecord>, ProviderError>;

    /// Replaces the record for an app.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the write fails.
    fn put_app(&self, record: &AppRecord) -> Result<(), ProviderError>;
}

/// Artifact store for application bundles and stack templates.
pub trait ArtifactStore {
    /// Uploads a local file under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the upload fails.
    fn upload(&self, key: &str, local_path: &Utf8Path) -> Result<(), ProviderError>;

    /// Returns `true` when an object exists under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the check fails.
    fn exists(&self, key: &str) -> Result<bool, ProviderError>;

    /// Copies an object within the store.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the copy fails.
    fn copy(&self, source_key: &str, dest_key: &str) -> Result<(), ProviderError>;

    /// Fetches an object's bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the fetch fails.
    fn get(&self, key: &str) -> Result<Vec<u8>, ProviderError>;
}
