//! Organisation configuration loading via `ortho-config`.
//!
//! The original tooling carried the organisation's home region and artifact
//! bucket in process-wide environment variables; here they are an explicit
//! value loaded once and threaded through every call boundary.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Organisation-wide settings shared by the build and launch pipelines.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SKYLIFT")]
pub struct OrgConfig {
    /// Home region holding the metadata store and freshly baked images.
    pub org_region: String,
    /// Artifact bucket holding application bundles and stack templates.
    pub org_bucket: String,
    /// Path to the cloud provider CLI binary.
    #[ortho_config(default = "aws".to_owned())]
    pub aws_bin: String,
    /// Path to the `ssh` executable used for remote sessions.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable used for bundle transfer.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Remote user the build host accepts sessions for.
    #[ortho_config(default = "ec2-user".to_owned())]
    pub ssh_user: String,
    /// Instance type used for ephemeral build hosts.
    #[ortho_config(default = "m6a.large".to_owned())]
    pub builder_instance_type: String,
    /// Name pattern selecting the vendor base image the build host boots.
    #[ortho_config(default = "al2023-ami-*-x86_64".to_owned())]
    pub base_image_pattern: String,
    /// Owner alias the base image lookup is scoped to.
    #[ortho_config(default = "amazon".to_owned())]
    pub base_image_owner: String,
    /// Staging path the bundle is transferred to on the build host.
    #[ortho_config(default = "/tmp/app.zip".to_owned())]
    pub remote_staging_path: String,
    /// Directory the application is unpacked into on the build host.
    #[ortho_config(default = "/home/ec2-user/app".to_owned())]
    pub remote_app_dir: String,
}

/// Metadata for a configuration field, used to build actionable errors.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl OrgConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to skylift.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("skylift")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.org_region,
            &FieldMetadata {
                description: "organisation home region",
                env_var: "SKYLIFT_ORG_REGION",
                toml_key: "org_region",
            },
        )?;
        Self::require_field(
            &self.org_bucket,
            &FieldMetadata {
                description: "organisation artifact bucket",
                env_var: "SKYLIFT_ORG_BUCKET",
                toml_key: "org_bucket",
            },
        )?;
        Self::require_field(
            &self.builder_instance_type,
            &FieldMetadata {
                description: "builder instance type",
                env_var: "SKYLIFT_BUILDER_INSTANCE_TYPE",
                toml_key: "builder_instance_type",
            },
        )?;
        Self::require_field(
            &self.base_image_pattern,
            &FieldMetadata {
                description: "base image name pattern",
                env_var: "SKYLIFT_BASE_IMAGE_PATTERN",
                toml_key: "base_image_pattern",
            },
        )?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

/// Fully populated configuration used by unit tests across the crate.
#[cfg(test)]
pub(crate) fn sample() -> OrgConfig {
    OrgConfig {
        org_region: String::from("us-east-1"),
        org_bucket: String::from("org-infra"),
        aws_bin: String::from("aws"),
        ssh_bin: String::from("ssh"),
        scp_bin: String::from("scp"),
        ssh_user: String::from("ec2-user"),
        builder_instance_type: String::from("m6a.large"),
        base_image_pattern: String::from("al2023-ami-*-x86_64"),
        base_image_owner: String::from("amazon"),
        remote_staging_path: String::from("/tmp/app.zip"),
        remote_app_dir: String::from("/home/ec2-user/app"),
    }
}
