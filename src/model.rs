//! Persistent records for applications, versions, and deployed instances.
//!
//! The metadata store holds one whole [`AppRecord`] per application, read,
//! mutated in memory, and written back as a unit. There is no internal
//! mutual exclusion between concurrent operators; at most one writer per
//! application at a time is an operational invariant, not an enforced one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stack input parameter receiving the resolved image identifier.
pub const IMAGE_ID_PARAMETER: &str = "ImageId";

/// Stack input parameter receiving the composed `version.build` string.
pub const APP_VERSION_PARAMETER: &str = "AppVersion";

/// Whole-application record, the unit of metadata-store reads and writes.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AppRecord {
    /// Application name as registered.
    pub name: String,
    /// Artifact-store key of the app's default stack template.
    pub stack_key: String,
    /// Released versions keyed by `major.minor` string.
    #[serde(default)]
    pub versions: BTreeMap<String, VersionRecord>,
    /// Deployment targets of this application.
    #[serde(default)]
    pub instances: Vec<InstanceRecord>,
}

impl AppRecord {
    /// Finds an instance by domain, case-insensitively.
    #[must_use]
    pub fn instance(&self, domain: &str) -> Option<&InstanceRecord> {
        self.instances
            .iter()
            .find(|ins| ins.domain.eq_ignore_ascii_case(domain))
    }

    /// Mutable variant of [`AppRecord::instance`].
    pub fn instance_mut(&mut self, domain: &str) -> Option<&mut InstanceRecord> {
        self.instances
            .iter_mut()
            .find(|ins| ins.domain.eq_ignore_ascii_case(domain))
    }
}

/// One release of an application: a baked image plus its stack template.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VersionRecord {
    /// Name of the image baked for the current build of this version.
    pub image_name: String,
    /// Provider identifier of that image in the organisation's home region.
    pub image_id: String,
    /// Artifact-store key of this version's stack template.
    pub stack_key: String,
    /// Fully qualified URL the stack service fetches the template from.
    pub stack_url: String,
    /// Monotonically increasing build counter for this version.
    pub current_build: u32,
    /// When this version record was last written.
    pub updated: DateTime<Utc>,
}

/// A named deployment target running one version behind its own stack.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InstanceRecord {
    /// Domain the instance serves.
    pub domain: String,
    /// Region the instance's stack lives in.
    pub region: String,
    /// Name of the instance's infrastructure stack.
    pub stack_name: String,
    /// Version string currently intended for this instance.
    #[serde(default)]
    pub version: String,
    /// Build number currently intended for this instance.
    #[serde(default)]
    pub build: u32,
    /// Name of the image this instance currently references.
    #[serde(default)]
    pub image_name: String,
    /// Full set of stack input parameters for this instance.
    #[serde(default)]
    pub stack_parameters: BTreeMap<String, String>,
    /// When this instance was last (intended to be) deployed.
    #[serde(default)]
    pub last_deployed: Option<DateTime<Utc>>,
}

/// Raised when a version string fails the `major.minor` format gate.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid version '{version}': use major.minor without leading zeros")]
pub struct VersionFormatError {
    /// The rejected version string.
    pub version: String,
}

/// Validates a `major.minor` version string.
///
/// Both components must be non-empty and numeric, and neither may carry a
/// leading zero. The gate runs before any upload, replication, or stack
/// call is made.
///
/// # Errors
///
/// Returns [`VersionFormatError`] when the string does not conform.
pub fn validate_version(version: &str) -> Result<(), VersionFormatError> {
    let reject = || VersionFormatError {
        version: version.to_owned(),
    };

    let (major, minor) = version.split_once('.').ok_or_else(reject)?;
    for component in [major, minor] {
        if component.is_empty() || !component.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(reject());
        }
        if component.len() > 1 && component.starts_with('0') {
            return Err(reject());
        }
    }
    if major.starts_with('0') {
        return Err(reject());
    }
    Ok(())
}

/// Composes the canonical image name for one build of a version.
#[must_use]
pub fn image_name(app: &str, version: &str, build: u32) -> String {
    format!("{}-v{version}.{build}", app.to_lowercase())
}

/// Prefix matching every image baked for one version of an app.
///
/// Ends with the build-number separator: `2.1` must not match `2.10`
/// builds.
#[must_use]
pub fn version_image_prefix(app: &str, version: &str) -> String {
    format!("{}-v{version}.", app.to_lowercase())
}

/// Composes the `version.build` string recorded on instances and stacks.
#[must_use]
pub fn composed_version(version: &str, build: u32) -> String {
    format!("{version}.{build}")
}

/// Artifact-store key of a version's application bundle.
#[must_use]
pub fn bundle_key(app: &str, version: &str) -> String {
    format!("apps/{}/{version}/app.zip", app.to_lowercase())
}

/// Artifact-store key of a version's stack template.
#[must_use]
pub fn template_key(app: &str, version: &str) -> String {
    format!("apps/{}/{version}/stack.yaml", app.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("2.1")]
    #[case("1.0")]
    #[case("10.42")]
    #[case("3.0")]
    fn version_gate_accepts_major_minor(#[case] version: &str) {
        assert_eq!(validate_version(version), Ok(()));
    }

    #[rstest]
    #[case::no_dot("21")]
    #[case::empty("")]
    #[case::empty_minor("2.")]
    #[case::empty_major(".1")]
    #[case::leading_zero_major("02.1")]
    #[case::zero_major("0.1")]
    #[case::leading_zero_minor("2.01")]
    #[case::patch_component("2.1.3")]
    #[case::alpha("2.x")]
    #[case::negative("-2.1")]
    fn version_gate_rejects_malformed_strings(#[case] version: &str) {
        let err = validate_version(version).expect_err("should reject");
        assert_eq!(err.version, version);
    }

    #[rstest]
    fn image_names_compose_from_app_version_and_build() {
        assert_eq!(image_name("Demo", "2.1", 3), "demo-v2.1.3");
        assert_eq!(version_image_prefix("Demo", "2.1"), "demo-v2.1.");
        assert_eq!(composed_version("2.1", 3), "2.1.3");
    }

    #[rstest]
    fn version_image_prefix_does_not_match_longer_versions() {
        let prefix = version_image_prefix("Demo", "2.1");
        assert!(image_name("Demo", "2.1", 7).starts_with(&prefix));
        assert!(!image_name("Demo", "2.10", 1).starts_with(&prefix));
    }

    #[rstest]
    fn artifact_keys_are_version_scoped() {
        assert_eq!(bundle_key("Demo", "2.1"), "apps/demo/2.1/app.zip");
        assert_eq!(template_key("Demo", "2.1"), "apps/demo/2.1/stack.yaml");
    }

    #[rstest]
    fn instance_lookup_ignores_case() {
        let record = AppRecord {
            name: String::from("demo"),
            stack_key: String::from("stacks/default.yaml"),
            versions: BTreeMap::new(),
            instances: vec![InstanceRecord {
                domain: String::from("App.Example.Com"),
                region: String::from("us-east-1"),
                stack_name: String::from("demo-app"),
                version: String::new(),
                build: 0,
                image_name: String::new(),
                stack_parameters: BTreeMap::new(),
                last_deployed: None,
            }],
        };

        assert!(record.instance("app.example.com").is_some());
        assert!(record.instance("other.example.com").is_none());
    }

    #[rstest]
    fn app_record_round_trips_through_json() {
        let record = AppRecord {
            name: String::from("demo"),
            stack_key: String::from("stacks/default.yaml"),
            versions: BTreeMap::new(),
            instances: Vec::new(),
        };
        let json = serde_json::to_string(&record).expect("serialise");
        let back: AppRecord = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(back, record);
    }
}
