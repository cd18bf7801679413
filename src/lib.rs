//! Skylift bakes bootable machine images for application releases and
//! rolls them out to deployed instances across regions.
//!
//! The crate is split along its two pipelines. A release ([`build_image`])
//! provisions an ephemeral build host, configures it, stages the
//! application bundle, sanitises the host, and snapshots it into a named
//! image, releasing every created resource no matter how the build ends. A
//! launch ([`DeploymentCoordinator`]) places a built version onto one
//! deployed instance: it replicates the image into the instance's region
//! when needed, records the intended state before touching infrastructure,
//! and then creates or updates the instance's stack.
//!
//! All provider interaction goes through the narrow traits in [`provider`],
//! implemented over the provider CLI and substituted with fakes in tests.

pub mod build;
pub mod config;
pub mod deploy;
pub mod exec;
pub mod model;
pub mod poll;
pub mod provider;
pub mod registry;
pub mod release;
pub mod remote;
pub mod test_support;

pub use build::{BakeRequest, BakedImage, BuildError, BuildSession};
pub use config::{ConfigError, OrgConfig};
pub use deploy::{
    DeploymentCoordinator, LaunchError, LaunchOutcome, LaunchRequest, StackHealth,
};
pub use exec::{CommandOutput, CommandRunner, ProcessCommandRunner, StreamingCommandRunner};
pub use release::{BuiltVersion, ReleaseError, ReleaseRequest, build_image};
