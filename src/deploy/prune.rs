//! Retirement of superseded build images.
//!
//! An image is deregistered only when nothing references it: no deployed
//! instance record names it, and it is not the version's current build
//! unless the caller forces that. The sweep covers the launch region and
//! the org home region, since every image exists in the home region first.

use tracing::{info, warn};

use crate::model::AppRecord;
use crate::provider::{Compute, ProviderError};

/// Returns `true` when an image must be kept.
fn retained(image_name: &str, app: &AppRecord, current_image_name: &str, force: bool) -> bool {
    if !force && image_name == current_image_name {
        return true;
    }
    app.instances
        .iter()
        .any(|instance| instance.image_name == image_name)
}

/// Deregisters every prunable image with the given name prefix across
/// `regions`, returning how many were removed.
///
/// Failures on individual images are logged and skipped; a half-finished
/// sweep retries naturally on the next launch.
///
/// # Errors
///
/// Returns [`ProviderError`] when a region's image listing fails.
pub(crate) fn prune_images<C: Compute>(
    compute: &C,
    app: &AppRecord,
    name_prefix: &str,
    current_image_name: &str,
    regions: &[&str],
    force: bool,
) -> Result<usize, ProviderError> {
    let mut unique_regions: Vec<&str> = Vec::new();
    for region in regions {
        if !unique_regions.contains(region) {
            unique_regions.push(region);
        }
    }

    let mut removed = 0;
    for region in unique_regions {
        for image in compute.list_images(name_prefix, region)? {
            if retained(&image.name, app, current_image_name, force) {
                continue;
            }
            match compute.deregister_image(&image.id, region) {
                Ok(()) => {
                    info!(image = %image.name, id = %image.id, region, "pruned superseded image");
                    removed += 1;
                }
                Err(err) => {
                    warn!(image = %image.name, region, error = %err, "failed to prune image");
                }
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstanceRecord;
    use rstest::rstest;
    use std::collections::BTreeMap;

    fn app_with_deployed_image(image_name: &str) -> AppRecord {
        AppRecord {
            name: String::from("demo"),
            stack_key: String::from("stacks/default.yaml"),
            versions: BTreeMap::new(),
            instances: vec![InstanceRecord {
                domain: String::from("demo.example.com"),
                region: String::from("eu-west-1"),
                stack_name: String::from("demo-prod"),
                version: String::from("2.1"),
                build: 2,
                image_name: image_name.to_owned(),
                stack_parameters: BTreeMap::new(),
                last_deployed: None,
            }],
        }
    }

    #[rstest]
    #[case::deployed_image_is_kept("demo-v2.1.2", "demo-v2.1.4", false, true)]
    #[case::current_build_is_kept("demo-v2.1.4", "demo-v2.1.4", false, true)]
    #[case::current_build_pruned_when_forced("demo-v2.1.4", "demo-v2.1.4", true, false)]
    #[case::superseded_image_is_prunable("demo-v2.1.1", "demo-v2.1.4", false, false)]
    fn retention_law(
        #[case] candidate: &str,
        #[case] current: &str,
        #[case] force: bool,
        #[case] kept: bool,
    ) {
        let app = app_with_deployed_image("demo-v2.1.2");
        assert_eq!(retained(candidate, &app, current, force), kept);
    }

    #[rstest]
    fn forced_prune_never_removes_deployed_images() {
        let app = app_with_deployed_image("demo-v2.1.2");
        assert!(retained("demo-v2.1.2", &app, "demo-v2.1.4", true));
    }
}
