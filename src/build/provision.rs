//! Provisioning of the ephemeral build host.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;
use uuid::Uuid;

use super::BuildError;
use crate::config::OrgConfig;
use crate::poll::poll;
use crate::provider::{Compute, InstanceLaunchSpec, ProviderError};
use crate::registry::{ResourceRegistry, TrackedResource};
use crate::remote::RemoteTarget;

const ROOT_VOLUME_GIB: u32 = 40;
const REMOTE_PORT: u16 = 22;

/// A booted build host, ready for remote sessions.
pub(crate) struct ProvisionedHost {
    pub instance_id: String,
    pub target: RemoteTarget,
}

/// Creates the session's credentials, network policy, and instance, and
/// waits until the host is reachable.
///
/// Every provider-side resource is registered with `registry` the moment
/// its creation call returns, so teardown can release it even when a later
/// step fails.
pub(crate) async fn provision<C: Compute>(
    config: &OrgConfig,
    compute: &C,
    region: &str,
    key_dir: &Utf8Path,
    instance_poll: (Duration, u32),
    settle_wait: Duration,
    registry: &mut ResourceRegistry,
) -> Result<ProvisionedHost, BuildError> {
    let session_name = format!("skylift-build-{}", Uuid::new_v4());

    let material = compute.create_key_pair(&session_name, region)?;
    registry.register(TrackedResource::KeyPair(material.name.clone()));
    let key_path = write_private_key(key_dir, &session_name, &material.private_key)?;
    registry.register(TrackedResource::PrivateKeyFile(key_path.clone()));

    let group_id =
        compute.create_security_group(&session_name, "ephemeral image build host", region)?;
    registry.register(TrackedResource::SecurityGroup(group_id.clone()));

    let base = compute.latest_base_image(
        &config.base_image_pattern,
        &config.base_image_owner,
        region,
    )?;
    info!(base_image = %base.name, image_id = %base.id, "selected base image");

    let spec = InstanceLaunchSpec {
        base_image_id: base.id,
        instance_type: config.builder_instance_type.clone(),
        key_pair_name: session_name.clone(),
        security_group_id: group_id,
        name_tag: session_name,
        root_volume_gib: ROOT_VOLUME_GIB,
    };
    let instance_id = compute.run_instance(&spec, region)?;
    registry.register(TrackedResource::Instance(instance_id.clone()));
    info!(instance = %instance_id, "build host booting");

    let (interval, attempts) = instance_poll;
    let outcome = poll::<_, ProviderError, _, _>(interval, attempts, || {
        let described = compute.describe_instance(&instance_id, region);
        async move {
            match described? {
                Some(description) if description.state == "running" => Ok(description.public_ip),
                _ => Ok(None),
            }
        }
    })
    .await?;
    let Some(public_ip) = outcome.into_ready() else {
        return Err(BuildError::Provisioning {
            message: format!(
                "instance {instance_id} did not reach running state with a public \
                 address after {attempts} checks"
            ),
        });
    };

    info!(instance = %instance_id, address = %public_ip, "build host running");
    if !settle_wait.is_zero() {
        // Freshly booted hosts refuse sessions for a short window while the
        // session daemon starts.
        info!(seconds = settle_wait.as_secs(), "waiting for host services to settle");
        tokio::time::sleep(settle_wait).await;
    }

    Ok(ProvisionedHost {
        instance_id,
        target: RemoteTarget {
            host: public_ip,
            port: REMOTE_PORT,
            user: config.ssh_user.clone(),
            identity_file: key_path,
        },
    })
}

fn write_private_key(
    dir: &Utf8Path,
    session_name: &str,
    material: &str,
) -> Result<Utf8PathBuf, BuildError> {
    let path = dir.join(format!("{session_name}.pem"));
    let io_failure = |err: std::io::Error| BuildError::Provisioning {
        message: format!("failed to write private key {path}: {err}"),
    };
    std::fs::write(&path, material).map_err(io_failure)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .map_err(io_failure)?;
    }
    Ok(path)
}
