//! Sanitisation and snapshotting of the configured host.

use std::time::{Duration, Instant};

use shell_escape::escape;
use tracing::info;

use super::BuildError;
use crate::exec::CommandRunner;
use crate::poll::poll;
use crate::provider::{Compute, ProviderError};
use crate::remote::{RemoteSession, SetupStep};

/// Returns the steps that strip host-specific state before imaging.
///
/// Anything left behind here ships inside every instance booted from the
/// baked image: credentials, host keys, machine identity, shell history.
pub(crate) fn sanitize_steps(ssh_user: &str) -> Vec<SetupStep> {
    let user = escape(ssh_user.into()).into_owned();
    vec![
        SetupStep::new(
            "Remove authorized keys",
            format!("sudo rm -f /home/{user}/.ssh/authorized_keys /root/.ssh/authorized_keys"),
        ),
        SetupStep::new("Remove host keys", "sudo rm -f /etc/ssh/ssh_host_*"),
        SetupStep::new("Reset instance metadata cache", "sudo rm -rf /var/lib/cloud/*"),
        SetupStep::new("Reset machine identity", "sudo truncate -s 0 /etc/machine-id"),
        SetupStep::new(
            "Remove shell history",
            format!("rm -f /home/{user}/.bash_history; sudo rm -f /root/.bash_history"),
        ),
        SetupStep::new("Clear temporary files", "sudo rm -rf /tmp/* /var/tmp/*"),
        SetupStep::new(
            "Truncate system logs",
            "sudo find /var/log -type f -exec truncate -s 0 {} +",
        ),
        SetupStep::new("Clean package caches", "sudo dnf clean all"),
        SetupStep::new("Report disk usage", "df -h"),
    ]
}

/// Runs the sanitisation steps as the final remote activity of the session.
pub(crate) fn sanitize<R: CommandRunner>(
    session: &RemoteSession<R>,
    ssh_user: &str,
) -> Result<(), BuildError> {
    match session.run_steps(&sanitize_steps(ssh_user))? {
        Ok(()) => Ok(()),
        Err(failure) => Err(BuildError::from(failure)),
    }
}

/// Stops the host, snapshots it into a named image, and waits until the
/// image is available.
pub(crate) async fn bake<C: Compute>(
    compute: &C,
    region: &str,
    instance_id: &str,
    image_name: &str,
    instance_poll: (Duration, u32),
    image_poll: (Duration, u32),
) -> Result<String, BuildError> {
    let started = Instant::now();
    compute.stop_instance(instance_id, region)?;
    info!(instance = %instance_id, "waiting for build host to stop");

    let (interval, attempts) = instance_poll;
    let stopped = poll::<_, ProviderError, _, _>(interval, attempts, || {
        let described = compute.describe_instance(instance_id, region);
        async move {
            match described? {
                Some(description) if description.state == "stopped" => Ok(Some(())),
                _ => Ok(None),
            }
        }
    })
    .await?;
    if stopped.into_ready().is_none() {
        return Err(BuildError::Imaging {
            stage: String::from("waiting for the build host to stop"),
            elapsed: started.elapsed(),
        });
    }

    let image_id = compute.create_image(
        instance_id,
        image_name,
        "baked application image",
        region,
    )?;
    info!(image = %image_id, name = %image_name, "image registration started");

    let (interval, attempts) = image_poll;
    let available = poll::<_, ProviderError, _, _>(interval, attempts, || {
        let state = compute.image_state(&image_id, region);
        async move {
            match state? {
                Some(state) if state.eq_ignore_ascii_case("available") => Ok(Some(())),
                _ => Ok(None),
            }
        }
    })
    .await?;
    if available.into_ready().is_none() {
        return Err(BuildError::Imaging {
            stage: format!("waiting for image {image_id} to become available"),
            elapsed: started.elapsed(),
        });
    }

    info!(image = %image_id, "image available");
    Ok(image_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitisation_removes_credentials_before_clearing_logs() {
        let steps = sanitize_steps("ec2-user");
        let commands: Vec<&str> = steps.iter().map(|step| step.command.as_str()).collect();
        assert!(commands[0].contains("/home/ec2-user/.ssh/authorized_keys"));
        assert!(commands.iter().any(|cmd| cmd.contains("/etc/machine-id")));
        assert_eq!(*commands.last().expect("steps not empty"), "df -h");
    }
}
