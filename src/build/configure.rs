//! Baked-in host configuration steps.
//!
//! The step list is deliberately code, not configuration: the runtime the
//! baked image carries is part of the release contract and changes through
//! review like any other behaviour.

use shell_escape::escape;

use super::BuildError;
use crate::config::OrgConfig;
use crate::exec::CommandRunner;
use crate::remote::{RemoteSession, SetupStep};

/// Returns the ordered configuration steps for a fresh build host.
pub(crate) fn setup_steps(config: &OrgConfig) -> Vec<SetupStep> {
    let app_dir = escape(config.remote_app_dir.as_str().into());
    vec![
        SetupStep::new("Update system packages", "sudo dnf upgrade -y --releasever=latest"),
        SetupStep::new(
            "Add Node.js package repository",
            "curl -fsSL https://rpm.nodesource.com/setup_24.x | sudo bash -",
        ),
        SetupStep::new("Install Node.js", "sudo dnf install -y nodejs"),
        SetupStep::new("Verify Node.js installation", "node --version"),
        SetupStep::new(
            "Install CloudWatch agent",
            "sudo dnf install -y amazon-cloudwatch-agent",
        ),
        SetupStep::new("Install Python 3", "sudo dnf install -y python3"),
        SetupStep::new("Install unzip", "sudo dnf install -y unzip"),
        SetupStep::new("Install pm2 process manager", "sudo npm install -g pm2"),
        SetupStep::new(
            "Create application directory",
            format!("mkdir -p {app_dir}"),
        ),
    ]
}

/// Runs the configuration steps on the host, aborting on the first failure.
pub(crate) fn configure<R: CommandRunner>(
    session: &RemoteSession<R>,
    config: &OrgConfig,
) -> Result<(), BuildError> {
    match session.run_steps(&setup_steps(config))? {
        Ok(()) => Ok(()),
        Err(failure) => Err(BuildError::from(failure)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_directory_is_created_last_and_escaped() {
        let mut config = crate::config::sample();
        config.remote_app_dir = String::from("/home/ec2-user/app dir");
        let steps = setup_steps(&config);
        let last = steps.last().expect("steps are not empty");
        assert_eq!(last.command, "mkdir -p '/home/ec2-user/app dir'");
    }
}
