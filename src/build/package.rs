//! Bundle transfer and unpacking on the build host.

use camino::Utf8Path;
use shell_escape::escape;
use tracing::info;

use super::BuildError;
use crate::config::OrgConfig;
use crate::exec::CommandRunner;
use crate::remote::{RemoteSession, SetupStep};

/// Returns the steps that move a staged bundle into the application
/// directory and clean up after themselves.
pub(crate) fn unpack_steps(config: &OrgConfig) -> Vec<SetupStep> {
    let staging = escape(config.remote_staging_path.as_str().into()).into_owned();
    let app_dir = escape(config.remote_app_dir.as_str().into()).into_owned();
    let user = escape(config.ssh_user.as_str().into()).into_owned();
    vec![
        SetupStep::new(
            "Unpack application bundle",
            format!("unzip -o {staging} -d {app_dir}"),
        ),
        SetupStep::new(
            "Fix application ownership",
            format!("sudo chown -R {user}:{user} {app_dir}"),
        ),
        SetupStep::new("Remove staged bundle", format!("rm -f {staging}")),
        SetupStep::new("List application directory", format!("ls -la {app_dir}")),
    ]
}

/// Uploads the bundle to the host's staging path and unpacks it.
pub(crate) fn stage_bundle<R: CommandRunner>(
    session: &RemoteSession<R>,
    bundle_path: &Utf8Path,
    config: &OrgConfig,
) -> Result<(), BuildError> {
    info!(bundle = %bundle_path, destination = %config.remote_staging_path, "uploading bundle");
    session.upload(bundle_path, &config.remote_staging_path)?;
    match session.run_steps(&unpack_steps(config))? {
        Ok(()) => Ok(()),
        Err(failure) => Err(BuildError::from(failure)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpack_removes_the_staged_archive_after_extraction() {
        let steps = unpack_steps(&crate::config::sample());
        let unpack_index = steps
            .iter()
            .position(|step| step.command.starts_with("unzip"))
            .expect("unzip step present");
        let removal_index = steps
            .iter()
            .position(|step| step.command.starts_with("rm -f"))
            .expect("removal step present");
        assert!(unpack_index < removal_index);
        assert!(steps[unpack_index].command.contains("-o /tmp/app.zip"));
    }
}
