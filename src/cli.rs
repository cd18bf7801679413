//! Command-line definitions for the `skylift` binary.

use camino::Utf8PathBuf;
use clap::Parser;

/// Top-level command surface.
#[derive(Debug, Parser)]
#[command(
    name = "skylift",
    about = "Bake machine images for application releases and roll them out",
    arg_required_else_help = true
)]
pub enum Cli {
    /// Bake a new image for an application version from a bundle.
    #[command(name = "build")]
    Build(BuildCommand),
    /// Place a built version onto a deployed instance.
    #[command(name = "launch")]
    Launch(LaunchCommand),
}

/// Arguments for the `build` subcommand.
#[derive(Debug, Parser)]
pub struct BuildCommand {
    /// Application to build.
    #[arg(value_name = "APP")]
    pub app: String,
    /// Version the build belongs to, as `major.minor`.
    #[arg(value_name = "VERSION")]
    pub version: String,
    /// Path to the packaged application bundle (.zip).
    #[arg(value_name = "BUNDLE")]
    pub bundle: Utf8PathBuf,
    /// Version-specific stack template to upload alongside the bundle.
    #[arg(long, value_name = "PATH")]
    pub template: Option<Utf8PathBuf>,
}

/// Arguments for the `launch` subcommand.
#[derive(Debug, Parser)]
pub struct LaunchCommand {
    /// Application to deploy.
    #[arg(value_name = "APP")]
    pub app: String,
    /// Domain of the deployed instance to update.
    #[arg(value_name = "INSTANCE")]
    pub instance: String,
    /// Built version to place on the instance.
    #[arg(value_name = "VERSION")]
    pub version: String,
    /// Allow the prune pass to remove the version's current build image.
    #[arg(long)]
    pub force_prune: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn build_subcommand_parses_positionals_and_template() {
        let cli = Cli::try_parse_from([
            "skylift", "build", "demo", "2.1", "/work/demo.zip", "--template", "/work/stack.yaml",
        ])
        .expect("arguments should parse");
        let Cli::Build(command) = cli else {
            panic!("expected build subcommand");
        };
        assert_eq!(command.app, "demo");
        assert_eq!(command.version, "2.1");
        assert_eq!(command.bundle, Utf8PathBuf::from("/work/demo.zip"));
        assert_eq!(command.template, Some(Utf8PathBuf::from("/work/stack.yaml")));
    }

    #[rstest]
    fn launch_subcommand_defaults_force_prune_off() {
        let cli = Cli::try_parse_from(["skylift", "launch", "demo", "demo.example.com", "2.1"])
            .expect("arguments should parse");
        let Cli::Launch(command) = cli else {
            panic!("expected launch subcommand");
        };
        assert_eq!(command.instance, "demo.example.com");
        assert!(!command.force_prune);
    }
}
