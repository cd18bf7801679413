//! Binary entry point for the Skylift CLI.

mod cli;

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use skylift::provider::aws::{AwsArtifacts, AwsCli, AwsCompute, AwsMetadata, AwsStacks};
use skylift::{
    BuildSession, ConfigError, DeploymentCoordinator, LaunchError, LaunchOutcome, LaunchRequest,
    OrgConfig, ProcessCommandRunner, ReleaseError, ReleaseRequest, StreamingCommandRunner,
    build_image,
};

use cli::{BuildCommand, Cli, LaunchCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("build failed: {0}")]
    Release(#[from] ReleaseError),
    #[error("launch failed: {0}")]
    Launch(#[from] LaunchError),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn report_error(err: &CliError) {
    let _ = writeln!(io::stderr(), "{err}");
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let config = OrgConfig::load_without_cli_args()?;
    config.validate()?;

    match cli {
        Cli::Build(command) => build(&config, command).await,
        Cli::Launch(command) => launch(&config, command).await,
    }
}

async fn build(config: &OrgConfig, command: BuildCommand) -> Result<i32, CliError> {
    let aws = AwsCli::new(config.aws_bin.clone(), ProcessCommandRunner);
    let compute = AwsCompute::new(aws.clone());
    let metadata = AwsMetadata::new(aws.clone(), config.org_region.clone());
    let artifacts = AwsArtifacts::new(aws, config.org_bucket.clone(), config.org_region.clone());

    // Remote setup output streams to the terminal as the steps run.
    let session = BuildSession::new(
        config,
        &compute,
        StreamingCommandRunner,
        config.org_region.clone(),
        skylift::build::default_key_dir(),
    );
    let request = ReleaseRequest {
        app_name: command.app,
        version: command.version,
        bundle_path: command.bundle,
        template_path: command.template,
    };
    let built = build_image(config, &metadata, &artifacts, &session, &request).await?;

    let _ = writeln!(
        io::stdout(),
        "built {} {}.{} as {} ({})",
        request.app_name,
        built.version,
        built.build,
        built.image_name,
        built.image_id
    );
    Ok(0)
}

async fn launch(config: &OrgConfig, command: LaunchCommand) -> Result<i32, CliError> {
    let aws = AwsCli::new(config.aws_bin.clone(), ProcessCommandRunner);
    let compute = AwsCompute::new(aws.clone());
    let stacks = AwsStacks::new(aws.clone());
    let metadata = AwsMetadata::new(aws, config.org_region.clone());

    let coordinator = DeploymentCoordinator::new(config, &compute, &stacks, &metadata);
    let request = LaunchRequest {
        app_name: command.app,
        domain: command.instance,
        version: command.version,
        force_prune: command.force_prune,
    };
    let outcome = coordinator.launch(&request).await?;

    match outcome {
        LaunchOutcome::Created { stack_id } => {
            let _ = writeln!(io::stdout(), "stack creation started: {stack_id}");
            Ok(0)
        }
        LaunchOutcome::Updated { stack_id } => {
            let _ = writeln!(io::stdout(), "stack update started: {stack_id}");
            Ok(0)
        }
        LaunchOutcome::Skipped { health } => {
            let _ = writeln!(io::stdout(), "stack left untouched: {health:?}");
            Ok(2)
        }
    }
}
