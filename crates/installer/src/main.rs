//! `midl` command-line entry point.

use anyhow::Result;
use clap::{Parser, Subcommand};
use midl_installer::ui;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::cluster::{ProvisionCommand, TeardownCommand};
use commands::deploy::DeployCommand;
use commands::outputs::OutputsCommand;

/// Polkadot validator on DigitalOcean Kubernetes.
#[derive(Parser)]
#[command(
    name = "midl",
    version,
    about = "Provision a DigitalOcean cluster and deploy a Polkadot validator",
    long_about = "Provision a DigitalOcean project, VPC and Kubernetes cluster, then deploy\n\
                  a Polkadot/Kusama validator behind a load balancer.\n\n\
                  Requires PROJECT_RAND_ID and DIGITALOCEAN_TOKEN. Every step converges on\n\
                  existing resources, so re-running after a failure picks up where it stopped."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the cluster and deploy the validator.
    Deploy(DeployCommand),

    /// Provision the project, VPC and cluster only.
    Provision(ProvisionCommand),

    /// Print the published validator endpoint.
    Outputs(OutputsCommand),

    /// Delete the cluster, VPC and project.
    Teardown(TeardownCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("info,midl_cloud=debug,midl_deploy=debug,midl_installer=debug")
    } else {
        EnvFilter::new("warn,midl_cloud=info,midl_deploy=info,midl_installer=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Deploy(cmd) => cmd.run().await,
        Commands::Provision(cmd) => cmd.run().await,
        Commands::Outputs(cmd) => cmd.run(),
        Commands::Teardown(cmd) => cmd.run().await,
    };

    if let Err(err) = &result {
        ui::print_error(&format!("{err:#}"));
    }
    result
}
