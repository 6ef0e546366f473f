//! `provision` and `teardown`.

use anyhow::Result;
use clap::Args;
use dialoguer::{theme::ColorfulTheme, Confirm};
use midl_installer::{ui, Environment, Installer};

use super::{env_var, RunArgs};

/// Provision the project, VPC and cluster only.
#[derive(Args, Debug)]
pub struct ProvisionCommand {
    #[command(flatten)]
    run: RunArgs,
}

impl ProvisionCommand {
    /// Run the command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is missing or a stage fails.
    pub async fn run(&self) -> Result<()> {
        let mut installer = Installer::from_lookup(
            env_var,
            |env| self.run.config(env),
            |config| self.run.backends(config),
        )?;

        let handle = installer.provision().await?;
        ui::print_success("Cluster ready");
        ui::print_kv("Cluster id", &handle.id);
        if let Some(endpoint) = &handle.endpoint {
            ui::print_kv("Endpoint", endpoint);
        }
        Ok(())
    }
}

/// Delete the cluster, VPC and project.
#[derive(Args, Debug)]
pub struct TeardownCommand {
    #[command(flatten)]
    run: RunArgs,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    yes: bool,
}

impl TeardownCommand {
    /// Run the command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is missing or a delete fails.
    pub async fn run(&self) -> Result<()> {
        let config = self.run.config(Environment::from_env()?);
        let prefix = config.environment.project_rand_id().to_string();

        if !self.yes {
            let proceed = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("Delete all resources prefixed '{prefix}'?"))
                .default(false)
                .interact()?;
            if !proceed {
                ui::print_info("Teardown cancelled");
                return Ok(());
            }
        }

        self.run.installer(config)?.teardown().await
    }
}
