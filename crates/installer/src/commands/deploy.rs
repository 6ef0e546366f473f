//! `deploy`: provision and install the validator.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use midl_installer::{ui, Environment, InstallConfig, Installer};

use super::{env_var, RunArgs};

/// Provision the cluster and deploy the validator onto it.
#[derive(Args, Debug, Default)]
pub struct DeployCommand {
    #[command(flatten)]
    run: RunArgs,

    /// Chain to validate [default: kusama].
    #[arg(long)]
    chain: Option<String>,

    /// Validator display name.
    #[arg(long)]
    validator_name: Option<String>,

    /// Polkadot node image.
    #[arg(long)]
    node_image: Option<String>,

    /// Chain-data snapshot URL.
    #[arg(long)]
    archive_url: Option<String>,

    /// Workload namespace [default: test-validator-ns].
    #[arg(long)]
    namespace: Option<String>,

    /// Chart path [default: ./charts/polkadot/].
    #[arg(long, value_name = "PATH")]
    chart: Option<PathBuf>,

    /// Helm executable.
    #[arg(long, env = "HELM_BIN", default_value = "helm")]
    helm: String,

    /// Seconds to wait for the load balancer address [default: 600].
    #[arg(long, value_name = "SECS")]
    address_timeout: Option<u64>,

    /// Seconds to wait for the release [default: 1800].
    #[arg(long, value_name = "SECS")]
    release_timeout: Option<u64>,
}

impl DeployCommand {
    fn config(&self, environment: Environment) -> InstallConfig {
        let mut config = self.run.config(environment);
        let workload = &mut config.workload;

        if let Some(chain) = &self.chain {
            workload.chain.clone_from(chain);
        }
        if let Some(name) = &self.validator_name {
            workload.validator_name.clone_from(name);
        }
        if let Some(image) = &self.node_image {
            workload.node_image.clone_from(image);
        }
        if let Some(url) = &self.archive_url {
            workload.archive_url.clone_from(url);
        }
        if let Some(namespace) = &self.namespace {
            workload.namespace.clone_from(namespace);
        }
        if let Some(chart) = &self.chart {
            workload.chart.clone_from(chart);
        }
        if let Some(secs) = self.address_timeout {
            workload.address_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.release_timeout {
            workload.release_timeout = Duration::from_secs(secs);
        }
        config.helm_binary.clone_from(&self.helm);

        config
    }

    /// Run the command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is missing or a stage fails.
    pub async fn run(&self) -> Result<()> {
        ui::print_banner();

        let mut installer = Installer::from_lookup(
            env_var,
            |env| self.config(env),
            |config| self.run.backends(config),
        )?;
        installer.deploy().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_flags() {
        let env = Environment::from_lookup(|_| Some("x".into())).unwrap();
        let cmd = DeployCommand {
            chain: Some("polkadot".into()),
            namespace: Some("validators".into()),
            release_timeout: Some(60),
            helm: "/usr/local/bin/helm".into(),
            ..DeployCommand::default()
        };
        let config = cmd.config(env);

        assert_eq!(config.workload.chain, "polkadot");
        assert_eq!(config.workload.namespace, "validators");
        assert_eq!(config.workload.release_timeout, Duration::from_secs(60));
        assert_eq!(config.workload.service_name, "midl-polkadot-lb");
        assert_eq!(config.helm_binary, "/usr/local/bin/helm");
    }
}
