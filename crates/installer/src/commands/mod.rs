//! CLI subcommands.

pub mod cluster;
pub mod deploy;
pub mod outputs;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use midl_cloud::DigitalOcean;
use midl_deploy::KubeConnector;
use midl_installer::{Backends, Environment, InstallConfig, Installer};

/// Process environment lookup handed to [`Installer::from_lookup`].
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Flags shared by every command that touches the cloud.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Directory for run state and outputs [default: .midl/<PROJECT_RAND_ID>].
    #[arg(long, env = "MIDL_OUTPUT_DIR", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Region for the VPC and cluster [default: ams3].
    #[arg(long)]
    pub region: Option<String>,

    /// DOKS version slug [default: 1.21.2-do.2].
    #[arg(long)]
    pub k8s_version: Option<String>,

    /// Node droplet size [default: s-4vcpu-8gb].
    #[arg(long)]
    pub node_size: Option<String>,

    /// Nodes in the pool [default: 1].
    #[arg(long)]
    pub node_count: Option<u32>,

    /// Seconds to wait for the control plane [default: 900].
    #[arg(long, value_name = "SECS")]
    pub ready_timeout: Option<u64>,

    /// Override the DigitalOcean API base URL.
    #[arg(long, env = "DIGITALOCEAN_API_URL", hide = true)]
    pub api_url: Option<String>,
}

impl RunArgs {
    /// Apply flags over the defaults.
    #[must_use]
    pub fn config(&self, environment: Environment) -> InstallConfig {
        let mut config = InstallConfig::with_defaults(environment);

        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        if let Some(region) = &self.region {
            config.cluster.region.clone_from(region);
        }
        if let Some(version) = &self.k8s_version {
            config.cluster.version.clone_from(version);
        }
        if let Some(size) = &self.node_size {
            config.cluster.node_size.clone_from(size);
        }
        if let Some(count) = self.node_count {
            config.cluster.node_count = count;
        }
        if let Some(secs) = self.ready_timeout {
            config.ready_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// The real DigitalOcean API and a kube-rs connector.
    ///
    /// # Errors
    ///
    /// Returns an error if the API client cannot be built.
    pub fn backends(&self, config: &InstallConfig) -> Result<Backends> {
        let mut provider = DigitalOcean::new(config.environment.digitalocean_token())
            .context("Failed to create DigitalOcean client")?;
        if let Some(url) = &self.api_url {
            provider = provider
                .with_base_url(url)
                .context("Invalid DigitalOcean API URL")?;
        }

        let connector = KubeConnector::new(config.helm_binary.clone());
        Ok((Arc::new(provider), Arc::new(connector)))
    }

    /// Build an installer for an already resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or API client is invalid.
    pub fn installer(&self, config: InstallConfig) -> Result<Installer> {
        let (provider, connector) = self.backends(&config)?;
        Installer::new(config, provider, connector)
    }
}
