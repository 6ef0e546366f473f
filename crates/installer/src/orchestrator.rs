//! Run orchestration.
//!
//! Wires the stages together in dependency order:
//! provision → wait for the control plane → extract credentials → connect →
//! deploy the workload. A failing stage stops the run; nothing is retried
//! and nothing created so far is removed. Re-running converges from the
//! resources that already exist.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use midl_cloud::{CloudProvider, ClusterHandle, ClusterProvisioner, CredentialBridge};
use midl_deploy::{Connector, DeploymentPipeline};
use tracing::{error, info, warn};

use crate::config::{Environment, InstallConfig};
use crate::state::{Outputs, RunState, RunStep};
use crate::ui;

/// Cloud provider and cluster connector a run talks to.
pub type Backends = (Arc<dyn CloudProvider>, Arc<dyn Connector>);

/// Drives one run against one provider and one cluster connector.
pub struct Installer {
    config: InstallConfig,
    provider: Arc<dyn CloudProvider>,
    connector: Arc<dyn Connector>,
    state: RunState,
    poll_interval: Option<Duration>,
}

impl Installer {
    /// Create an installer, picking up any state left by a previous run.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or existing state
    /// cannot be read. No provider call is made either way.
    pub fn new(
        config: InstallConfig,
        provider: Arc<dyn CloudProvider>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let state = RunState::load_or_new(config.environment.project_rand_id(), &config.output_dir)?;
        if let Some(err) = &state.last_error {
            ui::print_warning(&format!(
                "Previous run stopped at '{}' after {} attempt(s): {err}",
                state.step, state.attempt_count
            ));
        }

        Ok(Self {
            config,
            provider,
            connector,
            state,
            poll_interval: None,
        })
    }

    /// Resolve the environment through `lookup`, shape it with `configure`,
    /// and build the backends only once the configuration is valid.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`](crate::ConfigError) for a missing or empty
    /// variable or an invalid setting, or the error from `backends`.
    pub fn from_lookup<L, C, B>(lookup: L, configure: C, backends: B) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
        C: FnOnce(Environment) -> InstallConfig,
        B: FnOnce(&InstallConfig) -> Result<Backends>,
    {
        let config = configure(Environment::from_lookup(lookup)?);
        config.validate().context("Invalid configuration")?;

        let (provider, connector) = backends(&config)?;
        Self::new(config, provider, connector)
    }

    /// Override the polling interval for cluster readiness and the ingress address.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> &RunState {
        &self.state
    }

    fn provisioner(&self) -> ClusterProvisioner {
        let provisioner = ClusterProvisioner::new(self.provider.clone());
        match self.poll_interval {
            Some(interval) => provisioner.with_poll_interval(interval),
            None => provisioner,
        }
    }

    /// Save the error against the current step and hand it back.
    fn fail(&mut self, err: anyhow::Error) -> anyhow::Error {
        error!(step = ?self.state.step, error = %format!("{err:#}"), "Run failed");
        if let Err(save_err) = self.state.record_error(&format!("{err:#}")) {
            warn!(error = %save_err, "Could not save run state");
        }
        err
    }

    fn reach(&mut self, step: RunStep) -> Result<()> {
        self.state.set_step(step)?;
        ui::print_run_step(step);
        Ok(())
    }

    /// Provision the cluster and wait until its control plane is running.
    ///
    /// # Errors
    ///
    /// Returns the first failing stage's error.
    pub async fn provision(&mut self) -> Result<ClusterHandle> {
        let descriptors = self.config.descriptors();
        let provisioner = self.provisioner();

        ui::print_section("Provisioning cluster");
        ui::print_kv("Project", &descriptors.project.name);
        ui::print_kv("Network", &descriptors.network.name);
        ui::print_kv("Cluster", &descriptors.cluster.name);
        ui::print_kv("Region", &descriptors.cluster.region);

        let handle = provisioner
            .provision(&descriptors)
            .await
            .context("Cluster provisioning failed")
            .map_err(|e| self.fail(e))?;
        self.state.set_cluster(RunStep::ClusterProvisioned, &handle)?;
        ui::print_run_step(RunStep::ClusterProvisioned);

        let handle = provisioner
            .wait_ready(&handle, self.config.ready_timeout)
            .await
            .context("Cluster did not become ready")
            .map_err(|e| self.fail(e))?;
        self.state.set_cluster(RunStep::ClusterReady, &handle)?;
        ui::print_run_step(RunStep::ClusterReady);

        Ok(handle)
    }

    /// Provision the cluster and deploy the validator onto it.
    ///
    /// Writes `outputs.json` with the published endpoint on success.
    ///
    /// # Errors
    ///
    /// Returns the first failing stage's error.
    pub async fn deploy(&mut self) -> Result<Outputs> {
        let handle = self.provision().await?;

        let ctx = CredentialBridge::new(self.provider.clone())
            .extract(&handle)
            .await
            .context("Failed to extract cluster credentials")
            .map_err(|e| self.fail(e))?;
        self.reach(RunStep::CredentialsExtracted)?;

        let workload = self
            .connector
            .connect(&ctx)
            .await
            .context("Failed to connect to cluster")
            .map_err(|e| self.fail(e))?;

        ui::print_section("Deploying validator");
        ui::print_kv("Namespace", &self.config.workload.namespace);
        ui::print_kv("Chain", &self.config.workload.chain);

        let mut pipeline =
            DeploymentPipeline::new(workload.cluster.as_ref(), workload.releases.as_ref());
        if let Some(interval) = self.poll_interval {
            pipeline = pipeline.with_poll_interval(interval);
        }

        let result = pipeline.run(&self.config.workload).await;
        let output = match result {
            Ok(output) => output,
            Err(err) => {
                if let Some(stage) = err.reached() {
                    self.state.set_step(stage.into())?;
                }
                return Err(self.fail(anyhow::Error::new(err).context("Workload deployment failed")));
            }
        };

        for stage in &output.stages {
            ui::print_run_step((*stage).into());
        }
        if !output.namespace_created || !output.service_created {
            ui::print_info("Reused existing namespace or load balancer");
        }
        self.state.set_deployed(&output)?;

        let outputs = Outputs {
            lb_ip: output.ingress_ip,
            p2p_port: output.p2p_port,
        };
        let path = outputs.write(&self.config.output_dir)?;

        info!(lb_ip = %outputs.lb_ip, p2p_port = outputs.p2p_port, path = %path.display(), "Outputs written");
        ui::print_success("Validator deployed");
        ui::print_kv("lb_ip", &outputs.lb_ip.to_string());
        ui::print_kv("p2p_port", &outputs.p2p_port.to_string());

        Ok(outputs)
    }

    /// Delete the cluster, VPC and project. Safe to repeat.
    ///
    /// # Errors
    ///
    /// Returns the failing stage's error.
    pub async fn teardown(&mut self) -> Result<()> {
        let descriptors = self.config.descriptors();

        ui::print_section("Tearing down");
        self.provisioner()
            .with_delete_timeout(self.config.ready_timeout)
            .teardown(&descriptors)
            .await
            .context("Teardown failed")
            .map_err(|e| self.fail(e))?;

        let outputs = Outputs::file(&self.config.output_dir);
        if outputs.exists() {
            std::fs::remove_file(&outputs)
                .with_context(|| format!("Failed to remove {}", outputs.display()))?;
        }

        self.state.cluster = None;
        self.state.ingress_ip = None;
        self.state.p2p_port = None;
        self.state.release_revision = None;
        self.state.set_step(RunStep::TornDown)?;

        ui::print_success(&format!("Removed resources for prefix '{}'", self.state.prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DIGITALOCEAN_TOKEN, PROJECT_RAND_ID};
    use midl_cloud::testing::InMemoryProvider;
    use midl_cloud::Stage;
    use midl_deploy::testing::{FakeCluster, FakeConnector, FakeReleases};

    fn config(dir: &std::path::Path) -> InstallConfig {
        let env = Environment::from_lookup(|name| match name {
            PROJECT_RAND_ID => Some("x".to_string()),
            DIGITALOCEAN_TOKEN => Some("token".to_string()),
            _ => None,
        })
        .unwrap();
        let mut config = InstallConfig::with_defaults(env);
        config.output_dir = dir.to_path_buf();
        config.ready_timeout = Duration::from_secs(5);
        config.workload.address_timeout = Duration::from_secs(5);
        config
    }

    fn connector(releases: FakeReleases) -> Arc<FakeConnector> {
        let cluster = FakeCluster::default().assigning_after(1, vec!["203.0.113.9".parse().unwrap()]);
        Arc::new(FakeConnector::new(Arc::new(cluster), Arc::new(releases)))
    }

    #[tokio::test]
    async fn test_provider_failure_stops_before_connect() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(InMemoryProvider::default().failing_on(Stage::Network));
        let connector = connector(FakeReleases::default());

        let mut installer = Installer::new(config(dir.path()), provider.clone(), connector.clone())
            .unwrap()
            .with_poll_interval(Duration::from_millis(5));
        let err = installer.deploy().await.unwrap_err();

        assert!(format!("{err:#}").contains("network"));
        assert!(provider.cluster_requests().is_empty());
        assert!(connector.connected().is_empty());
        assert_eq!(installer.state().step, RunStep::NotStarted);
        assert_eq!(installer.state().attempt_count, 1);
        assert!(!Outputs::file(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_release_failure_records_address_step() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(InMemoryProvider::default());

        let mut installer = Installer::new(
            config(dir.path()),
            provider,
            connector(FakeReleases::failing()),
        )
        .unwrap()
        .with_poll_interval(Duration::from_millis(5));
        installer.deploy().await.unwrap_err();

        let saved = RunState::load(dir.path()).unwrap().unwrap();
        assert_eq!(saved.step, RunStep::AddressResolved);
        assert!(saved.last_error.unwrap().contains("release"));
        assert!(saved.cluster.is_some());
    }

    #[tokio::test]
    async fn test_missing_address_records_service_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.workload.address_timeout = Duration::from_millis(50);
        let cluster = Arc::new(FakeCluster::default());
        let connector = Arc::new(FakeConnector::new(
            cluster.clone(),
            Arc::new(FakeReleases::default()),
        ));

        let mut installer = Installer::new(config, Arc::new(InMemoryProvider::default()), connector)
            .unwrap()
            .with_poll_interval(Duration::from_millis(5));
        installer.deploy().await.unwrap_err();

        let saved = RunState::load(dir.path()).unwrap().unwrap();
        assert_eq!(saved.step, RunStep::ServiceProvisioning);
        assert!(cluster.has_service("test-validator-ns", "midl-polkadot-lb"));
        assert!(!Outputs::file(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_repeated_failure_counts_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(InMemoryProvider::default());

        for _ in 0..2 {
            let mut installer = Installer::new(
                config(dir.path()),
                provider.clone(),
                connector(FakeReleases::failing()),
            )
            .unwrap()
            .with_poll_interval(Duration::from_millis(5));
            installer.deploy().await.unwrap_err();
        }

        let saved = RunState::load(dir.path()).unwrap().unwrap();
        assert_eq!(saved.step, RunStep::AddressResolved);
        assert_eq!(saved.attempt_count, 2);
        assert_eq!(saved.failed_step, Some(RunStep::AddressResolved));
    }

    #[tokio::test]
    async fn test_teardown_clears_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(InMemoryProvider::default());

        let mut installer = Installer::new(
            config(dir.path()),
            provider,
            connector(FakeReleases::default()),
        )
        .unwrap()
        .with_poll_interval(Duration::from_millis(5));
        installer.deploy().await.unwrap();
        assert!(Outputs::file(dir.path()).exists());

        installer.teardown().await.unwrap();
        installer.teardown().await.unwrap();

        assert!(!Outputs::file(dir.path()).exists());
        assert_eq!(installer.state().step, RunStep::TornDown);
        assert!(installer.state().ingress_ip.is_none());
    }
}
