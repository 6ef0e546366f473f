//! Run state persistence.
//!
//! Records how far the last run got so the operator can see it and
//! `midl outputs` can print the published endpoint. Reconciliation never
//! reads it: every run re-checks the real resources by name.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use midl_cloud::ClusterHandle;
use midl_deploy::{DeployStage, DeploymentOutput};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Steps of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStep {
    /// Nothing done yet.
    NotStarted,
    /// Project, VPC and cluster exist.
    ClusterProvisioned,
    /// Control plane is running.
    ClusterReady,
    /// Kubeconfig fetched.
    CredentialsExtracted,
    /// Workload namespace exists.
    NamespaceCreated,
    /// Load balancer exists.
    ServiceProvisioning,
    /// Load balancer address known.
    AddressResolved,
    /// Validator chart installed.
    ReleaseInstalled,
    /// Cloud resources deleted.
    TornDown,
}

impl RunStep {
    /// Human-readable description.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::ClusterProvisioned => "Cluster provisioned",
            Self::ClusterReady => "Control plane running",
            Self::CredentialsExtracted => "Credentials extracted",
            Self::NamespaceCreated => "Namespace created",
            Self::ServiceProvisioning => "Load balancer provisioning",
            Self::AddressResolved => "Ingress address resolved",
            Self::ReleaseInstalled => "Validator release installed",
            Self::TornDown => "Torn down",
        }
    }

    /// Position for progress display.
    #[must_use]
    pub fn step_number(self) -> u8 {
        match self {
            Self::NotStarted | Self::TornDown => 0,
            Self::ClusterProvisioned => 1,
            Self::ClusterReady => 2,
            Self::CredentialsExtracted => 3,
            Self::NamespaceCreated => 4,
            Self::ServiceProvisioning => 5,
            Self::AddressResolved => 6,
            Self::ReleaseInstalled => 7,
        }
    }

    /// Total number of deploy steps.
    pub const TOTAL_STEPS: u8 = 7;
}

impl From<DeployStage> for RunStep {
    fn from(stage: DeployStage) -> Self {
        match stage {
            DeployStage::NamespaceCreated => Self::NamespaceCreated,
            DeployStage::ServiceProvisioning => Self::ServiceProvisioning,
            DeployStage::AddressResolved => Self::AddressResolved,
            DeployStage::ReleaseInstalled => Self::ReleaseInstalled,
        }
    }
}

impl std::fmt::Display for RunStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Persisted run state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Resource name prefix of this run.
    pub prefix: String,
    /// Last step reached.
    pub step: RunStep,
    /// Cluster as last observed.
    pub cluster: Option<ClusterHandle>,
    /// Published load balancer address.
    pub ingress_ip: Option<IpAddr>,
    /// Published peer-to-peer port.
    pub p2p_port: Option<u16>,
    /// Release revision reported by helm.
    pub release_revision: Option<u32>,
    /// Consecutive failed runs that stopped at `failed_step`.
    pub attempt_count: u32,
    /// Step the last failed run stopped at.
    #[serde(default)]
    pub failed_step: Option<RunStep>,
    /// Last error message.
    pub last_error: Option<String>,
    /// Timestamp of last update (RFC 3339).
    pub updated_at: String,
    #[serde(skip)]
    output_dir: PathBuf,
}

impl RunState {
    /// Fresh state for `prefix`, stored under `output_dir`.
    #[must_use]
    pub fn new(prefix: &str, output_dir: &Path) -> Self {
        Self {
            prefix: prefix.to_string(),
            step: RunStep::NotStarted,
            cluster: None,
            ingress_ip: None,
            p2p_port: None,
            release_revision: None,
            attempt_count: 0,
            failed_step: None,
            last_error: None,
            updated_at: chrono::Utc::now().to_rfc3339(),
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// State file path for an output directory.
    #[must_use]
    pub fn state_file(output_dir: &Path) -> PathBuf {
        output_dir.join("run-state.json")
    }

    /// Load state if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(output_dir: &Path) -> Result<Option<Self>> {
        let path = Self::state_file(output_dir);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path).context("Failed to read state file")?;
        let mut state: Self =
            serde_json::from_str(&content).context("Failed to parse state file")?;
        state.output_dir = output_dir.to_path_buf();

        info!(step = ?state.step, attempts = state.attempt_count, "Loaded run state");
        Ok(Some(state))
    }

    /// Load state for `prefix`, or start fresh if absent or for another prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_new(prefix: &str, output_dir: &Path) -> Result<Self> {
        Ok(Self::load(output_dir)?
            .filter(|state| state.prefix == prefix)
            .unwrap_or_else(|| Self::new(prefix, output_dir)))
    }

    /// Save state to file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&mut self) -> Result<()> {
        self.updated_at = chrono::Utc::now().to_rfc3339();

        std::fs::create_dir_all(&self.output_dir).context("Failed to create output directory")?;
        let content = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        std::fs::write(Self::state_file(&self.output_dir), content)
            .context("Failed to write state file")?;

        Ok(())
    }

    /// Move to `step` and save.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn set_step(&mut self, step: RunStep) -> Result<()> {
        if self.step != step {
            info!("Step: {} -> {}", self.step, step);
        }
        if matches!(step, RunStep::ReleaseInstalled | RunStep::TornDown) {
            self.attempt_count = 0;
            self.failed_step = None;
        }
        self.step = step;
        self.last_error = None;
        self.save()
    }

    /// Record the cluster and save.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn set_cluster(&mut self, step: RunStep, handle: &ClusterHandle) -> Result<()> {
        self.cluster = Some(handle.clone());
        self.set_step(step)
    }

    /// Record a finished deployment and save.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn set_deployed(&mut self, output: &DeploymentOutput) -> Result<()> {
        self.ingress_ip = Some(output.ingress_ip);
        self.p2p_port = Some(output.p2p_port);
        self.release_revision = output.release.revision;
        self.set_step(RunStep::ReleaseInstalled)
    }

    /// Record a failed run at the current step and save.
    ///
    /// Runs that keep failing at the same step are counted together; a
    /// failure at another step starts the count again.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn record_error(&mut self, error: &str) -> Result<()> {
        if self.failed_step == Some(self.step) {
            self.attempt_count += 1;
        } else {
            self.failed_step = Some(self.step);
            self.attempt_count = 1;
        }
        self.last_error = Some(error.to_string());
        self.save()
    }

    /// Whether the validator is deployed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.step == RunStep::ReleaseInstalled
    }
}

/// Published endpoint of the deployed validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outputs {
    /// Load balancer address.
    pub lb_ip: IpAddr,
    /// Peer-to-peer port.
    pub p2p_port: u16,
}

impl Outputs {
    /// Outputs file path for an output directory.
    #[must_use]
    pub fn file(output_dir: &Path) -> PathBuf {
        output_dir.join("outputs.json")
    }

    /// Write to `outputs.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, output_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(output_dir).context("Failed to create output directory")?;
        let path = Self::file(output_dir);
        let content = serde_json::to_string_pretty(self).context("Failed to serialize outputs")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Read `outputs.json`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn read(output_dir: &Path) -> Result<Option<Self>> {
        let path = Self::file(output_dir);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(
            serde_json::from_str(&content).context("Failed to parse outputs file")?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order() {
        assert!(RunStep::ClusterReady < RunStep::CredentialsExtracted);
        assert!(RunStep::AddressResolved < RunStep::ReleaseInstalled);
        assert_eq!(RunStep::ReleaseInstalled.step_number(), RunStep::TOTAL_STEPS);
        assert_eq!(
            RunStep::from(DeployStage::AddressResolved),
            RunStep::AddressResolved
        );
    }

    #[test]
    fn test_state_roundtrip_and_prefix_filter() {
        let dir = tempfile::tempdir().unwrap();

        let mut state = RunState::new("a1b2", dir.path());
        state.set_step(RunStep::ClusterReady).unwrap();
        state.record_error("cluster stage failed").unwrap();

        let loaded = RunState::load_or_new("a1b2", dir.path()).unwrap();
        assert_eq!(loaded.step, RunStep::ClusterReady);
        assert_eq!(loaded.attempt_count, 1);
        assert_eq!(loaded.last_error.as_deref(), Some("cluster stage failed"));

        let other = RunState::load_or_new("zz", dir.path()).unwrap();
        assert_eq!(other.step, RunStep::NotStarted);
    }

    #[test]
    fn test_attempts_count_across_runs_at_same_step() {
        let dir = tempfile::tempdir().unwrap();

        for _ in 0..2 {
            let mut state = RunState::load_or_new("a1b2", dir.path()).unwrap();
            state.set_step(RunStep::ClusterProvisioned).unwrap();
            state.set_step(RunStep::ClusterReady).unwrap();
            state.record_error("timed out").unwrap();
        }
        let mut state = RunState::load_or_new("a1b2", dir.path()).unwrap();
        assert_eq!(state.attempt_count, 2);
        assert_eq!(state.failed_step, Some(RunStep::ClusterReady));

        state.set_step(RunStep::AddressResolved).unwrap();
        state.record_error("release failed").unwrap();
        assert_eq!(state.attempt_count, 1);
        assert_eq!(state.failed_step, Some(RunStep::AddressResolved));

        state.set_step(RunStep::ReleaseInstalled).unwrap();
        assert_eq!(state.attempt_count, 0);
        assert_eq!(state.failed_step, None);
    }

    #[test]
    fn test_outputs_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = Outputs {
            lb_ip: "203.0.113.9".parse().unwrap(),
            p2p_port: 31333,
        };

        let path = outputs.write(dir.path()).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

        assert_eq!(json["lb_ip"], "203.0.113.9");
        assert_eq!(json["p2p_port"], 31333);
        assert_eq!(Outputs::read(dir.path()).unwrap(), Some(outputs));
    }
}
