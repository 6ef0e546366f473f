//! Cluster provisioning with a strict project → network → cluster order.
//!
//! Each stage converges: the resource is looked up by name first and only
//! created when absent, so re-running with the same descriptors returns the
//! same [`ClusterHandle`]. Failures are reported with the stage that failed
//! and are never retried here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::descriptors::Descriptors;
use crate::providers::{
    CloudProvider, ClusterRecord, ClusterState, CreateClusterRequest, CreateNetworkRequest,
    CreateProjectRequest, NetworkId, ProjectId, ProviderError,
};

/// Polling interval when waiting for the control plane.
const POLL_INTERVAL_SECS: u64 = 15;

/// Upper bound on waiting for a deleted cluster to disappear.
const DELETE_TIMEOUT_SECS: u64 = 900;

/// Provisioning stage, used to tag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Project container.
    Project,
    /// Virtual network.
    Network,
    /// Managed Kubernetes cluster and node pool.
    Cluster,
    /// Kubeconfig retrieval.
    Credentials,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Project => write!(f, "project"),
            Self::Network => write!(f, "network"),
            Self::Cluster => write!(f, "cluster"),
            Self::Credentials => write!(f, "credentials"),
        }
    }
}

/// Errors raised while provisioning or connecting to the cluster.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// A descriptor field is missing or inconsistent. Raised before any
    /// provider call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider rejected a request.
    #[error("{stage} stage failed: {source}")]
    Provider {
        stage: Stage,
        #[source]
        source: ProviderError,
    },

    /// Credentials were requested before the control plane was live.
    #[error("Cluster {cluster} is not ready (state: {state})")]
    HandleNotReady { cluster: String, state: ClusterState },

    /// The control plane did not come up within the bound.
    #[error("Cluster {cluster} not running after {waited_secs}s (last state: {state})")]
    Timeout {
        cluster: String,
        state: ClusterState,
        waited_secs: u64,
    },

    /// A deleted cluster was still listed when the bound elapsed.
    #[error("Cluster {cluster} still present after {waited_secs}s (last state: {state})")]
    DeleteTimeout {
        cluster: String,
        state: ClusterState,
        waited_secs: u64,
    },
}

impl ProvisionError {
    pub(crate) fn at(stage: Stage) -> impl FnOnce(ProviderError) -> Self {
        move |source| Self::Provider { stage, source }
    }

    /// Stage that failed, when the failure came from the provider.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Provider { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Live reference to a provisioned cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHandle {
    /// Provider cluster identifier.
    pub id: String,
    /// Cluster name.
    pub name: String,
    /// Region slug.
    pub region: String,
    /// Kubernetes version slug.
    pub version: String,
    /// Owning project.
    pub project_id: String,
    /// Attached network.
    pub network_id: String,
    /// API server endpoint, once known.
    pub endpoint: Option<String>,
    /// Lifecycle state at the time of the last read.
    pub state: ClusterState,
    /// Node count.
    pub node_count: u32,
}

impl ClusterHandle {
    fn from_record(record: ClusterRecord, project: &ProjectId, network: &NetworkId) -> Self {
        Self {
            id: record.id,
            name: record.name,
            region: record.region,
            version: record.version,
            project_id: project.as_str().to_string(),
            network_id: record
                .network_id
                .unwrap_or_else(|| network.as_str().to_string()),
            endpoint: record.endpoint,
            state: record.state,
            node_count: record.node_count,
        }
    }

    /// Whether the control plane is live and reachable.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self.state, ClusterState::Running | ClusterState::Degraded)
            && self.endpoint.is_some()
    }
}

/// Turns descriptors into a live managed cluster.
#[derive(Clone)]
pub struct ClusterProvisioner {
    provider: Arc<dyn CloudProvider>,
    poll_interval: Duration,
    delete_timeout: Duration,
}

impl ClusterProvisioner {
    /// Create a provisioner over a provider.
    #[must_use]
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self {
            provider,
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            delete_timeout: Duration::from_secs(DELETE_TIMEOUT_SECS),
        }
    }

    /// Override the readiness polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override how long teardown waits for the cluster to be gone.
    #[must_use]
    pub fn with_delete_timeout(mut self, timeout: Duration) -> Self {
        self.delete_timeout = timeout;
        self
    }

    /// Provider backing this provisioner.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn CloudProvider> {
        &self.provider
    }

    /// Converge the project, network and cluster described by `descriptors`.
    ///
    /// # Errors
    /// Returns [`ProvisionError::Configuration`] before any provider call if
    /// the descriptors are invalid, or [`ProvisionError::Provider`] tagged
    /// with the failing stage.
    pub async fn provision(&self, descriptors: &Descriptors) -> Result<ClusterHandle, ProvisionError> {
        descriptors.validate().map_err(ProvisionError::Configuration)?;

        let project = self.ensure_project(descriptors).await?;
        let network = self.ensure_network(&project, descriptors).await?;
        let record = self.ensure_cluster(&project, &network, descriptors).await?;

        self.provider
            .assign_cluster(&project, &record.id)
            .await
            .map_err(ProvisionError::at(Stage::Cluster))?;

        let handle = ClusterHandle::from_record(record, &project, &network);
        info!(
            cluster_id = %handle.id,
            state = %handle.state,
            "Cluster converged"
        );
        Ok(handle)
    }

    async fn ensure_project(&self, descriptors: &Descriptors) -> Result<ProjectId, ProvisionError> {
        let desc = &descriptors.project;
        let existing = self
            .provider
            .find_project(&desc.name)
            .await
            .map_err(ProvisionError::at(Stage::Project))?;

        let record = if let Some(record) = existing {
            debug!(project_id = %record.id, "Project already exists");
            record
        } else {
            self.provider
                .create_project(&CreateProjectRequest::from(desc))
                .await
                .map_err(ProvisionError::at(Stage::Project))?
        };

        Ok(ProjectId::from_record(&record))
    }

    async fn ensure_network(
        &self,
        project: &ProjectId,
        descriptors: &Descriptors,
    ) -> Result<NetworkId, ProvisionError> {
        let desc = &descriptors.network;
        let existing = self
            .provider
            .find_network(&desc.name)
            .await
            .map_err(ProvisionError::at(Stage::Network))?;

        let record = if let Some(record) = existing {
            if record.region != desc.region {
                return Err(ProvisionError::Provider {
                    stage: Stage::Network,
                    source: ProviderError::Config(format!(
                        "network {} exists in region {}, expected {}",
                        record.name, record.region, desc.region
                    )),
                });
            }
            debug!(vpc_id = %record.id, "VPC already exists");
            record
        } else {
            self.provider
                .create_network(&CreateNetworkRequest::new(project, desc))
                .await
                .map_err(ProvisionError::at(Stage::Network))?
        };

        Ok(NetworkId::from_record(&record))
    }

    async fn ensure_cluster(
        &self,
        project: &ProjectId,
        network: &NetworkId,
        descriptors: &Descriptors,
    ) -> Result<ClusterRecord, ProvisionError> {
        let desc = &descriptors.cluster;
        let existing = self
            .provider
            .find_cluster(&desc.name)
            .await
            .map_err(ProvisionError::at(Stage::Cluster))?;

        if let Some(record) = existing {
            debug!(cluster_id = %record.id, state = %record.state, "Cluster already exists");
            if record.node_count != desc.node_pool.node_count {
                warn!(
                    cluster_id = %record.id,
                    actual = record.node_count,
                    desired = desc.node_pool.node_count,
                    "Existing cluster node count differs from descriptor"
                );
            }
            return Ok(record);
        }

        self.provider
            .create_cluster(&CreateClusterRequest::new(project, network, desc))
            .await
            .map_err(ProvisionError::at(Stage::Cluster))
    }

    /// Refresh a handle from the provider.
    ///
    /// # Errors
    /// Returns [`ProvisionError::Provider`] if the read fails.
    pub async fn refresh(&self, handle: &ClusterHandle) -> Result<ClusterHandle, ProvisionError> {
        let record = self
            .provider
            .get_cluster(&handle.id)
            .await
            .map_err(ProvisionError::at(Stage::Cluster))?;

        Ok(ClusterHandle {
            endpoint: record.endpoint,
            state: record.state,
            node_count: record.node_count,
            version: record.version,
            ..handle.clone()
        })
    }

    /// Wait until the control plane reports running, up to `timeout`.
    ///
    /// # Errors
    /// Returns [`ProvisionError::Timeout`] when the bound elapses, or
    /// [`ProvisionError::Provider`] if the cluster enters the error state or
    /// a read fails.
    pub async fn wait_ready(
        &self,
        handle: &ClusterHandle,
        timeout: Duration,
    ) -> Result<ClusterHandle, ProvisionError> {
        info!(cluster_id = %handle.id, timeout_secs = timeout.as_secs(), "Waiting for control plane");

        let start = Instant::now();
        let mut current = handle.clone();

        loop {
            if current.is_live() {
                info!(cluster_id = %current.id, "Control plane is running");
                return Ok(current);
            }

            if current.state == ClusterState::Error {
                return Err(ProvisionError::Provider {
                    stage: Stage::Cluster,
                    source: ProviderError::Api {
                        status: 0,
                        message: format!("cluster {} entered error state", current.id),
                    },
                });
            }

            if start.elapsed() >= timeout {
                return Err(ProvisionError::Timeout {
                    cluster: current.id,
                    state: current.state,
                    waited_secs: timeout.as_secs(),
                });
            }

            tokio::time::sleep(self.poll_interval).await;
            current = self.refresh(&current).await?;

            debug!(
                cluster_id = %current.id,
                state = %current.state,
                elapsed_secs = start.elapsed().as_secs(),
                "Polling cluster state"
            );
        }
    }

    /// Delete the cluster, network and project named by `descriptors`, in
    /// reverse creation order. Absent resources are skipped.
    ///
    /// Cluster deletion is asynchronous on the provider side and the network
    /// cannot be removed while it still has members, so the cluster must be
    /// gone from the listing before the network delete is sent.
    ///
    /// # Errors
    /// Returns [`ProvisionError::Provider`] tagged with the failing stage, or
    /// [`ProvisionError::DeleteTimeout`] if the cluster outlives the bound.
    pub async fn teardown(&self, descriptors: &Descriptors) -> Result<(), ProvisionError> {
        descriptors.validate().map_err(ProvisionError::Configuration)?;

        if let Some(cluster) = self
            .provider
            .find_cluster(&descriptors.cluster.name)
            .await
            .map_err(ProvisionError::at(Stage::Cluster))?
        {
            if cluster.state == ClusterState::Deleting {
                debug!(cluster_id = %cluster.id, "Cluster deletion already in progress");
            } else {
                self.provider
                    .delete_cluster(&cluster.id)
                    .await
                    .map_err(ProvisionError::at(Stage::Cluster))?;
            }
            self.wait_deleted(cluster).await?;
        }

        if let Some(network) = self
            .provider
            .find_network(&descriptors.network.name)
            .await
            .map_err(ProvisionError::at(Stage::Network))?
        {
            self.provider
                .delete_network(&network.id)
                .await
                .map_err(ProvisionError::at(Stage::Network))?;
        }

        if let Some(project) = self
            .provider
            .find_project(&descriptors.project.name)
            .await
            .map_err(ProvisionError::at(Stage::Project))?
        {
            self.provider
                .delete_project(&project.id)
                .await
                .map_err(ProvisionError::at(Stage::Project))?;
        }

        info!(project = %descriptors.project.name, "Teardown complete");
        Ok(())
    }

    async fn wait_deleted(&self, cluster: ClusterRecord) -> Result<(), ProvisionError> {
        info!(
            cluster_id = %cluster.id,
            timeout_secs = self.delete_timeout.as_secs(),
            "Waiting for cluster deletion"
        );

        let start = Instant::now();
        let mut state = cluster.state;

        loop {
            match self
                .provider
                .find_cluster(&cluster.name)
                .await
                .map_err(ProvisionError::at(Stage::Cluster))?
            {
                Some(current) if current.id == cluster.id => state = current.state,
                _ => {
                    info!(cluster_id = %cluster.id, "Cluster deleted");
                    return Ok(());
                }
            }

            if start.elapsed() >= self.delete_timeout {
                return Err(ProvisionError::DeleteTimeout {
                    cluster: cluster.id,
                    state,
                    waited_secs: self.delete_timeout.as_secs(),
                });
            }

            debug!(
                cluster_id = %cluster.id,
                state = %state,
                elapsed_secs = start.elapsed().as_secs(),
                "Cluster still present"
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
