//! Cloud provider trait and common types.
//!
//! The request types in this module enforce provisioning order: a
//! [`CreateNetworkRequest`] can only be built from a [`ProjectId`], and a
//! [`CreateClusterRequest`] only from a [`NetworkId`]. Both identifiers are
//! minted by the provisioner from provider responses and cannot be
//! constructed outside this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptors::{ClusterDescriptor, NetworkDescriptor, NodePoolDescriptor, ProjectDescriptor};

/// Errors that can occur during cloud provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Identifier of a project that exists on the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProjectId(String);

impl ProjectId {
    pub(crate) fn from_record(record: &ProjectRecord) -> Self {
        Self(record.id.clone())
    }

    /// Provider-assigned identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a virtual network that exists on the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NetworkId(String);

impl NetworkId {
    pub(crate) fn from_record(record: &NetworkRecord) -> Self {
        Self(record.id.clone())
    }

    /// Provider-assigned identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Provider records
// ============================================================================

/// A project container as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Provider identifier.
    pub id: String,
    /// Project name.
    pub name: String,
}

/// A virtual network as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// Provider identifier.
    pub id: String,
    /// VPC name.
    pub name: String,
    /// Region slug.
    pub region: String,
}

/// Managed Kubernetes cluster lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    /// Control plane is being created.
    Provisioning,
    /// Control plane is live.
    Running,
    /// Running with reduced capacity.
    Degraded,
    /// Provider reported an error.
    Error,
    /// Cluster is being deleted.
    Deleting,
    /// Unknown state.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provisioning => write!(f, "provisioning"),
            Self::Running => write!(f, "running"),
            Self::Degraded => write!(f, "degraded"),
            Self::Error => write!(f, "error"),
            Self::Deleting => write!(f, "deleting"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A managed Kubernetes cluster as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    /// Provider identifier.
    pub id: String,
    /// Cluster name.
    pub name: String,
    /// Region slug.
    pub region: String,
    /// Kubernetes version slug.
    pub version: String,
    /// Network the cluster is attached to.
    pub network_id: Option<String>,
    /// API server endpoint, present once the control plane is up.
    pub endpoint: Option<String>,
    /// Lifecycle state.
    pub state: ClusterState,
    /// Total nodes across pools.
    pub node_count: u32,
    /// When the cluster was created.
    pub created_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Requests
// ============================================================================

/// Request to create a project container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateProjectRequest {
    /// Project name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Environment tag.
    pub environment: String,
    /// Purpose tag.
    pub purpose: String,
}

impl From<&ProjectDescriptor> for CreateProjectRequest {
    fn from(desc: &ProjectDescriptor) -> Self {
        Self {
            name: desc.name.clone(),
            description: desc.description.clone(),
            environment: desc.environment.clone(),
            purpose: desc.purpose.clone(),
        }
    }
}

/// Request to create a virtual network inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateNetworkRequest {
    project: ProjectId,
    name: String,
    region: String,
}

impl CreateNetworkRequest {
    /// Build a network request scoped to an existing project.
    #[must_use]
    pub fn new(project: &ProjectId, desc: &NetworkDescriptor) -> Self {
        Self {
            project: project.clone(),
            name: desc.name.clone(),
            region: desc.region.clone(),
        }
    }

    /// Owning project.
    #[must_use]
    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    /// VPC name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Region slug.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Request to create a managed Kubernetes cluster inside a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateClusterRequest {
    project: ProjectId,
    network: NetworkId,
    name: String,
    version: String,
    region: String,
    node_pool: NodePoolDescriptor,
}

impl CreateClusterRequest {
    /// Build a cluster request attached to an existing network.
    #[must_use]
    pub fn new(project: &ProjectId, network: &NetworkId, desc: &ClusterDescriptor) -> Self {
        Self {
            project: project.clone(),
            network: network.clone(),
            name: desc.name.clone(),
            version: desc.version.clone(),
            region: desc.region.clone(),
            node_pool: desc.node_pool.clone(),
        }
    }

    /// Owning project.
    #[must_use]
    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    /// Network the cluster joins.
    #[must_use]
    pub fn network(&self) -> &NetworkId {
        &self.network
    }

    /// Cluster name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kubernetes version slug.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Region slug.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// The single node pool.
    #[must_use]
    pub fn node_pool(&self) -> &NodePoolDescriptor {
        &self.node_pool
    }
}

/// Trait for cloud providers hosting the validator cluster.
///
/// Every resource is addressed by a stable name; convergence (find before
/// create) is the provisioner's job, so implementations stay thin.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CloudProvider: Send + Sync {
    // ========================================================================
    // Projects
    // ========================================================================

    /// Find a project by name.
    async fn find_project(&self, name: &str) -> Result<Option<ProjectRecord>, ProviderError>;

    /// Create a project.
    async fn create_project(
        &self,
        req: &CreateProjectRequest,
    ) -> Result<ProjectRecord, ProviderError>;

    /// Attach a cluster to a project. Re-assigning is a no-op.
    async fn assign_cluster(&self, project: &ProjectId, cluster_id: &str)
        -> Result<(), ProviderError>;

    /// Delete a project.
    async fn delete_project(&self, id: &str) -> Result<(), ProviderError>;

    // ========================================================================
    // Networks
    // ========================================================================

    /// Find a virtual network by name.
    async fn find_network(&self, name: &str) -> Result<Option<NetworkRecord>, ProviderError>;

    /// Create a virtual network.
    async fn create_network(
        &self,
        req: &CreateNetworkRequest,
    ) -> Result<NetworkRecord, ProviderError>;

    /// Delete a virtual network.
    async fn delete_network(&self, id: &str) -> Result<(), ProviderError>;

    // ========================================================================
    // Managed Kubernetes
    // ========================================================================

    /// Find a cluster by name.
    async fn find_cluster(&self, name: &str) -> Result<Option<ClusterRecord>, ProviderError>;

    /// Create a cluster with its node pool.
    async fn create_cluster(
        &self,
        req: &CreateClusterRequest,
    ) -> Result<ClusterRecord, ProviderError>;

    /// Get cluster by ID.
    async fn get_cluster(&self, id: &str) -> Result<ClusterRecord, ProviderError>;

    /// Get the raw kubeconfig for a cluster.
    async fn get_kubeconfig(&self, id: &str) -> Result<String, ProviderError>;

    /// Delete a cluster.
    async fn delete_cluster(&self, id: &str) -> Result<(), ProviderError>;
}
