//! `DigitalOcean` API request and response models.

use serde::{Deserialize, Serialize};

// ============================================================================
// Pagination
// ============================================================================

/// Links block on list responses.
#[derive(Debug, Default, Deserialize)]
pub struct Links {
    /// Page navigation, absent on single-page results.
    #[serde(default)]
    pub pages: Option<PageLinks>,
}

/// Page navigation links.
#[derive(Debug, Default, Deserialize)]
pub struct PageLinks {
    /// Absolute URL of the next page.
    pub next: Option<String>,
}

impl Links {
    /// Next page URL, if any.
    #[must_use]
    pub fn next(&self) -> Option<&str> {
        self.pages.as_ref()?.next.as_deref()
    }
}

// ============================================================================
// Project types
// ============================================================================

/// Project from API.
#[derive(Debug, Clone, Deserialize)]
pub struct DoProject {
    /// Project UUID.
    pub id: String,
    /// Project name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Purpose tag.
    #[serde(default)]
    pub purpose: String,
    /// Environment tag.
    #[serde(default)]
    pub environment: String,
    /// Whether this is the account default project.
    #[serde(default)]
    pub is_default: bool,
}

/// Project list response.
#[derive(Debug, Deserialize)]
pub struct ProjectListResponse {
    /// Projects.
    pub projects: Vec<DoProject>,
    /// Pagination.
    #[serde(default)]
    pub links: Links,
}

/// Single project response.
#[derive(Debug, Deserialize)]
pub struct ProjectResponse {
    /// Project details.
    pub project: DoProject,
}

/// Request body for creating a project.
#[derive(Debug, Serialize)]
pub struct CreateProjectBody {
    /// Project name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Purpose tag.
    pub purpose: String,
    /// Environment tag: "Development", "Staging" or "Production".
    pub environment: String,
}

/// Request body for assigning resources to a project.
#[derive(Debug, Serialize)]
pub struct AssignResourcesBody {
    /// Resource URNs, e.g. `do:kubernetes:<uuid>`.
    pub resources: Vec<String>,
}

/// Assigned resource.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignedResource {
    /// Resource URN.
    pub urn: String,
    /// Assignment status.
    pub status: Option<String>,
}

/// Assign resources response.
#[derive(Debug, Deserialize)]
pub struct AssignResourcesResponse {
    /// Assigned resources.
    pub resources: Vec<AssignedResource>,
}

// ============================================================================
// VPC types
// ============================================================================

/// VPC from API.
#[derive(Debug, Clone, Deserialize)]
pub struct Vpc {
    /// VPC UUID.
    pub id: String,
    /// VPC URN.
    pub urn: Option<String>,
    /// VPC name.
    pub name: String,
    /// Region slug.
    pub region: String,
    /// Private IP range.
    pub ip_range: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: String,
}

/// VPC list response.
#[derive(Debug, Deserialize)]
pub struct VpcListResponse {
    /// VPCs.
    pub vpcs: Vec<Vpc>,
    /// Pagination.
    #[serde(default)]
    pub links: Links,
}

/// Single VPC response.
#[derive(Debug, Deserialize)]
pub struct VpcResponse {
    /// VPC details.
    pub vpc: Vpc,
}

/// Request body for creating a VPC.
#[derive(Debug, Serialize)]
pub struct CreateVpcBody {
    /// VPC name.
    pub name: String,
    /// Region slug.
    pub region: String,
    /// Description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Private IP range; provider picks one when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_range: Option<String>,
}

// ============================================================================
// Kubernetes types
// ============================================================================

/// Kubernetes cluster from API.
#[derive(Debug, Clone, Deserialize)]
pub struct KubernetesCluster {
    /// Cluster UUID.
    pub id: String,
    /// Cluster name.
    pub name: String,
    /// Region slug.
    pub region: String,
    /// Version slug.
    pub version: String,
    /// VPC the cluster is attached to.
    pub vpc_uuid: Option<String>,
    /// API server endpoint.
    pub endpoint: Option<String>,
    /// Public IPv4 of the control plane.
    pub ipv4: Option<String>,
    /// Node pools.
    #[serde(default)]
    pub node_pools: Vec<NodePool>,
    /// Cluster status.
    pub status: ClusterStatus,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Created at.
    pub created_at: Option<String>,
}

/// Cluster status object.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterStatus {
    /// State: "running", "provisioning", "degraded", "error", "deleted",
    /// "upgrading", "deleting".
    pub state: String,
    /// Human readable message.
    pub message: Option<String>,
}

/// Node pool from API.
#[derive(Debug, Clone, Deserialize)]
pub struct NodePool {
    /// Pool UUID.
    pub id: Option<String>,
    /// Pool name.
    pub name: String,
    /// Droplet size slug.
    pub size: String,
    /// Node count.
    pub count: u32,
}

/// Cluster list response.
#[derive(Debug, Deserialize)]
pub struct KubernetesClusterListResponse {
    /// Clusters.
    pub kubernetes_clusters: Vec<KubernetesCluster>,
    /// Pagination.
    #[serde(default)]
    pub links: Links,
}

/// Single cluster response.
#[derive(Debug, Deserialize)]
pub struct KubernetesClusterResponse {
    /// Cluster details.
    pub kubernetes_cluster: KubernetesCluster,
}

/// Request body for creating a cluster.
#[derive(Debug, Serialize)]
pub struct CreateKubernetesClusterBody {
    /// Cluster name.
    pub name: String,
    /// Region slug.
    pub region: String,
    /// Version slug.
    pub version: String,
    /// VPC UUID.
    pub vpc_uuid: String,
    /// Node pools.
    pub node_pools: Vec<NodePoolSpec>,
    /// Tags.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Node pool in a create request.
#[derive(Debug, Serialize)]
pub struct NodePoolSpec {
    /// Droplet size slug.
    pub size: String,
    /// Pool name.
    pub name: String,
    /// Node count.
    pub count: u32,
}
