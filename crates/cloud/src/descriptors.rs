//! Declarative descriptors for the project, network and cluster.
//!
//! These are plain data. [`Descriptors::validate`] is the only behavior and
//! runs before any provider call is made.

use serde::{Deserialize, Serialize};

/// Logical grouping / billing container for every created resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    /// Project name, unique within the cloud account.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Environment tag (e.g., "Production").
    pub environment: String,
    /// Purpose tag (e.g., "Other").
    pub purpose: String,
}

/// Virtual private network the cluster is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    /// VPC name.
    pub name: String,
    /// Region slug (e.g., "ams3").
    pub region: String,
}

/// Homogeneous group of worker machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolDescriptor {
    /// Node pool name.
    pub name: String,
    /// Machine size slug (e.g., "s-4vcpu-8gb").
    pub size: String,
    /// Number of nodes, at least one.
    pub node_count: u32,
}

/// Managed Kubernetes cluster with a single node pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    /// Cluster name.
    pub name: String,
    /// Kubernetes version slug (e.g., "1.21.2-do.2").
    pub version: String,
    /// Region slug, must match the network region.
    pub region: String,
    /// The node pool.
    pub node_pool: NodePoolDescriptor,
}

/// Everything the provisioner needs for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptors {
    /// Project container.
    pub project: ProjectDescriptor,
    /// Virtual network.
    pub network: NetworkDescriptor,
    /// Kubernetes cluster.
    pub cluster: ClusterDescriptor,
}

impl Descriptors {
    /// Build the standard descriptor set for a name prefix.
    ///
    /// Every resource name is derived from the same `prefix`, so two runs
    /// with the same prefix address the same resources.
    #[must_use]
    pub fn for_prefix(prefix: &str, region: &str, version: &str, size: &str, node_count: u32) -> Self {
        Self {
            project: ProjectDescriptor {
                name: format!("{prefix}-polkadot"),
                description: "Project to confine midl polkadot/ksm resources".to_string(),
                environment: "Production".to_string(),
                purpose: "Other".to_string(),
            },
            network: NetworkDescriptor {
                name: format!("{prefix}-polkadot-vpc"),
                region: region.to_string(),
            },
            cluster: ClusterDescriptor {
                name: format!("{prefix}-polkadot-k8s"),
                version: version.to_string(),
                region: region.to_string(),
                node_pool: NodePoolDescriptor {
                    name: format!("{prefix}-polkadot-nodes"),
                    size: size.to_string(),
                    node_count,
                },
            },
        }
    }

    /// Check the descriptor set for missing fields and inconsistent values.
    ///
    /// # Errors
    /// Returns a message naming the first offending field.
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("project.name", &self.project.name),
            ("project.description", &self.project.description),
            ("project.environment", &self.project.environment),
            ("project.purpose", &self.project.purpose),
            ("network.name", &self.network.name),
            ("network.region", &self.network.region),
            ("cluster.name", &self.cluster.name),
            ("cluster.version", &self.cluster.version),
            ("cluster.region", &self.cluster.region),
            ("cluster.node_pool.name", &self.cluster.node_pool.name),
            ("cluster.node_pool.size", &self.cluster.node_pool.size),
        ];

        if let Some((field, _)) = fields.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(format!("{field} must not be empty"));
        }

        if self.cluster.node_pool.node_count == 0 {
            return Err("cluster.node_pool.node_count must be at least 1".to_string());
        }

        if self.network.region != self.cluster.region {
            return Err(format!(
                "network region '{}' does not match cluster region '{}'",
                self.network.region, self.cluster.region
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Descriptors {
        Descriptors::for_prefix("x", "ams3", "1.21.2-do.2", "s-4vcpu-8gb", 1)
    }

    #[test]
    fn test_for_prefix_names() {
        let d = sample();
        assert_eq!(d.project.name, "x-polkadot");
        assert_eq!(d.network.name, "x-polkadot-vpc");
        assert_eq!(d.cluster.name, "x-polkadot-k8s");
        assert_eq!(d.cluster.node_pool.name, "x-polkadot-nodes");
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_field() {
        let mut d = sample();
        d.cluster.version = "  ".to_string();
        let err = d.validate().unwrap_err();
        assert!(err.contains("cluster.version"));
    }

    #[test]
    fn test_rejects_zero_nodes() {
        let mut d = sample();
        d.cluster.node_pool.node_count = 0;
        assert!(d.validate().unwrap_err().contains("node_count"));
    }

    #[test]
    fn test_rejects_region_mismatch() {
        let mut d = sample();
        d.network.region = "nyc1".to_string();
        assert!(d.validate().unwrap_err().contains("does not match"));
    }
}
