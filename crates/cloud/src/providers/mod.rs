//! Cloud provider abstractions.
//!
//! This module defines the common trait and types for cloud providers.

pub mod digitalocean;
mod traits;

#[cfg(any(test, feature = "testing"))]
pub use traits::MockCloudProvider;
pub use traits::{
    CloudProvider, ClusterRecord, ClusterState, CreateClusterRequest, CreateNetworkRequest,
    CreateProjectRequest, NetworkId, NetworkRecord, ProjectId, ProjectRecord, ProviderError,
};

// Re-export provider clients
pub use digitalocean::DigitalOcean;
