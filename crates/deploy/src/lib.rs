//! Validator workload deployment onto a provisioned cluster.
//!
//! Given a [`midl_cloud::ConnectionContext`], the [`Connector`] builds
//! cluster and release clients and the [`DeploymentPipeline`] converges:
//!
//! 1. the workload namespace
//! 2. a `LoadBalancer` service for peer-to-peer traffic
//! 3. the service's external address ([`PendingAddress`])
//! 4. the validator chart, configured to advertise that address

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod address;
pub mod cluster;
pub mod connector;
pub mod error;
pub mod pipeline;
pub mod release;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use address::PendingAddress;
pub use cluster::{ClusterApi, KubeClusterApi, LoadBalancerSpec, SKIP_AWAIT_ANNOTATION};
pub use connector::{Connector, KubeConnector, Workload};
pub use error::{ApiError, DeployError, ReleaseError};
pub use pipeline::{DeployStage, DeploymentOutput, DeploymentPipeline, WorkloadSpec, P2P_PORT};
pub use release::{HelmCli, ReleaseInstaller, ReleaseRecord, ReleaseRequest, ReleaseValues};
