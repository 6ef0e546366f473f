//! Turns a [`ConnectionContext`] into live cluster and release clients.

use std::sync::Arc;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use midl_cloud::ConnectionContext;
use tracing::info;

use crate::cluster::{ClusterApi, KubeClusterApi};
use crate::error::DeployError;
use crate::release::{HelmCli, ReleaseInstaller};

/// Clients bound to one cluster.
#[derive(Clone)]
pub struct Workload {
    /// Namespace and service operations.
    pub cluster: Arc<dyn ClusterApi>,
    /// Chart installation.
    pub releases: Arc<dyn ReleaseInstaller>,
}

/// Builds [`Workload`] clients for a cluster.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to the cluster described by `ctx`.
    async fn connect(&self, ctx: &ConnectionContext) -> Result<Workload, DeployError>;
}

/// Connects through kube-rs and the `helm` binary.
pub struct KubeConnector {
    helm_binary: String,
}

impl KubeConnector {
    /// Use `helm_binary` for release installs.
    #[must_use]
    pub fn new(helm_binary: impl Into<String>) -> Self {
        Self {
            helm_binary: helm_binary.into(),
        }
    }
}

impl Default for KubeConnector {
    fn default() -> Self {
        Self::new("helm")
    }
}

#[async_trait]
impl Connector for KubeConnector {
    async fn connect(&self, ctx: &ConnectionContext) -> Result<Workload, DeployError> {
        let fail = |message: String| DeployError::Connection {
            cluster: ctx.cluster_id().to_string(),
            message,
        };

        let kubeconfig = Kubeconfig::from_yaml(ctx.kubeconfig())
            .map_err(|e| fail(format!("invalid kubeconfig: {e}")))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| fail(format!("failed to create Kubernetes config: {e}")))?;
        let client =
            Client::try_from(config).map_err(|e| fail(format!("failed to create client: {e}")))?;

        let releases = HelmCli::new(self.helm_binary.clone(), ctx.kubeconfig())
            .map_err(|e| fail(format!("failed to prepare helm: {e}")))?;

        info!(
            cluster = %ctx.cluster_name(),
            endpoint = %ctx.endpoint(),
            "Connected to cluster"
        );

        Ok(Workload {
            cluster: Arc::new(KubeClusterApi::new(client)),
            releases: Arc::new(releases),
        })
    }
}
