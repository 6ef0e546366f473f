//! Workload deployment: namespace → service → address → release.
//!
//! The validator must advertise the load balancer's external address, but a
//! load balancer normally waits for matching pods before it is considered
//! ready. The pipeline breaks that cycle by creating the service with
//! readiness gating disabled, reading the address back, and only then
//! installing the release that starts the pods.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::address::{PendingAddress, DEFAULT_POLL_INTERVAL};
use crate::cluster::{ClusterApi, LoadBalancerSpec};
use crate::error::DeployError;
use crate::release::{
    HelperImages, NodeImages, ReleaseInstaller, ReleaseRecord, ReleaseRequest, ReleaseValues,
};

/// Peer-to-peer port exposed by the load balancer and advertised by the node.
pub const P2P_PORT: u16 = 31333;

/// Label value selecting validator pods.
pub const APP_LABEL: &str = "polkadot-node";

/// Pipeline states, in order. `ReleaseInstalled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStage {
    /// Namespace exists.
    NamespaceCreated,
    /// Load balancer exists; address may still be pending.
    ServiceProvisioning,
    /// External address is known.
    AddressResolved,
    /// Chart installed.
    ReleaseInstalled,
}

impl std::fmt::Display for DeployStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NamespaceCreated => write!(f, "namespace created"),
            Self::ServiceProvisioning => write!(f, "service provisioning"),
            Self::AddressResolved => write!(f, "address resolved"),
            Self::ReleaseInstalled => write!(f, "release installed"),
        }
    }
}

impl DeployError {
    /// Last stage reached before this error.
    #[must_use]
    pub fn reached(&self) -> Option<DeployStage> {
        match self {
            Self::Connection { .. } | Self::Namespace { .. } => None,
            Self::Service { .. } => Some(DeployStage::NamespaceCreated),
            Self::AddressUnavailable { .. } => Some(DeployStage::ServiceProvisioning),
            Self::ReleaseInstall { .. } => Some(DeployStage::AddressResolved),
        }
    }
}

/// Everything the pipeline deploys. Chart-facing values are opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Namespace for all workload resources.
    pub namespace: String,
    /// Load balancer service name.
    pub service_name: String,
    /// Port name on the service.
    pub port_name: String,
    /// Helm release name.
    pub release_name: String,
    /// Chart path.
    pub chart: PathBuf,
    /// Polkadot node image.
    pub node_image: String,
    /// Archive downloader image.
    pub archive_downloader_image: String,
    /// Node key configurator image.
    pub node_key_configurator_image: String,
    /// Chain-data snapshot URL.
    pub archive_url: String,
    /// Chain identifier.
    pub chain: String,
    /// Validator display name.
    pub validator_name: String,
    /// Bound on the ingress address wait.
    pub address_timeout: Duration,
    /// Bound on the release install.
    pub release_timeout: Duration,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self {
            namespace: "test-validator-ns".to_string(),
            service_name: "midl-polkadot-lb".to_string(),
            port_name: "dot-p2p-port".to_string(),
            release_name: "midl-polkadot-test-validtor".to_string(),
            chart: PathBuf::from("./charts/polkadot/"),
            node_image: "parity/polkadot:v0.9.8".to_string(),
            archive_downloader_image: "midl/polkadot_archive_downloader".to_string(),
            node_key_configurator_image: "midl/polkadot_node_key_configurator".to_string(),
            archive_url: "https://ksm-rocksdb.polkashots.io/snapshot".to_string(),
            chain: "kusama".to_string(),
            validator_name: "midl-polkadot-test-validtor".to_string(),
            address_timeout: Duration::from_secs(600),
            release_timeout: Duration::from_secs(1800),
        }
    }
}

impl WorkloadSpec {
    /// The peer-to-peer load balancer.
    ///
    /// `skip_await` is always set: the pods behind this service need its
    /// address to start, so waiting for them here would never finish.
    #[must_use]
    pub fn load_balancer(&self) -> LoadBalancerSpec {
        LoadBalancerSpec {
            namespace: self.namespace.clone(),
            name: self.service_name.clone(),
            app_label: APP_LABEL.to_string(),
            port: P2P_PORT,
            port_name: self.port_name.clone(),
            skip_await: true,
        }
    }

    /// Chart values advertising `ip`.
    #[must_use]
    pub fn values_for(&self, ip: IpAddr) -> ReleaseValues {
        ReleaseValues {
            images: NodeImages {
                polkadot_node: self.node_image.clone(),
            },
            polkadot_k8s_images: HelperImages {
                polkadot_archive_downloader: self.archive_downloader_image.clone(),
                polkadot_node_key_configurator: self.node_key_configurator_image.clone(),
            },
            polkadot_archive_url: self.archive_url.clone(),
            chain: self.chain.clone(),
            polkadot_validator_name: self.validator_name.clone(),
            p2p_ip: ip.to_string(),
            p2p_port: P2P_PORT,
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentOutput {
    /// Public endpoint of the validator.
    pub ingress_ip: IpAddr,
    /// Public peer-to-peer port.
    pub p2p_port: u16,
    /// Workload namespace.
    pub namespace: String,
    /// Load balancer service name.
    pub service: String,
    /// Whether this run created the namespace (false if it already existed).
    pub namespace_created: bool,
    /// Whether this run created the service (false if it already existed).
    pub service_created: bool,
    /// Installed release.
    pub release: ReleaseRecord,
    /// States passed through, in order.
    pub stages: Vec<DeployStage>,
}

/// Runs the four-step deployment against one cluster.
pub struct DeploymentPipeline<'a> {
    cluster: &'a dyn ClusterApi,
    releases: &'a dyn ReleaseInstaller,
    poll_interval: Duration,
}

impl<'a> DeploymentPipeline<'a> {
    /// Create a pipeline.
    #[must_use]
    pub fn new(cluster: &'a dyn ClusterApi, releases: &'a dyn ReleaseInstaller) -> Self {
        Self {
            cluster,
            releases,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the ingress address polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Converge the workload. Nothing is rolled back on failure.
    ///
    /// # Errors
    /// Returns the [`DeployError`] of the first stage that fails.
    pub async fn run(&self, spec: &WorkloadSpec) -> Result<DeploymentOutput, DeployError> {
        let mut stages = Vec::with_capacity(4);

        let namespace_created = self.ensure_namespace(&spec.namespace).await?;
        stages.push(DeployStage::NamespaceCreated);

        let lb = spec.load_balancer();
        let service_created = self.ensure_service(&lb).await?;
        stages.push(DeployStage::ServiceProvisioning);

        let ingress_ip = PendingAddress::new(self.cluster, &lb.namespace, &lb.name)
            .with_poll_interval(self.poll_interval)
            .wait(spec.address_timeout)
            .await?;
        stages.push(DeployStage::AddressResolved);

        let request = ReleaseRequest {
            name: spec.release_name.clone(),
            chart: spec.chart.clone(),
            namespace: spec.namespace.clone(),
            values: spec.values_for(ingress_ip),
            timeout: spec.release_timeout,
        };
        let release = self
            .releases
            .install(&request)
            .await
            .map_err(|source| DeployError::ReleaseInstall {
                release: spec.release_name.clone(),
                source,
            })?;
        stages.push(DeployStage::ReleaseInstalled);

        info!(
            namespace = %spec.namespace,
            release = %release.name,
            %ingress_ip,
            p2p_port = P2P_PORT,
            "Validator deployed"
        );

        Ok(DeploymentOutput {
            ingress_ip,
            p2p_port: P2P_PORT,
            namespace: spec.namespace.clone(),
            service: lb.name,
            namespace_created,
            service_created,
            release,
            stages,
        })
    }

    /// Returns whether the namespace was created by this call.
    async fn ensure_namespace(&self, name: &str) -> Result<bool, DeployError> {
        let wrap = |source| DeployError::Namespace {
            namespace: name.to_string(),
            source,
        };

        if self.cluster.namespace_exists(name).await.map_err(wrap)? {
            debug!(namespace = name, "Namespace already exists");
            return Ok(false);
        }

        self.cluster.create_namespace(name).await.map_err(wrap)?;
        Ok(true)
    }

    /// Returns whether the service was created by this call.
    async fn ensure_service(&self, lb: &LoadBalancerSpec) -> Result<bool, DeployError> {
        let wrap = |source| DeployError::Service {
            namespace: lb.namespace.clone(),
            service: lb.name.clone(),
            source,
        };

        if self
            .cluster
            .service_exists(&lb.namespace, &lb.name)
            .await
            .map_err(wrap)?
        {
            debug!(namespace = %lb.namespace, service = %lb.name, "Service already exists");
            return Ok(false);
        }

        // Readiness gating is off for this service (see `WorkloadSpec::load_balancer`).
        self.cluster.create_service(lb).await.map_err(wrap)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCluster, FakeReleases};

    fn spec() -> WorkloadSpec {
        WorkloadSpec {
            address_timeout: Duration::from_millis(200),
            ..WorkloadSpec::default()
        }
    }

    fn lb_ip() -> IpAddr {
        "203.0.113.9".parse().unwrap()
    }

    #[tokio::test]
    async fn test_release_advertises_resolved_address() {
        let cluster = FakeCluster::default().assigning_after(1, vec![lb_ip()]);
        let releases = FakeReleases::default();

        let output = DeploymentPipeline::new(&cluster, &releases)
            .with_poll_interval(Duration::from_millis(5))
            .run(&spec())
            .await
            .unwrap();

        let installed = releases.requests();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].values.p2p_ip, "203.0.113.9");
        assert_eq!(installed[0].values.p2p_port, 31333);
        assert_eq!(installed[0].namespace, "test-validator-ns");
        assert_eq!(output.ingress_ip, lb_ip());
        assert_eq!(
            output.stages,
            vec![
                DeployStage::NamespaceCreated,
                DeployStage::ServiceProvisioning,
                DeployStage::AddressResolved,
                DeployStage::ReleaseInstalled,
            ]
        );
    }

    #[tokio::test]
    async fn test_service_created_without_backends() {
        // The fake refuses gated services while no pods match.
        let cluster = FakeCluster::default().assigning_after(0, vec![lb_ip()]);
        let releases = FakeReleases::default();

        DeploymentPipeline::new(&cluster, &releases)
            .run(&spec())
            .await
            .unwrap();

        let created = cluster.created_services();
        assert_eq!(created.len(), 1);
        assert!(created[0].skip_await);
        assert_eq!(cluster.matching_pods(), 0);
    }

    #[tokio::test]
    async fn test_gated_service_would_deadlock() {
        let cluster = FakeCluster::default();
        let gated = LoadBalancerSpec {
            skip_await: false,
            ..spec().load_balancer()
        };
        assert!(cluster.create_service(&gated).await.is_err());
    }

    #[tokio::test]
    async fn test_rerun_after_release_failure_only_retries_release() {
        let cluster = FakeCluster::default().assigning_after(0, vec![lb_ip()]);
        let failing = FakeReleases::failing();

        let err = DeploymentPipeline::new(&cluster, &failing)
            .run(&spec())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ReleaseInstall { .. }));
        assert_eq!(err.reached(), Some(DeployStage::AddressResolved));
        assert_eq!(cluster.created_namespaces().len(), 1);
        assert_eq!(cluster.created_services().len(), 1);

        let releases = FakeReleases::default();
        let output = DeploymentPipeline::new(&cluster, &releases)
            .run(&spec())
            .await
            .unwrap();

        assert!(!output.namespace_created);
        assert!(!output.service_created);
        assert_eq!(cluster.created_namespaces().len(), 1);
        assert_eq!(cluster.created_services().len(), 1);
        assert_eq!(releases.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_address_keeps_namespace_and_service() {
        let cluster = FakeCluster::default();
        let releases = FakeReleases::default();

        let err = DeploymentPipeline::new(&cluster, &releases)
            .with_poll_interval(Duration::from_millis(5))
            .run(&spec())
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::AddressUnavailable { .. }));
        assert_eq!(err.reached(), Some(DeployStage::ServiceProvisioning));
        assert!(releases.requests().is_empty());
        assert!(cluster.has_service("test-validator-ns", "midl-polkadot-lb"));
    }
}
