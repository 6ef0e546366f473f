//! In-memory cluster, release installer and connector for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use midl_cloud::ConnectionContext;

use crate::cluster::{ClusterApi, LoadBalancerSpec};
use crate::connector::{Connector, Workload};
use crate::error::{ApiError, DeployError, ReleaseError};
use crate::release::{ReleaseInstaller, ReleaseRecord, ReleaseRequest};

#[derive(Default)]
struct ClusterInner {
    namespaces: BTreeSet<String>,
    services: BTreeMap<(String, String), LoadBalancerSpec>,
    created_namespaces: Vec<String>,
    created_services: Vec<LoadBalancerSpec>,
    address_reads: usize,
    assign_after: Option<(usize, Vec<IpAddr>)>,
    ready_pods: usize,
}

/// Cluster with no pods and an optional, delayed ingress address.
///
/// Like a real load balancer without backends, creating a service that
/// waits for ready endpoints fails while no pods match.
#[derive(Default)]
pub struct FakeCluster {
    inner: Mutex<ClusterInner>,
}

impl FakeCluster {
    fn lock(&self) -> MutexGuard<'_, ClusterInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Publish `ips` once `reads` address reads have come back empty.
    #[must_use]
    pub fn assigning_after(self, reads: usize, ips: Vec<IpAddr>) -> Self {
        self.lock().assign_after = Some((reads, ips));
        self
    }

    /// Pretend `count` pods match every service selector.
    #[must_use]
    pub fn with_ready_pods(self, count: usize) -> Self {
        self.lock().ready_pods = count;
        self
    }

    /// Add an existing service (and its namespace) without logging a create.
    pub fn seed_service(&self, namespace: &str, name: &str) {
        let mut inner = self.lock();
        inner.namespaces.insert(namespace.to_string());
        inner.services.insert(
            (namespace.to_string(), name.to_string()),
            LoadBalancerSpec {
                namespace: namespace.to_string(),
                name: name.to_string(),
                app_label: String::new(),
                port: 0,
                port_name: String::new(),
                skip_await: true,
            },
        );
    }

    /// Namespaces created through the API, in order.
    #[must_use]
    pub fn created_namespaces(&self) -> Vec<String> {
        self.lock().created_namespaces.clone()
    }

    /// Services created through the API, in order.
    #[must_use]
    pub fn created_services(&self) -> Vec<LoadBalancerSpec> {
        self.lock().created_services.clone()
    }

    /// Whether `namespace/name` exists.
    #[must_use]
    pub fn has_service(&self, namespace: &str, name: &str) -> bool {
        self.lock()
            .services
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    /// Pods currently matching service selectors.
    #[must_use]
    pub fn matching_pods(&self) -> usize {
        self.lock().ready_pods
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn namespace_exists(&self, name: &str) -> Result<bool, ApiError> {
        Ok(self.lock().namespaces.contains(name))
    }

    async fn create_namespace(&self, name: &str) -> Result<(), ApiError> {
        let mut inner = self.lock();
        if inner.namespaces.insert(name.to_string()) {
            inner.created_namespaces.push(name.to_string());
        }
        Ok(())
    }

    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool, ApiError> {
        Ok(self.has_service(namespace, name))
    }

    async fn create_service(&self, spec: &LoadBalancerSpec) -> Result<(), ApiError> {
        let mut inner = self.lock();
        if !inner.namespaces.contains(&spec.namespace) {
            return Err(ApiError::Rejected(format!(
                "namespace {} not found",
                spec.namespace
            )));
        }
        if !spec.skip_await && inner.ready_pods == 0 {
            return Err(ApiError::Timeout {
                secs: 0,
                what: format!("ready endpoints for {}/{}", spec.namespace, spec.name),
            });
        }

        let key = (spec.namespace.clone(), spec.name.clone());
        if !inner.services.contains_key(&key) {
            inner.services.insert(key, spec.clone());
            inner.created_services.push(spec.clone());
        }
        Ok(())
    }

    async fn ingress_ips(&self, namespace: &str, name: &str) -> Result<Vec<IpAddr>, ApiError> {
        let mut inner = self.lock();
        if !inner
            .services
            .contains_key(&(namespace.to_string(), name.to_string()))
        {
            return Err(ApiError::Rejected(format!(
                "service {namespace}/{name} not found"
            )));
        }

        let reads = inner.address_reads;
        inner.address_reads += 1;
        Ok(match &inner.assign_after {
            Some((after, ips)) if reads >= *after => ips.clone(),
            _ => Vec::new(),
        })
    }
}

/// Release installer that records requests instead of running helm.
#[derive(Default)]
pub struct FakeReleases {
    requests: Mutex<Vec<ReleaseRequest>>,
    fail: bool,
}

impl FakeReleases {
    /// An installer whose every install fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Install requests received, including failed ones.
    #[must_use]
    pub fn requests(&self) -> Vec<ReleaseRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ReleaseInstaller for FakeReleases {
    async fn install(&self, req: &ReleaseRequest) -> Result<ReleaseRecord, ReleaseError> {
        let revision = {
            let mut requests = self
                .requests
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            requests.push(req.clone());
            u32::try_from(requests.len()).unwrap_or(u32::MAX)
        };

        if self.fail {
            return Err(ReleaseError::Helm {
                status: "exit status: 1".to_string(),
                stderr: "Error: timed out waiting for the condition".to_string(),
            });
        }

        Ok(ReleaseRecord {
            name: req.name.clone(),
            namespace: req.namespace.clone(),
            revision: Some(revision),
        })
    }
}

/// Connector handing out shared fakes and recording which clusters it saw.
pub struct FakeConnector {
    cluster: Arc<FakeCluster>,
    releases: Arc<FakeReleases>,
    connected: Mutex<Vec<String>>,
}

impl FakeConnector {
    /// Connect every context to the same fakes.
    #[must_use]
    pub fn new(cluster: Arc<FakeCluster>, releases: Arc<FakeReleases>) -> Self {
        Self {
            cluster,
            releases,
            connected: Mutex::new(Vec::new()),
        }
    }

    /// Cluster ids connected to, in order.
    #[must_use]
    pub fn connected(&self) -> Vec<String> {
        self.connected
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, ctx: &ConnectionContext) -> Result<Workload, DeployError> {
        if ctx.kubeconfig().is_empty() {
            return Err(DeployError::Connection {
                cluster: ctx.cluster_id().to_string(),
                message: "empty kubeconfig".to_string(),
            });
        }

        self.connected
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(ctx.cluster_id().to_string());

        Ok(Workload {
            cluster: self.cluster.clone(),
            releases: self.releases.clone(),
        })
    }
}
