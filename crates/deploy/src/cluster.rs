//! Kubernetes API seam for namespaces and the peer-to-peer load balancer.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Endpoints, Namespace, Service, ServicePort, ServiceSpec as K8sServiceSpec,
};
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

use crate::error::ApiError;

/// Annotation recording that readiness gating is disabled for a service.
pub const SKIP_AWAIT_ANNOTATION: &str = "midl.io/skip-await";

/// Polling interval when waiting for service endpoints.
const ENDPOINTS_POLL_SECS: u64 = 5;

/// Default bound for the endpoints wait on gated services.
const DEFAULT_ENDPOINTS_TIMEOUT_SECS: u64 = 300;

/// A `LoadBalancer` service exposing one TCP port to pods with `app=<app_label>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerSpec {
    /// Namespace.
    pub namespace: String,
    /// Service name.
    pub name: String,
    /// Value of the `app` label used as selector.
    pub app_label: String,
    /// Exposed port (also the target port).
    pub port: u16,
    /// Port name.
    pub port_name: String,
    /// When true, creation returns without waiting for ready backends.
    pub skip_await: bool,
}

impl LoadBalancerSpec {
    /// Render the Kubernetes object.
    #[must_use]
    pub fn to_service(&self) -> Service {
        let labels = BTreeMap::from([("app".to_string(), self.app_label.clone())]);
        let annotations = self.skip_await.then(|| {
            BTreeMap::from([(SKIP_AWAIT_ANNOTATION.to_string(), "true".to_string())])
        });

        Service {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels.clone()),
                annotations,
                ..Default::default()
            },
            spec: Some(K8sServiceSpec {
                type_: Some("LoadBalancer".to_string()),
                selector: Some(labels),
                ports: Some(vec![ServicePort {
                    name: Some(self.port_name.clone()),
                    port: i32::from(self.port),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Operations the deployment pipeline needs from the cluster.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Whether a namespace exists.
    async fn namespace_exists(&self, name: &str) -> Result<bool, ApiError>;

    /// Create a namespace.
    async fn create_namespace(&self, name: &str) -> Result<(), ApiError>;

    /// Whether a service exists.
    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool, ApiError>;

    /// Create a load-balanced service. Unless `spec.skip_await` is set, this
    /// waits (bounded) for at least one ready backend.
    async fn create_service(&self, spec: &LoadBalancerSpec) -> Result<(), ApiError>;

    /// External ingress IPs currently published for a service.
    async fn ingress_ips(&self, namespace: &str, name: &str) -> Result<Vec<IpAddr>, ApiError>;
}

/// [`ClusterApi`] backed by kube-rs.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
    endpoints_timeout: Duration,
}

impl KubeClusterApi {
    /// Wrap a client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoints_timeout: Duration::from_secs(DEFAULT_ENDPOINTS_TIMEOUT_SECS),
        }
    }

    /// Bound for the backend wait on gated services.
    #[must_use]
    pub fn with_endpoints_timeout(mut self, timeout: Duration) -> Self {
        self.endpoints_timeout = timeout;
        self
    }

    async fn wait_for_endpoints(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        let start = Instant::now();

        loop {
            let ready = api
                .get_opt(name)
                .await?
                .and_then(|ep| ep.subsets)
                .is_some_and(|subsets| {
                    subsets
                        .iter()
                        .any(|s| s.addresses.as_ref().is_some_and(|a| !a.is_empty()))
                });

            if ready {
                return Ok(());
            }

            if start.elapsed() >= self.endpoints_timeout {
                return Err(ApiError::Timeout {
                    secs: self.endpoints_timeout.as_secs(),
                    what: format!("ready endpoints for {namespace}/{name}"),
                });
            }

            debug!(namespace, service = name, "Waiting for service endpoints");
            tokio::time::sleep(Duration::from_secs(ENDPOINTS_POLL_SECS)).await;
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn namespace_exists(&self, name: &str) -> Result<bool, ApiError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn create_namespace(&self, name: &str) -> Result<(), ApiError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        match api.create(&PostParams::default(), &namespace).await {
            Ok(_) => {
                info!(namespace = name, "Created namespace");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                warn!(namespace = name, "Namespace appeared concurrently, keeping it");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool, ApiError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn create_service(&self, spec: &LoadBalancerSpec) -> Result<(), ApiError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &spec.namespace);

        match api.create(&PostParams::default(), &spec.to_service()).await {
            Ok(_) => info!(namespace = %spec.namespace, service = %spec.name, "Created service"),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                warn!(namespace = %spec.namespace, service = %spec.name, "Service already exists");
            }
            Err(kube::Error::Api(ae)) if ae.code == 422 => {
                return Err(ApiError::Rejected(ae.message));
            }
            Err(e) => return Err(e.into()),
        }

        if spec.skip_await {
            return Ok(());
        }

        self.wait_for_endpoints(&spec.namespace, &spec.name).await
    }

    async fn ingress_ips(&self, namespace: &str, name: &str) -> Result<Vec<IpAddr>, ApiError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = api.get(name).await?;

        let ips = service
            .status
            .and_then(|s| s.load_balancer)
            .and_then(|lb| lb.ingress)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|ingress| ingress.ip)
            .filter_map(|ip| ip.parse().ok())
            .collect();

        Ok(ips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(skip_await: bool) -> LoadBalancerSpec {
        LoadBalancerSpec {
            namespace: "test-validator-ns".into(),
            name: "midl-polkadot-lb".into(),
            app_label: "polkadot-node".into(),
            port: 31333,
            port_name: "dot-p2p-port".into(),
            skip_await,
        }
    }

    #[test]
    fn test_service_object_shape() {
        let svc = spec(true).to_service();
        let body = svc.spec.unwrap();

        assert_eq!(body.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(
            body.selector.unwrap().get("app").map(String::as_str),
            Some("polkadot-node")
        );
        let port = &body.ports.unwrap()[0];
        assert_eq!(port.port, 31333);
        assert_eq!(port.protocol.as_deref(), Some("TCP"));
        assert_eq!(port.name.as_deref(), Some("dot-p2p-port"));
        assert_eq!(svc.metadata.namespace.as_deref(), Some("test-validator-ns"));
    }

    #[test]
    fn test_skip_await_annotation() {
        let gated = spec(false).to_service();
        assert!(gated.metadata.annotations.is_none());

        let bypassed = spec(true).to_service();
        let annotations = bypassed.metadata.annotations.unwrap();
        assert_eq!(
            annotations.get(SKIP_AWAIT_ANNOTATION).map(String::as_str),
            Some("true")
        );
    }
}
