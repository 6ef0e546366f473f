//! Late-bound external address of a load-balanced service.
//!
//! The provider fills `status.loadBalancer.ingress` some time after the
//! service is created. [`PendingAddress`] makes that explicit: a
//! non-blocking [`PendingAddress::try_get`] with a distinct "not yet"
//! outcome, and a bounded [`PendingAddress::wait`].

use std::net::IpAddr;
use std::time::Duration;

use tracing::{debug, info};

use crate::cluster::ClusterApi;
use crate::error::DeployError;

/// Default polling interval while waiting for the ingress address.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// An ingress address that may not have been assigned yet.
pub struct PendingAddress<'a> {
    api: &'a dyn ClusterApi,
    namespace: String,
    service: String,
    poll_interval: Duration,
}

impl<'a> PendingAddress<'a> {
    /// Track the ingress address of `namespace/service`.
    #[must_use]
    pub fn new(api: &'a dyn ClusterApi, namespace: &str, service: &str) -> Self {
        Self {
            api,
            namespace: namespace.to_string(),
            service: service.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Read the first published address, if any.
    ///
    /// # Errors
    /// Returns [`DeployError::Service`] if the service cannot be read.
    pub async fn try_get(&self) -> Result<Option<IpAddr>, DeployError> {
        let ips = self
            .api
            .ingress_ips(&self.namespace, &self.service)
            .await
            .map_err(|source| DeployError::Service {
                namespace: self.namespace.clone(),
                service: self.service.clone(),
                source,
            })?;
        Ok(ips.into_iter().next())
    }

    /// Wait for the first published address, up to `timeout`.
    ///
    /// # Errors
    /// Returns [`DeployError::AddressUnavailable`] when the bound elapses, or
    /// [`DeployError::Service`] if a read fails.
    pub async fn wait(&self, timeout: Duration) -> Result<IpAddr, DeployError> {
        let ip = tokio::time::timeout(timeout, self.poll_until_assigned())
            .await
            .map_err(|_| DeployError::AddressUnavailable {
                namespace: self.namespace.clone(),
                service: self.service.clone(),
                waited_secs: timeout.as_secs(),
            })??;

        info!(namespace = %self.namespace, service = %self.service, %ip, "Ingress address resolved");
        Ok(ip)
    }

    async fn poll_until_assigned(&self) -> Result<IpAddr, DeployError> {
        loop {
            if let Some(ip) = self.try_get().await? {
                return Ok(ip);
            }
            debug!(
                namespace = %self.namespace,
                service = %self.service,
                "Ingress address not assigned yet"
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;

    #[tokio::test]
    async fn test_try_get_reports_not_yet() {
        let cluster = FakeCluster::default();
        cluster.seed_service("ns", "lb");

        let pending = PendingAddress::new(&cluster, "ns", "lb");
        assert_eq!(pending.try_get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wait_returns_first_address() {
        let cluster = FakeCluster::default()
            .assigning_after(2, vec!["203.0.113.9".parse().unwrap(), "203.0.113.10".parse().unwrap()]);
        cluster.seed_service("ns", "lb");

        let ip = PendingAddress::new(&cluster, "ns", "lb")
            .with_poll_interval(Duration::from_millis(5))
            .wait(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(ip.to_string(), "203.0.113.9");
    }

    #[tokio::test]
    async fn test_wait_is_bounded() {
        let cluster = FakeCluster::default();
        cluster.seed_service("ns", "lb");

        let err = PendingAddress::new(&cluster, "ns", "lb")
            .with_poll_interval(Duration::from_millis(5))
            .wait(Duration::from_millis(40))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::AddressUnavailable { .. }));
    }
}
