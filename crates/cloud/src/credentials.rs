//! Cluster access credentials.
//!
//! A [`ConnectionContext`] refers back to its cluster by id and is only
//! meaningful while that cluster exists.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::providers::CloudProvider;
use crate::provisioner::{ClusterHandle, ProvisionError, Stage};

/// Control-plane endpoint plus credential bundle for one cluster.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionContext {
    cluster_id: String,
    cluster_name: String,
    endpoint: String,
    #[serde(skip)]
    kubeconfig: String,
}

impl ConnectionContext {
    /// Cluster this context belongs to.
    #[must_use]
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Cluster name.
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// API server endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Raw kubeconfig YAML.
    #[must_use]
    pub fn kubeconfig(&self) -> &str {
        &self.kubeconfig
    }
}

// Keeps the credential out of logs.
impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("cluster_id", &self.cluster_id)
            .field("cluster_name", &self.cluster_name)
            .field("endpoint", &self.endpoint)
            .field("kubeconfig", &"<redacted>")
            .finish()
    }
}

/// Extracts connection contexts from cluster handles.
#[derive(Clone)]
pub struct CredentialBridge {
    provider: Arc<dyn CloudProvider>,
}

impl CredentialBridge {
    /// Create a bridge over a provider.
    #[must_use]
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self { provider }
    }

    /// Build the connection context for a live cluster.
    ///
    /// # Errors
    /// Returns [`ProvisionError::HandleNotReady`] if the handle does not
    /// report a running control plane, or a `credentials`-stage
    /// [`ProvisionError::Provider`] if the kubeconfig cannot be fetched.
    pub async fn extract(&self, handle: &ClusterHandle) -> Result<ConnectionContext, ProvisionError> {
        let endpoint = match (&handle.endpoint, handle.is_live()) {
            (Some(endpoint), true) => endpoint.clone(),
            _ => {
                debug!(cluster_id = %handle.id, state = %handle.state, "Cluster not live yet");
                return Err(ProvisionError::HandleNotReady {
                    cluster: handle.id.clone(),
                    state: handle.state,
                });
            }
        };

        let kubeconfig = self
            .provider
            .get_kubeconfig(&handle.id)
            .await
            .map_err(ProvisionError::at(Stage::Credentials))?;

        info!(cluster_id = %handle.id, endpoint = %endpoint, "Connection context ready");

        Ok(ConnectionContext {
            cluster_id: handle.id.clone(),
            cluster_name: handle.name.clone(),
            endpoint,
            kubeconfig,
        })
    }
}
