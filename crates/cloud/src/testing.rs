//! In-memory provider for tests.
//!
//! Keeps resources in a map keyed by name, so find-before-create behaves
//! like the real API. Every create is logged for assertions. Cluster
//! deletion can be deferred, and a network with a cluster still attached
//! refuses deletion, as on DigitalOcean.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::providers::{
    CloudProvider, ClusterRecord, ClusterState, CreateClusterRequest, CreateNetworkRequest,
    CreateProjectRequest, NetworkRecord, ProjectId, ProjectRecord, ProviderError,
};
use crate::provisioner::Stage;

#[derive(Default)]
struct Inner {
    next_id: u32,
    projects: Vec<ProjectRecord>,
    networks: Vec<NetworkRecord>,
    clusters: Vec<ClusterRecord>,
    project_requests: Vec<CreateProjectRequest>,
    network_requests: Vec<CreateNetworkRequest>,
    cluster_requests: Vec<CreateClusterRequest>,
    assignments: Vec<(String, String)>,
    events: Vec<String>,
    polls_remaining: u32,
    pending_deletes: Vec<(String, u32)>,
}

/// A [`CloudProvider`] backed by memory.
#[derive(Default)]
pub struct InMemoryProvider {
    inner: Mutex<Inner>,
    polls_until_running: u32,
    deferred_deletes: u32,
    fail_on: Option<Stage>,
}

impl InMemoryProvider {
    /// Clusters start provisioning and turn running after `polls` reads.
    #[must_use]
    pub fn with_polls_until_running(mut self, polls: u32) -> Self {
        self.polls_until_running = polls;
        self
    }

    /// Deleted clusters stay listed, in the deleting state, for `finds`
    /// further cluster lookups.
    #[must_use]
    pub fn with_deferred_deletes(mut self, finds: u32) -> Self {
        self.deferred_deletes = finds;
        self
    }

    /// Reject every create request for `stage` with an API error.
    #[must_use]
    pub fn failing_on(mut self, stage: Stage) -> Self {
        self.fail_on = Some(stage);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn reject(&self, stage: Stage) -> Result<(), ProviderError> {
        if self.fail_on == Some(stage) {
            return Err(ProviderError::Api {
                status: 422,
                message: format!("{stage} rejected"),
            });
        }
        Ok(())
    }

    /// Project create requests received.
    #[must_use]
    pub fn project_requests(&self) -> Vec<CreateProjectRequest> {
        self.lock().project_requests.clone()
    }

    /// Network create requests received.
    #[must_use]
    pub fn network_requests(&self) -> Vec<CreateNetworkRequest> {
        self.lock().network_requests.clone()
    }

    /// Cluster create requests received.
    #[must_use]
    pub fn cluster_requests(&self) -> Vec<CreateClusterRequest> {
        self.lock().cluster_requests.clone()
    }

    /// `(project_id, cluster_id)` assignments received.
    #[must_use]
    pub fn assignments(&self) -> Vec<(String, String)> {
        self.lock().assignments.clone()
    }

    /// Human-readable log of resources created, in order.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }
}

fn endpoint_for(id: &str) -> String {
    format!("https://{id}.k8s.example.test")
}

#[async_trait]
impl CloudProvider for InMemoryProvider {
    async fn find_project(&self, name: &str) -> Result<Option<ProjectRecord>, ProviderError> {
        Ok(self.lock().projects.iter().find(|p| p.name == name).cloned())
    }

    async fn create_project(
        &self,
        req: &CreateProjectRequest,
    ) -> Result<ProjectRecord, ProviderError> {
        self.reject(Stage::Project)?;
        let mut inner = self.lock();
        inner.next_id += 1;
        let record = ProjectRecord {
            id: format!("project-{}", inner.next_id),
            name: req.name.clone(),
        };
        inner.projects.push(record.clone());
        inner.project_requests.push(req.clone());
        inner.events.push(format!("project {} created", req.name));
        Ok(record)
    }

    async fn assign_cluster(
        &self,
        project: &ProjectId,
        cluster_id: &str,
    ) -> Result<(), ProviderError> {
        let mut inner = self.lock();
        let pair = (project.as_str().to_string(), cluster_id.to_string());
        if !inner.assignments.contains(&pair) {
            inner.assignments.push(pair);
        }
        Ok(())
    }

    async fn delete_project(&self, id: &str) -> Result<(), ProviderError> {
        self.lock().projects.retain(|p| p.id != id);
        Ok(())
    }

    async fn find_network(&self, name: &str) -> Result<Option<NetworkRecord>, ProviderError> {
        Ok(self.lock().networks.iter().find(|n| n.name == name).cloned())
    }

    async fn create_network(
        &self,
        req: &CreateNetworkRequest,
    ) -> Result<NetworkRecord, ProviderError> {
        self.reject(Stage::Network)?;
        let mut inner = self.lock();
        inner.next_id += 1;
        let record = NetworkRecord {
            id: format!("vpc-{}", inner.next_id),
            name: req.name().to_string(),
            region: req.region().to_string(),
        };
        inner.networks.push(record.clone());
        inner.network_requests.push(req.clone());
        inner
            .events
            .push(format!("network {} created in {}", req.name(), req.region()));
        Ok(record)
    }

    async fn delete_network(&self, id: &str) -> Result<(), ProviderError> {
        let mut inner = self.lock();
        if inner
            .clusters
            .iter()
            .any(|c| c.network_id.as_deref() == Some(id))
        {
            return Err(ProviderError::Api {
                status: 409,
                message: format!("vpc {id} still has members"),
            });
        }
        inner.networks.retain(|n| n.id != id);
        Ok(())
    }

    async fn find_cluster(&self, name: &str) -> Result<Option<ClusterRecord>, ProviderError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        for (_, remaining) in &mut inner.pending_deletes {
            *remaining = remaining.saturating_sub(1);
        }
        let gone: Vec<String> = inner
            .pending_deletes
            .iter()
            .filter(|(_, remaining)| *remaining == 0)
            .map(|(id, _)| id.clone())
            .collect();
        inner.pending_deletes.retain(|(_, remaining)| *remaining > 0);
        inner.clusters.retain(|c| !gone.contains(&c.id));

        Ok(inner.clusters.iter().find(|c| c.name == name).cloned())
    }

    async fn create_cluster(
        &self,
        req: &CreateClusterRequest,
    ) -> Result<ClusterRecord, ProviderError> {
        self.reject(Stage::Cluster)?;
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("cluster-{}", inner.next_id);
        let running = self.polls_until_running == 0;
        let record = ClusterRecord {
            endpoint: running.then(|| endpoint_for(&id)),
            id,
            name: req.name().to_string(),
            region: req.region().to_string(),
            version: req.version().to_string(),
            network_id: Some(req.network().as_str().to_string()),
            state: if running {
                ClusterState::Running
            } else {
                ClusterState::Provisioning
            },
            node_count: req.node_pool().node_count,
            created_at: None,
        };
        inner.polls_remaining = self.polls_until_running;
        inner.clusters.push(record.clone());
        inner.cluster_requests.push(req.clone());
        inner.events.push(format!(
            "cluster {} created in {} with {} node(s)",
            req.name(),
            req.region(),
            req.node_pool().node_count
        ));
        Ok(record)
    }

    async fn get_cluster(&self, id: &str) -> Result<ClusterRecord, ProviderError> {
        let mut inner = self.lock();
        if inner.polls_remaining > 0 {
            inner.polls_remaining -= 1;
        }
        let ready = inner.polls_remaining == 0;
        let cluster = inner
            .clusters
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        if ready {
            cluster.state = ClusterState::Running;
            cluster.endpoint = Some(endpoint_for(&cluster.id));
        }
        Ok(cluster.clone())
    }

    async fn get_kubeconfig(&self, id: &str) -> Result<String, ProviderError> {
        self.reject(Stage::Credentials)?;
        let inner = self.lock();
        let cluster = inner
            .clusters
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        let server = cluster.endpoint.clone().unwrap_or_default();
        Ok(format!(
            "apiVersion: v1\nkind: Config\nclusters:\n- name: {name}\n  cluster:\n    server: {server}\n\
             contexts:\n- name: {name}\n  context:\n    cluster: {name}\n    user: {name}-admin\n\
             current-context: {name}\nusers:\n- name: {name}-admin\n  user:\n    token: test\n",
            name = cluster.name
        ))
    }

    async fn delete_cluster(&self, id: &str) -> Result<(), ProviderError> {
        let mut inner = self.lock();
        if self.deferred_deletes == 0 {
            inner.clusters.retain(|c| c.id != id);
            return Ok(());
        }
        if let Some(cluster) = inner.clusters.iter_mut().find(|c| c.id == id) {
            cluster.state = ClusterState::Deleting;
            cluster.endpoint = None;
        }
        if !inner.pending_deletes.iter().any(|(pending, _)| pending == id) {
            inner
                .pending_deletes
                .push((id.to_string(), self.deferred_deletes));
        }
        Ok(())
    }
}
