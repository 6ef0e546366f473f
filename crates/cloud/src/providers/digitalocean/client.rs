//! `DigitalOcean` API client implementation.
//!
//! API Documentation: <https://docs.digitalocean.com/reference/api/>

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use super::models::{
    AssignResourcesBody, AssignResourcesResponse, CreateKubernetesClusterBody,
    CreateProjectBody, CreateVpcBody, DoProject, KubernetesCluster,
    KubernetesClusterListResponse, KubernetesClusterResponse, NodePoolSpec,
    ProjectListResponse, ProjectResponse, Vpc, VpcListResponse, VpcResponse,
};
use crate::providers::traits::{
    CloudProvider, ClusterRecord, ClusterState, CreateClusterRequest, CreateNetworkRequest,
    CreateProjectRequest, NetworkRecord, ProjectId, ProjectRecord, ProviderError,
};

/// Base URL for `DigitalOcean` API.
const API_BASE_URL: &str = "https://api.digitalocean.com/v2";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Page size for list calls.
const LIST_PAGE_SIZE: u32 = 200;

/// Tag applied to every cluster created by this tool.
const CLUSTER_TAG: &str = "midl-polkadot";

/// A page of a list endpoint.
trait ListPage: serde::de::DeserializeOwned {
    type Item;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

impl ListPage for ProjectListResponse {
    type Item = DoProject;

    fn into_parts(self) -> (Vec<DoProject>, Option<String>) {
        let next = self.links.next().map(str::to_string);
        (self.projects, next)
    }
}

impl ListPage for VpcListResponse {
    type Item = Vpc;

    fn into_parts(self) -> (Vec<Vpc>, Option<String>) {
        let next = self.links.next().map(str::to_string);
        (self.vpcs, next)
    }
}

impl ListPage for KubernetesClusterListResponse {
    type Item = KubernetesCluster;

    fn into_parts(self) -> (Vec<KubernetesCluster>, Option<String>) {
        let next = self.links.next().map(str::to_string);
        (self.kubernetes_clusters, next)
    }
}

/// `DigitalOcean` provider.
#[derive(Clone)]
pub struct DigitalOcean {
    /// HTTP client.
    client: Client,
    /// API token for authentication.
    api_token: String,
    /// API base URL without trailing slash.
    base_url: String,
}

impl DigitalOcean {
    /// Create a new `DigitalOcean` provider.
    ///
    /// # Arguments
    /// * `api_token` - `DigitalOcean` API token
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(api_token: impl Into<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_token: api_token.into(),
            base_url: API_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different API root (used for mock servers).
    ///
    /// # Errors
    /// Returns error if `base_url` is not a valid URL.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ProviderError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| ProviderError::Config(format!("invalid API base URL {base_url}: {e}")))?;
        self.base_url = parsed.as_str().trim_end_matches('/').to_string();
        Ok(self)
    }

    /// Make an authenticated GET request.
    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "GET request");

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Walk a paginated list until `matches` accepts an item.
    ///
    /// Only the query of each `next` link is used, so every page is fetched
    /// from the configured base URL.
    async fn find_listed<P: ListPage>(
        &self,
        path: &str,
        matches: impl Fn(&P::Item) -> bool,
    ) -> Result<Option<P::Item>, ProviderError> {
        let resource = path.split_once('?').map_or(path, |(resource, _)| resource);
        let mut current = path.to_string();

        loop {
            let page: P = self.get(&current).await?;
            let (items, next) = page.into_parts();
            if let Some(found) = items.into_iter().find(|item| matches(item)) {
                return Ok(Some(found));
            }

            let Some(next) = next else {
                return Ok(None);
            };
            let link = Url::parse(&next)
                .map_err(|e| ProviderError::Config(format!("invalid page link {next}: {e}")))?;
            let following = match link.query() {
                Some(query) => format!("{resource}?{query}"),
                None => resource.to_string(),
            };
            if following == current {
                return Ok(None);
            }
            debug!(next = %following, "Following page link");
            current = following;
        }
    }

    /// Make an authenticated GET request returning the raw body.
    async fn get_text(&self, path: &str) -> Result<String, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "GET request (text)");

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        Self::check_status(status, text)
    }

    /// Make an authenticated POST request.
    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ProviderError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "POST request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Make an authenticated DELETE request. A missing resource counts as deleted.
    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "DELETE request");

        let response = self
            .client
            .delete(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .send()
            .await?;

        let status = response.status();
        if status.is_success()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_FOUND
        {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Handle API response, parsing JSON or error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let text = Self::check_status(status, response.text().await?)?;

        serde_json::from_str(&text).map_err(|e| {
            warn!(error = %e, body = %text, "Failed to parse response");
            ProviderError::Serialization(e)
        })
    }

    fn check_status(status: StatusCode, text: String) -> Result<String, ProviderError> {
        if status.is_success() {
            Ok(text)
        } else if status == StatusCode::NOT_FOUND {
            Err(ProviderError::NotFound(text))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(ProviderError::Auth(text))
        } else {
            Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Convert a DOKS cluster to our record type.
    fn to_cluster(cluster: &KubernetesCluster) -> ClusterRecord {
        let state = match cluster.status.state.as_str() {
            "provisioning" | "upgrading" => ClusterState::Provisioning,
            "running" => ClusterState::Running,
            "degraded" => ClusterState::Degraded,
            "error" => ClusterState::Error,
            "deleting" | "deleted" => ClusterState::Deleting,
            _ => ClusterState::Unknown,
        };

        ClusterRecord {
            id: cluster.id.clone(),
            name: cluster.name.clone(),
            region: cluster.region.clone(),
            version: cluster.version.clone(),
            network_id: cluster.vpc_uuid.clone(),
            endpoint: cluster.endpoint.clone().filter(|e| !e.is_empty()),
            state,
            node_count: cluster.node_pools.iter().map(|p| p.count).sum(),
            created_at: cluster
                .created_at
                .as_deref()
                .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc)),
        }
    }
}

#[async_trait]
impl CloudProvider for DigitalOcean {
    async fn find_project(&self, name: &str) -> Result<Option<ProjectRecord>, ProviderError> {
        let found = self
            .find_listed::<ProjectListResponse>(
                &format!("/projects?per_page={LIST_PAGE_SIZE}"),
                |p| p.name == name,
            )
            .await?;

        Ok(found.map(|p| ProjectRecord { id: p.id, name: p.name }))
    }

    async fn create_project(
        &self,
        req: &CreateProjectRequest,
    ) -> Result<ProjectRecord, ProviderError> {
        info!(name = %req.name, environment = %req.environment, "Creating project");

        let body = CreateProjectBody {
            name: req.name.clone(),
            description: req.description.clone(),
            purpose: req.purpose.clone(),
            environment: req.environment.clone(),
        };

        let response: ProjectResponse = self.post("/projects", &body).await?;
        info!(project_id = %response.project.id, "Project created");

        Ok(ProjectRecord {
            id: response.project.id,
            name: response.project.name,
        })
    }

    async fn assign_cluster(
        &self,
        project: &ProjectId,
        cluster_id: &str,
    ) -> Result<(), ProviderError> {
        let body = AssignResourcesBody {
            resources: vec![format!("do:kubernetes:{cluster_id}")],
        };

        let response: AssignResourcesResponse = self
            .post(&format!("/projects/{project}/resources"), &body)
            .await?;

        for resource in &response.resources {
            debug!(
                urn = %resource.urn,
                status = resource.status.as_deref().unwrap_or("unknown"),
                "Resource assigned to project"
            );
        }
        Ok(())
    }

    async fn delete_project(&self, id: &str) -> Result<(), ProviderError> {
        info!(project_id = %id, "Deleting project");
        self.delete(&format!("/projects/{id}")).await
    }

    async fn find_network(&self, name: &str) -> Result<Option<NetworkRecord>, ProviderError> {
        let found = self
            .find_listed::<VpcListResponse>(&format!("/vpcs?per_page={LIST_PAGE_SIZE}"), |v| {
                v.name == name
            })
            .await?;

        Ok(found.map(|v| NetworkRecord {
                id: v.id,
                name: v.name,
                region: v.region,
            }))
    }

    async fn create_network(
        &self,
        req: &CreateNetworkRequest,
    ) -> Result<NetworkRecord, ProviderError> {
        info!(
            name = %req.name(),
            region = %req.region(),
            project_id = %req.project(),
            "Creating VPC"
        );

        let body = CreateVpcBody {
            name: req.name().to_string(),
            region: req.region().to_string(),
            description: Some(format!("Network for project {}", req.project())),
            ip_range: None,
        };

        let response: VpcResponse = self.post("/vpcs", &body).await?;
        info!(vpc_id = %response.vpc.id, "VPC created");

        Ok(NetworkRecord {
            id: response.vpc.id,
            name: response.vpc.name,
            region: response.vpc.region,
        })
    }

    async fn delete_network(&self, id: &str) -> Result<(), ProviderError> {
        info!(vpc_id = %id, "Deleting VPC");
        self.delete(&format!("/vpcs/{id}")).await
    }

    async fn find_cluster(&self, name: &str) -> Result<Option<ClusterRecord>, ProviderError> {
        let found = self
            .find_listed::<KubernetesClusterListResponse>(
                &format!("/kubernetes/clusters?per_page={LIST_PAGE_SIZE}"),
                |c| c.name == name,
            )
            .await?;

        Ok(found.as_ref().map(Self::to_cluster))
    }

    async fn create_cluster(
        &self,
        req: &CreateClusterRequest,
    ) -> Result<ClusterRecord, ProviderError> {
        info!(
            name = %req.name(),
            version = %req.version(),
            region = %req.region(),
            vpc_id = %req.network(),
            node_count = req.node_pool().node_count,
            "Creating Kubernetes cluster"
        );

        let body = CreateKubernetesClusterBody {
            name: req.name().to_string(),
            region: req.region().to_string(),
            version: req.version().to_string(),
            vpc_uuid: req.network().as_str().to_string(),
            node_pools: vec![NodePoolSpec {
                size: req.node_pool().size.clone(),
                name: req.node_pool().name.clone(),
                count: req.node_pool().node_count,
            }],
            tags: vec![CLUSTER_TAG.to_string()],
        };

        let response: KubernetesClusterResponse =
            self.post("/kubernetes/clusters", &body).await?;
        info!(cluster_id = %response.kubernetes_cluster.id, "Kubernetes cluster created");

        Ok(Self::to_cluster(&response.kubernetes_cluster))
    }

    async fn get_cluster(&self, id: &str) -> Result<ClusterRecord, ProviderError> {
        let response: KubernetesClusterResponse =
            self.get(&format!("/kubernetes/clusters/{id}")).await?;
        Ok(Self::to_cluster(&response.kubernetes_cluster))
    }

    async fn get_kubeconfig(&self, id: &str) -> Result<String, ProviderError> {
        debug!(cluster_id = %id, "Fetching kubeconfig");
        self.get_text(&format!("/kubernetes/clusters/{id}/kubeconfig"))
            .await
    }

    /// Deletes the cluster together with the load balancers and volumes its
    /// workloads created. The call returns before the cluster is gone.
    async fn delete_cluster(&self, id: &str) -> Result<(), ProviderError> {
        info!(cluster_id = %id, "Deleting Kubernetes cluster and associated resources");
        self.delete(&format!(
            "/kubernetes/clusters/{id}/destroy_with_associated_resources/dangerous"
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::Descriptors;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cluster_json(state: &str) -> serde_json::Value {
        json!({
            "id": "c-123",
            "name": "x-polkadot-k8s",
            "region": "ams3",
            "version": "1.21.2-do.2",
            "vpc_uuid": "vpc-9",
            "endpoint": "https://c-123.k8s.ondigitalocean.com",
            "node_pools": [{"id": "p-1", "name": "x-polkadot-nodes", "size": "s-4vcpu-8gb", "count": 1}],
            "status": {"state": state},
            "created_at": "2021-07-01T00:00:00Z"
        })
    }

    async fn provider(server: &MockServer) -> DigitalOcean {
        DigitalOcean::new("token")
            .unwrap()
            .with_base_url(&server.uri())
            .unwrap()
    }

    #[test]
    fn test_cluster_state_mapping() {
        let cluster: KubernetesCluster =
            serde_json::from_value(cluster_json("provisioning")).unwrap();
        let record = DigitalOcean::to_cluster(&cluster);
        assert_eq!(record.state, ClusterState::Provisioning);
        assert_eq!(record.node_count, 1);
        assert_eq!(record.network_id.as_deref(), Some("vpc-9"));
        assert!(record.created_at.is_some());
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        let err = DigitalOcean::new("t").unwrap().with_base_url("not a url");
        assert!(matches!(err, Err(ProviderError::Config(_))));
    }

    #[tokio::test]
    async fn test_find_project_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects"))
            .and(header("Authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "projects": [
                    {"id": "p-0", "name": "default", "is_default": true},
                    {"id": "p-1", "name": "x-polkadot"}
                ]
            })))
            .mount(&server)
            .await;

        let found = provider(&server).await.find_project("x-polkadot").await.unwrap();
        assert_eq!(found.map(|p| p.id), Some("p-1".to_string()));
    }

    #[tokio::test]
    async fn test_create_cluster_sends_vpc_and_pool() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/kubernetes/clusters"))
            .and(body_partial_json(json!({
                "name": "x-polkadot-k8s",
                "region": "ams3",
                "vpc_uuid": "vpc-9",
                "node_pools": [{"size": "s-4vcpu-8gb", "name": "x-polkadot-nodes", "count": 1}]
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({ "kubernetes_cluster": cluster_json("provisioning") })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let d = Descriptors::for_prefix("x", "ams3", "1.21.2-do.2", "s-4vcpu-8gb", 1);
        let project = ProjectId::from_record(&ProjectRecord {
            id: "p-1".into(),
            name: d.project.name.clone(),
        });
        let network = crate::providers::NetworkId::from_record(&NetworkRecord {
            id: "vpc-9".into(),
            name: d.network.name.clone(),
            region: "ams3".into(),
        });
        let req = CreateClusterRequest::new(&project, &network, &d.cluster);

        let record = provider(&server).await.create_cluster(&req).await.unwrap();
        assert_eq!(record.id, "c-123");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kubernetes/clusters/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/vpcs"))
            .respond_with(ResponseTemplate::new(422).set_body_string("name taken"))
            .mount(&server)
            .await;

        let do_client = provider(&server).await;
        let err = do_client.get_cluster("missing").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));

        let project = ProjectId::from_record(&ProjectRecord {
            id: "p-1".into(),
            name: "x".into(),
        });
        let d = Descriptors::for_prefix("x", "ams3", "1.21.2-do.2", "s-4vcpu-8gb", 1);
        let err = do_client
            .create_network(&CreateNetworkRequest::new(&project, &d.network))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 422, .. }));
    }

    #[tokio::test]
    async fn test_kubeconfig_is_raw_text_and_delete_tolerates_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kubernetes/clusters/c-123/kubeconfig"))
            .respond_with(ResponseTemplate::new(200).set_body_string("apiVersion: v1\nkind: Config\n"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/vpcs/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let do_client = provider(&server).await;
        let raw = do_client.get_kubeconfig("c-123").await.unwrap();
        assert!(raw.starts_with("apiVersion: v1"));
        assert!(do_client.delete_network("gone").await.is_ok());
    }

    #[tokio::test]
    async fn test_find_network_follows_page_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vpcs"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vpcs": [{"id": "vpc-9", "name": "x-polkadot-vpc", "region": "ams3"}],
                "links": {"pages": {"prev": "https://api.digitalocean.com/v2/vpcs?page=1&per_page=200"}}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/vpcs"))
            .and(query_param("per_page", "200"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vpcs": [{"id": "vpc-0", "name": "default-ams3", "region": "ams3"}],
                "links": {"pages": {"next": "https://api.digitalocean.com/v2/vpcs?page=2&per_page=200"}}
            })))
            .mount(&server)
            .await;

        let found = provider(&server).await.find_network("x-polkadot-vpc").await.unwrap();
        assert_eq!(found.map(|v| v.id), Some("vpc-9".to_string()));
    }

    #[tokio::test]
    async fn test_find_cluster_stops_on_last_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kubernetes/clusters"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kubernetes_clusters": [cluster_json("running")],
                "links": {}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let found = provider(&server).await.find_cluster("other").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_delete_cluster_takes_associated_resources() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(
                "/kubernetes/clusters/c-123/destroy_with_associated_resources/dangerous",
            ))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        provider(&server).await.delete_cluster("c-123").await.unwrap();
    }
}
