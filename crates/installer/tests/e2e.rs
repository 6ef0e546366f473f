//! Full runs against the in-memory provider and cluster.

use std::cell::Cell;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use midl_cloud::providers::MockCloudProvider;
use midl_cloud::testing::InMemoryProvider;
use midl_cloud::CloudProvider;
use midl_deploy::testing::{FakeCluster, FakeConnector, FakeReleases};
use midl_deploy::Connector;
use midl_installer::config::{DIGITALOCEAN_TOKEN, PROJECT_RAND_ID};
use midl_installer::{
    Backends, ConfigError, Environment, InstallConfig, Installer, Outputs, RunState, RunStep,
};

struct Harness {
    provider: Arc<InMemoryProvider>,
    cluster: Arc<FakeCluster>,
    releases: Arc<FakeReleases>,
    connector: Arc<FakeConnector>,
}

impl Harness {
    fn new(provider: InMemoryProvider) -> Self {
        let cluster = Arc::new(
            FakeCluster::default().assigning_after(2, vec!["203.0.113.9".parse().unwrap()]),
        );
        let releases = Arc::new(FakeReleases::default());
        let connector = Arc::new(FakeConnector::new(cluster.clone(), releases.clone()));
        Self {
            provider: Arc::new(provider),
            cluster,
            releases,
            connector,
        }
    }

    fn installer(&self, dir: &Path) -> Installer {
        Installer::new(config(dir), self.provider.clone(), self.connector.clone())
            .unwrap()
            .with_poll_interval(Duration::from_millis(5))
    }

    /// Every resource created so far, in order.
    fn events(&self) -> Vec<String> {
        let mut events = self.provider.events();
        for namespace in self.cluster.created_namespaces() {
            events.push(format!("namespace {namespace} created"));
        }
        for service in self.cluster.created_services() {
            events.push(format!(
                "service {} created with skip_await={}",
                service.name, service.skip_await
            ));
        }
        for request in self.releases.requests() {
            events.push(format!(
                "release {} installed with chain={} p2p_ip={} p2p_port={}",
                request.name, request.values.chain, request.values.p2p_ip, request.values.p2p_port
            ));
        }
        events
    }
}

fn config(dir: &Path) -> InstallConfig {
    let env = Environment::from_lookup(|name| match name {
        PROJECT_RAND_ID => Some("x".to_string()),
        DIGITALOCEAN_TOKEN => Some("token".to_string()),
        _ => None,
    })
    .unwrap();
    let mut config = InstallConfig::with_defaults(env);
    config.output_dir = dir.to_path_buf();
    config.ready_timeout = Duration::from_secs(5);
    config.workload.address_timeout = Duration::from_secs(5);
    config
}

#[tokio::test]
async fn test_deploy_creates_everything_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(InMemoryProvider::default().with_polls_until_running(2));

    let outputs = harness.installer(dir.path()).deploy().await.unwrap();

    assert_eq!(
        harness.events(),
        vec![
            "project x-polkadot created",
            "network x-polkadot-vpc created in ams3",
            "cluster x-polkadot-k8s created in ams3 with 1 node(s)",
            "namespace test-validator-ns created",
            "service midl-polkadot-lb created with skip_await=true",
            "release midl-polkadot-test-validtor installed with chain=kusama p2p_ip=203.0.113.9 p2p_port=31333",
        ]
    );
    assert_eq!(outputs.lb_ip.to_string(), "203.0.113.9");
    assert_eq!(outputs.p2p_port, 31333);
    assert_eq!(Outputs::read(dir.path()).unwrap(), Some(outputs));

    let state = RunState::load(dir.path()).unwrap().unwrap();
    assert_eq!(state.step, RunStep::ReleaseInstalled);
    assert_eq!(state.cluster.unwrap().name, "x-polkadot-k8s");
    assert_eq!(harness.provider.assignments().len(), 1);
}

#[tokio::test]
async fn test_rerun_converges_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(InMemoryProvider::default());

    let first = harness.installer(dir.path()).deploy().await.unwrap();
    let second = harness.installer(dir.path()).deploy().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.provider.project_requests().len(), 1);
    assert_eq!(harness.provider.network_requests().len(), 1);
    assert_eq!(harness.provider.cluster_requests().len(), 1);
    assert_eq!(harness.cluster.created_namespaces().len(), 1);
    assert_eq!(harness.cluster.created_services().len(), 1);
    // The release is an upgrade-install, so it is applied on every run.
    assert_eq!(harness.releases.requests().len(), 2);
    assert_eq!(harness.connector.connected().len(), 2);
}

fn lookup(prefix: &'static str) -> impl Fn(&str) -> Option<String> {
    move |name: &str| match name {
        PROJECT_RAND_ID => Some(prefix.to_string()),
        DIGITALOCEAN_TOKEN => Some("token".to_string()),
        _ => None,
    }
}

/// A provider with no expectations: any call panics.
fn untouchable() -> Backends {
    let provider: Arc<dyn CloudProvider> = Arc::new(MockCloudProvider::new());
    let connector: Arc<dyn Connector> = Arc::new(FakeConnector::new(
        Arc::new(FakeCluster::default()),
        Arc::new(FakeReleases::default()),
    ));
    (provider, connector)
}

#[test]
fn test_empty_prefix_aborts_before_provider() {
    let dir = tempfile::tempdir().unwrap();
    let built = Cell::new(false);

    let result = Installer::from_lookup(
        lookup(""),
        |env| {
            let mut config = InstallConfig::with_defaults(env);
            config.output_dir = dir.path().to_path_buf();
            config
        },
        |_| {
            built.set(true);
            Ok(untouchable())
        },
    );

    let Err(err) = result else {
        panic!("empty prefix was accepted");
    };
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::Empty(PROJECT_RAND_ID))
    );
    assert!(!built.get());
    assert!(!RunState::state_file(dir.path()).exists());
}

#[test]
fn test_valid_environment_builds_without_provider_calls() {
    let dir = tempfile::tempdir().unwrap();

    let installer = Installer::from_lookup(
        lookup("x"),
        |env| {
            let mut config = InstallConfig::with_defaults(env);
            config.output_dir = dir.path().to_path_buf();
            config
        },
        |config| {
            assert_eq!(config.descriptors().cluster.name, "x-polkadot-k8s");
            Ok(untouchable())
        },
    )
    .unwrap();

    assert_eq!(installer.state().prefix, "x");
    assert_eq!(installer.state().step, RunStep::NotStarted);
}

#[tokio::test]
async fn test_invalid_topology_aborts_before_provider() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(InMemoryProvider::default());

    let mut config = config(dir.path());
    config.cluster.node_count = 0;

    let result = Installer::new(config, harness.provider.clone(), harness.connector.clone());

    assert!(result.is_err());
    assert!(harness.events().is_empty());
    assert!(!RunState::state_file(dir.path()).exists());
}
