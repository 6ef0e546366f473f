//! Run configuration.
//!
//! The process environment is read exactly once, by [`Environment::from_env`]
//! in the binary. Everything downstream receives an [`InstallConfig`].

use std::path::PathBuf;
use std::time::Duration;

use midl_cloud::Descriptors;
use midl_deploy::WorkloadSpec;
use thiserror::Error;

/// Prefix shared by every named cloud resource.
pub const PROJECT_RAND_ID: &str = "PROJECT_RAND_ID";

/// `DigitalOcean` API token.
pub const DIGITALOCEAN_TOKEN: &str = "DIGITALOCEAN_TOKEN";

/// Configuration errors. All of them are raised before any provider call.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is unset.
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    /// A required environment variable is set but blank.
    #[error("{0} environment variable is empty")]
    Empty(&'static str),

    /// A setting has an unusable value.
    #[error("invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Required values taken from the process environment.
#[derive(Clone, PartialEq, Eq)]
pub struct Environment {
    project_rand_id: String,
    digitalocean_token: String,
}

impl Environment {
    /// Resolve required values through `lookup`.
    ///
    /// # Errors
    /// Returns [`ConfigError::Missing`] or [`ConfigError::Empty`] for the
    /// first required variable without a usable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &'static str| match lookup(name) {
            None => Err(ConfigError::Missing(name)),
            Some(value) if value.trim().is_empty() => Err(ConfigError::Empty(name)),
            Some(value) => Ok(value.trim().to_string()),
        };

        Ok(Self {
            project_rand_id: require(PROJECT_RAND_ID)?,
            digitalocean_token: require(DIGITALOCEAN_TOKEN)?,
        })
    }

    /// Resolve required values from the process environment.
    ///
    /// # Errors
    /// See [`Environment::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resource name prefix.
    #[must_use]
    pub fn project_rand_id(&self) -> &str {
        &self.project_rand_id
    }

    /// API token.
    #[must_use]
    pub fn digitalocean_token(&self) -> &str {
        &self.digitalocean_token
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("project_rand_id", &self.project_rand_id)
            .field("digitalocean_token", &"<redacted>")
            .finish()
    }
}

/// Cluster topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSettings {
    /// Region slug shared by the VPC and the cluster.
    pub region: String,
    /// DOKS version slug.
    pub version: String,
    /// Droplet size slug for the node pool.
    pub node_size: String,
    /// Nodes in the pool.
    pub node_count: u32,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            region: "ams3".into(),
            version: "1.21.2-do.2".into(),
            node_size: "s-4vcpu-8gb".into(),
            node_count: 1,
        }
    }
}

/// Full run configuration.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Values from the environment.
    pub environment: Environment,
    /// Cluster topology.
    pub cluster: ClusterSettings,
    /// Workload to deploy.
    pub workload: WorkloadSpec,
    /// Directory for run state and outputs.
    pub output_dir: PathBuf,
    /// Bound on the control plane readiness wait.
    pub ready_timeout: Duration,
    /// Helm executable.
    pub helm_binary: String,
}

impl InstallConfig {
    /// Defaults for everything except the environment.
    #[must_use]
    pub fn with_defaults(environment: Environment) -> Self {
        let output_dir = PathBuf::from(".midl").join(environment.project_rand_id());
        Self {
            environment,
            cluster: ClusterSettings::default(),
            workload: WorkloadSpec::default(),
            output_dir,
            ready_timeout: Duration::from_secs(15 * 60),
            helm_binary: "helm".into(),
        }
    }

    /// Cloud resource descriptors derived from the prefix and topology.
    #[must_use]
    pub fn descriptors(&self) -> Descriptors {
        Descriptors::for_prefix(
            self.environment.project_rand_id(),
            &self.cluster.region,
            &self.cluster.version,
            &self.cluster.node_size,
            self.cluster.node_count,
        )
    }

    /// Check settings that would otherwise only fail at the provider.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.descriptors()
            .validate()
            .map_err(|message| ConfigError::Invalid {
                field: "cluster",
                message,
            })?;

        if self.workload.namespace.is_empty() {
            return Err(ConfigError::Invalid {
                field: "namespace",
                message: "must not be empty".into(),
            });
        }
        if self.workload.chain.is_empty() {
            return Err(ConfigError::Invalid {
                field: "chain",
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Run state file.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        crate::state::RunState::state_file(&self.output_dir)
    }

    /// Published outputs file.
    #[must_use]
    pub fn outputs_file(&self) -> PathBuf {
        crate::state::Outputs::file(&self.output_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn test_environment_resolves() {
        let env = Environment::from_lookup(lookup(&[
            (PROJECT_RAND_ID, "a1b2"),
            (DIGITALOCEAN_TOKEN, "dop_v1_secret"),
        ]))
        .unwrap();

        assert_eq!(env.project_rand_id(), "a1b2");
        assert_eq!(env.digitalocean_token(), "dop_v1_secret");
        assert!(!format!("{env:?}").contains("dop_v1_secret"));
    }

    #[test]
    fn test_missing_and_empty_values() {
        assert_eq!(
            Environment::from_lookup(lookup(&[(DIGITALOCEAN_TOKEN, "t")])).unwrap_err(),
            ConfigError::Missing(PROJECT_RAND_ID)
        );
        assert_eq!(
            Environment::from_lookup(lookup(&[(PROJECT_RAND_ID, "  "), (DIGITALOCEAN_TOKEN, "t")]))
                .unwrap_err(),
            ConfigError::Empty(PROJECT_RAND_ID)
        );
        assert_eq!(
            Environment::from_lookup(lookup(&[(PROJECT_RAND_ID, "x"), (DIGITALOCEAN_TOKEN, "")]))
                .unwrap_err(),
            ConfigError::Empty(DIGITALOCEAN_TOKEN)
        );
    }

    #[test]
    fn test_defaults_and_descriptors() {
        let env = Environment::from_lookup(lookup(&[
            (PROJECT_RAND_ID, "x"),
            (DIGITALOCEAN_TOKEN, "t"),
        ]))
        .unwrap();
        let config = InstallConfig::with_defaults(env);
        let descriptors = config.descriptors();

        assert_eq!(descriptors.project.name, "x-polkadot");
        assert_eq!(descriptors.network.region, "ams3");
        assert_eq!(descriptors.cluster.node_pool.node_count, 1);
        assert_eq!(config.workload.chain, "kusama");
        assert_eq!(config.output_dir, PathBuf::from(".midl/x"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_nodes_rejected() {
        let env = Environment::from_lookup(lookup(&[
            (PROJECT_RAND_ID, "x"),
            (DIGITALOCEAN_TOKEN, "t"),
        ]))
        .unwrap();
        let mut config = InstallConfig::with_defaults(env);
        config.cluster.node_count = 0;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "cluster", .. })
        ));
    }
}
