//! Helm release installation for the validator chart.
//!
//! The chart is opaque: the values below are passed through as-is and
//! only their key layout is fixed here.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::ReleaseError;

/// Main workload image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeImages {
    /// Polkadot node image reference.
    pub polkadot_node: String,
}

/// Helper init/configuration container images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperImages {
    /// Chain-data archive downloader image.
    pub polkadot_archive_downloader: String,
    /// Node key configurator image.
    pub polkadot_node_key_configurator: String,
}

/// Values handed to the chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseValues {
    /// Workload image.
    pub images: NodeImages,
    /// Helper images.
    pub polkadot_k8s_images: HelperImages,
    /// Chain-data bootstrap source.
    pub polkadot_archive_url: String,
    /// Chain identifier (e.g., "kusama").
    pub chain: String,
    /// Validator display name.
    pub polkadot_validator_name: String,
    /// External address the node advertises.
    pub p2p_ip: String,
    /// External port the node advertises.
    pub p2p_port: u16,
}

/// A release to install or upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRequest {
    /// Release name.
    pub name: String,
    /// Chart path or reference.
    pub chart: PathBuf,
    /// Target namespace.
    pub namespace: String,
    /// Chart values.
    pub values: ReleaseValues,
    /// Install timeout.
    pub timeout: Duration,
}

/// Outcome of an install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRecord {
    /// Release name.
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// Revision reported by the installer, if any.
    pub revision: Option<u32>,
}

/// Installs releases into the cluster.
#[async_trait]
pub trait ReleaseInstaller: Send + Sync {
    /// Install or upgrade a release. Re-installing identical values converges.
    async fn install(&self, req: &ReleaseRequest) -> Result<ReleaseRecord, ReleaseError>;
}

#[derive(Deserialize)]
struct HelmStatus {
    version: Option<u32>,
}

/// [`ReleaseInstaller`] that shells out to `helm upgrade --install`.
pub struct HelmCli {
    binary: String,
    kubeconfig: NamedTempFile,
}

impl HelmCli {
    /// Create an installer using `binary` and the given kubeconfig YAML.
    ///
    /// # Errors
    /// Returns an error if the kubeconfig cannot be written to a temp file.
    pub fn new(binary: impl Into<String>, kubeconfig_yaml: &str) -> Result<Self, ReleaseError> {
        let mut kubeconfig = tempfile::Builder::new()
            .prefix("midl-kubeconfig-")
            .suffix(".yaml")
            .tempfile()?;
        kubeconfig.write_all(kubeconfig_yaml.as_bytes())?;
        kubeconfig.flush()?;

        Ok(Self {
            binary: binary.into(),
            kubeconfig,
        })
    }

    /// Arguments for `helm` given a rendered values file.
    fn args(&self, req: &ReleaseRequest, values_path: &str) -> Vec<String> {
        vec![
            "upgrade".to_string(),
            "--install".to_string(),
            req.name.clone(),
            req.chart.to_string_lossy().to_string(),
            "--namespace".to_string(),
            req.namespace.clone(),
            "--values".to_string(),
            values_path.to_string(),
            "--kubeconfig".to_string(),
            self.kubeconfig.path().to_string_lossy().to_string(),
            "--wait".to_string(),
            "--timeout".to_string(),
            format!("{}s", req.timeout.as_secs()),
            "--output".to_string(),
            "json".to_string(),
        ]
    }
}

/// Render values to a temp YAML file.
fn write_values(values: &ReleaseValues) -> Result<NamedTempFile, ReleaseError> {
    let yaml = serde_yaml::to_string(values)?;
    let mut file = tempfile::Builder::new()
        .prefix("midl-values-")
        .suffix(".yaml")
        .tempfile()?;
    file.write_all(yaml.as_bytes())?;
    file.flush()?;
    Ok(file)
}

#[async_trait]
impl ReleaseInstaller for HelmCli {
    async fn install(&self, req: &ReleaseRequest) -> Result<ReleaseRecord, ReleaseError> {
        info!(
            release = %req.name,
            namespace = %req.namespace,
            chart = %req.chart.display(),
            chain = %req.values.chain,
            "Installing release"
        );

        let values = write_values(&req.values)?;
        let args = self.args(req, &values.path().to_string_lossy());
        debug!(binary = %self.binary, ?args, "Running helm");

        let output = tokio::process::Command::new(&self.binary)
            .args(&args)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ReleaseError::Helm {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let revision = serde_json::from_slice::<HelmStatus>(&output.stdout)
            .ok()
            .and_then(|s| s.version);

        info!(release = %req.name, ?revision, "Release installed");
        Ok(ReleaseRecord {
            name: req.name.clone(),
            namespace: req.namespace.clone(),
            revision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> ReleaseValues {
        ReleaseValues {
            images: NodeImages {
                polkadot_node: "parity/polkadot:v0.9.8".into(),
            },
            polkadot_k8s_images: HelperImages {
                polkadot_archive_downloader: "midl/polkadot_archive_downloader".into(),
                polkadot_node_key_configurator: "midl/polkadot_node_key_configurator".into(),
            },
            polkadot_archive_url: "https://ksm-rocksdb.polkashots.io/snapshot".into(),
            chain: "kusama".into(),
            polkadot_validator_name: "midl-polkadot-test-validtor".into(),
            p2p_ip: "203.0.113.9".into(),
            p2p_port: 31333,
        }
    }

    fn request() -> ReleaseRequest {
        ReleaseRequest {
            name: "midl-polkadot-test-validtor".into(),
            chart: PathBuf::from("./charts/polkadot/"),
            namespace: "test-validator-ns".into(),
            values: values(),
            timeout: Duration::from_secs(600),
        }
    }

    #[test]
    fn test_values_key_layout() {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&serde_yaml::to_string(&values()).unwrap()).unwrap();

        assert_eq!(yaml["images"]["polkadot_node"], "parity/polkadot:v0.9.8");
        assert_eq!(
            yaml["polkadot_k8s_images"]["polkadot_node_key_configurator"],
            "midl/polkadot_node_key_configurator"
        );
        assert_eq!(yaml["chain"], "kusama");
        assert_eq!(yaml["p2p_ip"], "203.0.113.9");
        assert_eq!(yaml["p2p_port"], 31333);
    }

    #[test]
    fn test_helm_args() {
        let helm = HelmCli::new("helm", "apiVersion: v1\n").unwrap();
        let args = helm.args(&request(), "/tmp/values.yaml");

        assert_eq!(&args[..4], ["upgrade", "--install", "midl-polkadot-test-validtor", "./charts/polkadot/"]);
        let ns = args.iter().position(|a| a == "--namespace").unwrap();
        assert_eq!(args[ns + 1], "test-validator-ns");
        assert!(args.contains(&"600s".to_string()));
        let kc = args.iter().position(|a| a == "--kubeconfig").unwrap();
        assert_eq!(
            std::fs::read_to_string(&args[kc + 1]).unwrap(),
            "apiVersion: v1\n"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let helm = HelmCli::new("midl-no-such-helm-binary", "apiVersion: v1\n").unwrap();
        let err = helm.install(&request()).await.unwrap_err();
        assert!(matches!(err, ReleaseError::Io(_)));
    }
}
