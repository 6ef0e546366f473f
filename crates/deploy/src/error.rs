//! Error types for workload deployment.

use thiserror::Error;

/// Errors from the Kubernetes API seam.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Kubernetes API call failed.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A bounded wait elapsed.
    #[error("Timed out after {secs}s waiting for {what}")]
    Timeout { secs: u64, what: String },

    /// The cluster refused the object.
    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Errors from the release installer.
#[derive(Error, Debug)]
pub enum ReleaseError {
    /// Spawning helm or writing temp files failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Values could not be rendered.
    #[error("Values rendering failed: {0}")]
    Values(#[from] serde_yaml::Error),

    /// Helm exited with an error (rejected parameters or install timeout).
    #[error("helm failed ({status}): {stderr}")]
    Helm { status: String, stderr: String },
}

/// Errors raised by the deployment pipeline, one variant per stage.
#[derive(Error, Debug)]
pub enum DeployError {
    /// Building a client from the connection context failed.
    #[error("Failed to connect to cluster {cluster}: {message}")]
    Connection { cluster: String, message: String },

    /// Namespace step failed.
    #[error("namespace {namespace} failed: {source}")]
    Namespace {
        namespace: String,
        #[source]
        source: ApiError,
    },

    /// Service step failed.
    #[error("service {namespace}/{service} failed: {source}")]
    Service {
        namespace: String,
        service: String,
        #[source]
        source: ApiError,
    },

    /// The load balancer never published an external address.
    #[error("No ingress address for service {namespace}/{service} after {waited_secs}s")]
    AddressUnavailable {
        namespace: String,
        service: String,
        waited_secs: u64,
    },

    /// Release step failed.
    #[error("release {release} failed: {source}")]
    ReleaseInstall {
        release: String,
        #[source]
        source: ReleaseError,
    },
}
