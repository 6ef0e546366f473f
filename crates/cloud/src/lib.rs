//! Cluster provisioning for the midl validator platform.
//!
//! This crate turns declarative descriptors into a live managed Kubernetes
//! cluster on `DigitalOcean`:
//!
//! - **Project** - billing/grouping container for everything below
//! - **Network** - a VPC created inside the project
//! - **Cluster** - a DOKS control plane plus one node pool inside the VPC
//!
//! The [`ClusterProvisioner`] converges those three resources in order and
//! the [`CredentialBridge`] turns the resulting [`ClusterHandle`] into a
//! [`ConnectionContext`] for downstream deployment.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use midl_cloud::{ClusterProvisioner, CredentialBridge, Descriptors, DigitalOcean};
//!
//! let provider = Arc::new(DigitalOcean::new(token)?);
//! let descriptors = Descriptors::for_prefix("a1b2", "ams3", "1.21.2-do.2", "s-4vcpu-8gb", 1);
//!
//! let provisioner = ClusterProvisioner::new(provider.clone());
//! let handle = provisioner.provision(&descriptors).await?;
//! let handle = provisioner.wait_ready(&handle, Duration::from_secs(900)).await?;
//! let ctx = CredentialBridge::new(provider).extract(&handle).await?;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod credentials;
pub mod descriptors;
pub mod providers;
pub mod provisioner;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use credentials::{ConnectionContext, CredentialBridge};
pub use descriptors::{
    ClusterDescriptor, Descriptors, NetworkDescriptor, NodePoolDescriptor, ProjectDescriptor,
};
pub use providers::{CloudProvider, ClusterState, DigitalOcean, ProviderError};
pub use provisioner::{ClusterHandle, ClusterProvisioner, ProvisionError, Stage};
