//! `DigitalOcean` provider for projects, VPCs and managed Kubernetes (DOKS).
//!
//! Implements the [`CloudProvider`](crate::providers::CloudProvider) trait
//! against the `DigitalOcean` v2 REST API.
//!
//! ## Resource mapping
//!
//! - **Project** → `/v2/projects`
//! - **Network** → `/v2/vpcs`
//! - **Cluster** → `/v2/kubernetes/clusters` (one node pool, attached to the VPC)

mod client;
mod models;

pub use client::DigitalOcean;
pub use models::*;
