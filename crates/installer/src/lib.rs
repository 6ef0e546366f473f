//! Run orchestration for the midl validator deployment.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use midl_cloud::DigitalOcean;
//! use midl_deploy::KubeConnector;
//! use midl_installer::{Environment, InstallConfig, Installer};
//!
//! let env = Environment::from_env()?;
//! let config = InstallConfig::with_defaults(env);
//! let provider = Arc::new(DigitalOcean::new(config.environment.digitalocean_token())?);
//! let mut installer = Installer::new(config, provider, Arc::new(KubeConnector::default()))?;
//! let outputs = installer.deploy().await?;
//! println!("{}:{}", outputs.lb_ip, outputs.p2p_port);
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod orchestrator;
pub mod state;
pub mod ui;

pub use config::{ClusterSettings, ConfigError, Environment, InstallConfig};
pub use orchestrator::{Backends, Installer};
pub use state::{Outputs, RunState, RunStep};
