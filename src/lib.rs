//! cloud-init-rs library
//!
//! Datasource discovery and instance metadata retrieval for cloud-init.
//!
//! Candidate datasources are probed one at a time until one of them finds
//! its metadata. The OpenStack datasources read a versioned metadata tree
//! from either the metadata service or a local config drive.
//!
//! # Design Principles
//!
//! - **Safety First**: No unsafe code (`#![forbid(unsafe_code)]`)
//! - **Fast Boot**: Async I/O, lazy probing, each resource fetched once
//! - **Testable**: All waiting goes through an injectable clock

pub mod config;
pub mod datasources;
pub mod http;
pub mod mount;
pub mod retry;
pub mod routes;

mod error;

pub use datasources::{Datasource, NetworkConfig, SourceContext, detect_datasource};
pub use error::{CloudInitError, UrlError};

/// Instance identity retrieved from a datasource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceMetadata {
    pub instance_id: Option<String>,
    pub local_hostname: Option<String>,
    pub availability_zone: Option<String>,
    pub cloud_name: Option<String>,
    pub public_keys: Vec<String>,
}
