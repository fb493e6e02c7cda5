//! Datasource implementations and discovery
//!
//! A datasource answers "what instance metadata is available here". Each
//! implementation is probed with [`Datasource::load`]; the discovery
//! pipeline in [`loader`] and [`strategy`] picks the first one that loads.

pub mod cache;
pub mod loader;
pub mod mock;
pub mod openstack;
pub mod strategy;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::SystemConfig;
use crate::mount::MountPoint;
use crate::retry::{Clock, SystemClock};
use crate::routes::{RouteHelper, SystemRoutes};
use crate::{CloudInitError, InstanceMetadata};

pub use cache::{CachedResponse, ResponseCache};
pub use loader::{Candidate, CandidateLister, DataSourceLoader, DatasourceRegistry, get_data_source};
pub use openstack::{ConfigDrive, OpenStack};
pub use strategy::{FilterByName, SerialProbe, Sources, Strategy};

/// Network configuration published by a datasource
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkConfig {
    /// Structured `network_data.json` document (links, networks, services)
    NetworkData(serde_json::Value),
    /// Legacy configuration blob referenced by a `content_path` pointer
    Legacy(String),
}

/// Trait for cloud metadata datasources
///
/// Accessors a datasource has no backing resource for return an empty
/// value (`None`, an empty list, `false`). Failures to fetch a resource
/// that should exist are returned as errors.
#[async_trait]
pub trait Datasource: Send + Sync {
    /// Name of this datasource (e.g., "OpenStack", "ConfigDrive")
    fn name(&self) -> &'static str;

    /// Try to activate this datasource.
    ///
    /// Returns `Ok(true)` once the metadata root was found and parsed and
    /// `Ok(false)` when the datasource is not present. Errors are reserved
    /// for broken metadata (e.g. invalid API versions); discovery treats
    /// them as "not available".
    async fn load(&mut self) -> Result<bool, CloudInitError>;

    async fn instance_id(&self) -> Result<Option<String>, CloudInitError> {
        Ok(None)
    }

    async fn host_name(&self) -> Result<Option<String>, CloudInitError> {
        Ok(None)
    }

    async fn availability_zone(&self) -> Result<Option<String>, CloudInitError> {
        Ok(None)
    }

    async fn public_keys(&self) -> Result<Vec<String>, CloudInitError> {
        Ok(Vec::new())
    }

    /// Raw user data; its format is up to the consumer
    async fn user_data(&self) -> Result<Option<Arc<CachedResponse>>, CloudInitError> {
        Ok(None)
    }

    async fn vendor_data(&self) -> Result<Option<Arc<CachedResponse>>, CloudInitError> {
        Ok(None)
    }

    async fn network_config(&self) -> Result<Option<NetworkConfig>, CloudInitError> {
        Ok(None)
    }

    async fn admin_password(&self) -> Result<Option<String>, CloudInitError> {
        Ok(None)
    }

    /// Publish the instance password; `Ok(false)` if it was already set
    async fn post_password(&self, _password: &str) -> Result<bool, CloudInitError> {
        Ok(false)
    }

    fn can_update_password(&self) -> bool {
        false
    }

    async fn is_password_set(&self) -> Result<bool, CloudInitError> {
        Ok(false)
    }

    async fn is_password_changed(&self) -> Result<bool, CloudInitError> {
        Ok(false)
    }

    /// Summary of the identity accessors
    async fn metadata(&self) -> Result<InstanceMetadata, CloudInitError> {
        Ok(InstanceMetadata {
            instance_id: self.instance_id().await?,
            local_hostname: self.host_name().await?,
            availability_zone: self.availability_zone().await?,
            public_keys: self.public_keys().await?,
            cloud_name: Some(self.name().to_lowercase()),
        })
    }
}

/// Collaborators shared by every datasource built during one discovery run
#[derive(Clone)]
pub struct SourceContext {
    pub config: SystemConfig,
    pub clock: Arc<dyn Clock>,
    pub routes: Arc<dyn RouteHelper>,
    pub mount_point: Arc<MountPoint>,
}

impl SourceContext {
    /// Context backed by the real clock, routing table and `mount`
    pub fn system(config: SystemConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            routes: Arc::new(SystemRoutes::new()),
            mount_point: Arc::new(MountPoint::system()),
        }
    }
}

/// Detect and return the appropriate datasource for this instance
///
/// Builtin datasources are filtered by the configured `datasource_list`
/// and probed one after the other; the first one that loads wins.
pub async fn detect_datasource(ctx: SourceContext) -> Result<Box<dyn Datasource>, CloudInitError> {
    let names = ctx.config.datasource_list.clone();
    let registry = DatasourceRegistry::builtin(&ctx);
    let source = get_data_source(names, &registry, vec![Box::new(SerialProbe)]).await?;
    info!("Detected datasource: {}", source.name());
    Ok(source)
}
