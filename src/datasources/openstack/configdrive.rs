//! OpenStack config drive
//!
//! A small read-only disk labelled `config-2` carrying the same metadata
//! tree the metadata service serves. The drive is mounted only while it is
//! being read.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ConfigDrive, MetadataReader, OpenStackSource};
use crate::datasources::{CachedResponse, SourceContext};
use crate::mount::{MountGuard, MountPoint};
use crate::retry::{Clock, RetryPolicy};
use crate::CloudInitError;

/// Settings read from `datasource.ConfigDrive`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDriveConfig {
    /// Block device holding the drive
    pub dev_path: PathBuf,
    /// Where the drive is mounted while it is read
    pub cd_dir: PathBuf,
    /// Filesystems tried in order when mounting
    pub fs_types: Vec<String>,
}

impl Default for ConfigDriveConfig {
    fn default() -> Self {
        Self {
            dev_path: PathBuf::from("/dev/disk/by-label/config-2"),
            cd_dir: PathBuf::from("/tmp/config-2"),
            fs_types: vec!["vfat".to_string(), "iso9660".to_string()],
        }
    }
}

/// Reads the metadata tree from the mounted drive
pub struct ConfigDriveReader {
    config: ConfigDriveConfig,
    mount_point: Arc<MountPoint>,
    session: Mutex<Option<MountGuard>>,
}

impl ConfigDriveReader {
    pub fn new(config: ConfigDriveConfig, mount_point: Arc<MountPoint>) -> Self {
        Self {
            config,
            mount_point,
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConfigDriveConfig {
        &self.config
    }

    async fn mount(&self) -> Result<MountGuard, CloudInitError> {
        self.mount_point
            .acquire(&self.config.dev_path, &self.config.cd_dir, &self.config.fs_types)
            .await
    }
}

#[async_trait]
impl MetadataReader for ConfigDriveReader {
    fn name(&self) -> &'static str {
        "ConfigDrive"
    }

    fn locate(&self, path: &str) -> String {
        self.config.cd_dir.join(path).display().to_string()
    }

    /// Mount the drive for the duration of a load
    async fn attach(&self) -> Result<bool, CloudInitError> {
        let present = tokio::fs::try_exists(&self.config.dev_path)
            .await
            .unwrap_or(false);
        if !present {
            debug!("Config drive {} not present", self.config.dev_path.display());
            return Ok(false);
        }

        let guard = self.mount().await?;
        *self.session.lock().await = Some(guard);
        Ok(true)
    }

    async fn detach(&self) {
        let session = self.session.lock().await.take();
        if let Some(guard) = session {
            if let Err(e) = guard.release().await {
                warn!("Failed to unmount config drive: {}", e);
            }
        }
    }

    /// Read `path` from the drive, mounting it just for this read when no
    /// load is in progress
    async fn read(&self, path: &str) -> Result<CachedResponse, CloudInitError> {
        let session = self.session.lock().await;
        if let Some(guard) = session.as_ref() {
            return read_entry(&guard.root().join(path)).await;
        }
        drop(session);

        let guard = self.mount().await?;
        let result = read_entry(&guard.root().join(path)).await;
        if let Err(e) = guard.release().await {
            warn!("Failed to unmount config drive: {}", e);
        }
        result
    }
}

/// Blob directory next to the version directories
const CONTENT_DIR: &str = "content";

/// File contents, or the sorted entry names of a directory
///
/// The `content` blob directory is left out of listings so that the
/// `openstack` directory lists only versions.
async fn read_entry(path: &Path) -> Result<CachedResponse, CloudInitError> {
    let not_accessible = || CloudInitError::ResourceNotAccessible(path.display().to_string());

    let metadata = tokio::fs::metadata(path).await.map_err(|_| not_accessible())?;
    if metadata.is_file() {
        let contents = tokio::fs::read(path).await.map_err(|_| not_accessible())?;
        return Ok(CachedResponse::new(contents));
    }
    if metadata.is_dir() {
        let mut entries = tokio::fs::read_dir(path).await.map_err(|_| not_accessible())?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != CONTENT_DIR {
                names.push(name);
            }
        }
        names.sort();
        return Ok(CachedResponse::new(names.join("\n")));
    }
    Err(not_accessible())
}

impl ConfigDrive {
    pub fn new(config: ConfigDriveConfig, mount_point: Arc<MountPoint>, clock: Arc<dyn Clock>) -> Self {
        let reader = ConfigDriveReader::new(config, mount_point);
        OpenStackSource::with_reader(reader, RetryPolicy::none(), clock)
    }

    /// Build from `datasource.ConfigDrive` in the system configuration
    pub fn from_context(ctx: &SourceContext) -> Result<Self, CloudInitError> {
        let config = ctx.config.datasource_config::<ConfigDriveConfig>("ConfigDrive")?;
        Ok(Self::new(config, ctx.mount_point.clone(), ctx.clock.clone()))
    }
}
