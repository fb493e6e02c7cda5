//! Scoped read-only mounts
//!
//! Local metadata media (config drives) is mounted only while it is being
//! read. A [`MountGuard`] unmounts on every exit path, and one
//! [`MountPoint`] never has two mounts in flight at the same time.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::CloudInitError;

/// Mounts and unmounts block devices
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Mount `device` read-only at `target`, trying `fs_types` in order
    async fn mount(&self, device: &Path, target: &Path, fs_types: &[String]) -> Result<(), CloudInitError>;

    /// Unmount `target`. Blocking, so that it can also run from `Drop`.
    fn unmount(&self, target: &Path) -> Result<(), CloudInitError>;
}

/// Uses the system `mount` and `umount` commands
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMounter;

#[async_trait]
impl Mounter for SystemMounter {
    async fn mount(&self, device: &Path, target: &Path, fs_types: &[String]) -> Result<(), CloudInitError> {
        tokio::fs::create_dir_all(target).await?;

        for fs_type in fs_types {
            let output = Command::new("mount")
                .args(["-o", "ro", "-t", fs_type.as_str()])
                .arg(device)
                .arg(target)
                .output()
                .await?;

            if output.status.success() {
                debug!("Mounted {} ({}) at {}", device.display(), fs_type, target.display());
                return Ok(());
            }
            debug!(
                "Mounting {} as {} failed: {}",
                device.display(),
                fs_type,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Err(CloudInitError::Mount(format!(
            "could not mount {} as any of {:?}",
            device.display(),
            fs_types
        )))
    }

    fn unmount(&self, target: &Path) -> Result<(), CloudInitError> {
        let status = std::process::Command::new("umount").arg(target).status()?;
        if !status.success() {
            return Err(CloudInitError::Mount(format!(
                "umount {} failed with {}",
                target.display(),
                status
            )));
        }
        Ok(())
    }
}

/// Serialises mounts performed through one mounter
pub struct MountPoint {
    mounter: Arc<dyn Mounter>,
    lock: Arc<Mutex<()>>,
}

impl MountPoint {
    pub fn new(mounter: Arc<dyn Mounter>) -> Self {
        Self {
            mounter,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemMounter))
    }

    /// Mount `device` at `target` and return a guard owning the mount.
    ///
    /// Waits while another guard from this mount point is alive.
    pub async fn acquire(
        &self,
        device: &Path,
        target: &Path,
        fs_types: &[String],
    ) -> Result<MountGuard, CloudInitError> {
        let lock = self.lock.clone().lock_owned().await;
        self.mounter.mount(device, target, fs_types).await?;
        Ok(MountGuard {
            mounter: self.mounter.clone(),
            root: target.to_path_buf(),
            released: false,
            _lock: lock,
        })
    }
}

/// A live mount; unmounted when released or dropped
pub struct MountGuard {
    mounter: Arc<dyn Mounter>,
    root: PathBuf,
    released: bool,
    _lock: OwnedMutexGuard<()>,
}

impl MountGuard {
    /// Directory the device is mounted at
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Unmount now and report the outcome.
    ///
    /// The unmount runs on the blocking pool; the lock is held until it
    /// finishes.
    pub async fn release(mut self) -> Result<(), CloudInitError> {
        self.released = true;
        debug!("Unmounting {}", self.root.display());
        let mounter = self.mounter.clone();
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || mounter.unmount(&root))
            .await
            .map_err(|e| CloudInitError::Mount(format!("unmount task failed: {}", e)))?
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        debug!("Unmounting {}", self.root.display());
        if let Err(e) = self.mounter.unmount(&self.root) {
            warn!("Failed to unmount {}: {}", self.root.display(), e);
        }
    }
}
