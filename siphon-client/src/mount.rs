//! Mount-point bookkeeping, per SPEC_FULL.md §4.5 phase 1 and the §9
//! redesign note: "route all reservations through a single locked
//! registry rather than module globals." One process may run several
//! intercepts concurrently, each claiming a directory (or drive letter on
//! Windows) that the agent's SFTP server gets mounted onto; a second
//! intercept racing for the same path must fail cleanly with the first
//! intercept's name, not silently share the mount.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Process-wide registry of claimed mount points, keyed by the client
/// filesystem path. Shared via `Arc` across every intercept the
/// Orchestrator is running in this process.
#[derive(Default)]
pub struct MountRegistry {
    claims: Mutex<HashMap<PathBuf, String>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        MountRegistry::default()
    }

    /// Reserves `path` for `intercept_name`. Fails with
    /// [`Error::MountPointBusy`], naming the holder, if another intercept
    /// already claims it.
    pub fn reserve(&self, path: PathBuf, intercept_name: &str) -> Result<MountClaim<'_>> {
        let mut claims = self.claims.lock().expect("mount registry lock poisoned");
        if let Some(holder) = claims.get(&path) {
            return Err(Error::MountPointBusy {
                path: path.display().to_string(),
                held_by: holder.clone(),
            });
        }
        claims.insert(path.clone(), intercept_name.to_string());
        drop(claims);
        Ok(MountClaim {
            registry: self,
            path: Some(path),
        })
    }

    fn release(&self, path: &PathBuf) {
        self.claims.lock().expect("mount registry lock poisoned").remove(path);
    }

    /// `Arc`-owning counterpart to [`MountRegistry::reserve`], for callers
    /// (the Orchestrator) that need the claim to outlive a single
    /// borrowed scope rather than a function body's stack frame.
    pub fn reserve_arc(self: &Arc<Self>, path: PathBuf, intercept_name: &str) -> Result<OwnedMountClaim> {
        let mut claims = self.claims.lock().expect("mount registry lock poisoned");
        if let Some(holder) = claims.get(&path) {
            return Err(Error::MountPointBusy {
                path: path.display().to_string(),
                held_by: holder.clone(),
            });
        }
        claims.insert(path.clone(), intercept_name.to_string());
        drop(claims);
        Ok(OwnedMountClaim {
            registry: Arc::clone(self),
            path: Some(path),
        })
    }
}

/// `Arc`-owning RAII mount claim; functionally identical to
/// [`MountClaim`] but independent of a borrow's lifetime.
pub struct OwnedMountClaim {
    registry: Arc<MountRegistry>,
    path: Option<PathBuf>,
}

impl OwnedMountClaim {
    pub fn path(&self) -> &std::path::Path {
        self.path.as_deref().expect("path taken before drop")
    }
}

impl Drop for OwnedMountClaim {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            self.registry.release(&path);
        }
    }
}

/// RAII handle on one reservation. Dropping it releases the claim; a
/// caller that wants to release early (and possibly surface an error
/// cleaning up the directory) can call [`MountClaim::release`]
/// explicitly.
pub struct MountClaim<'r> {
    registry: &'r MountRegistry,
    path: Option<PathBuf>,
}

impl MountClaim<'_> {
    pub fn path(&self) -> &std::path::Path {
        self.path.as_deref().expect("path taken before drop")
    }

    pub fn release(mut self) {
        if let Some(path) = self.path.take() {
            self.registry.release(&path);
        }
    }
}

impl Drop for MountClaim<'_> {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            self.registry.release(&path);
        }
    }
}

/// Creates a fresh, empty platform-appropriate mount directory for one
/// intercept: a `siphonfs-*` temp directory everywhere except Windows,
/// where mounting instead claims the next free drive letter.
pub fn create_mount_directory() -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("siphonfs-")
        .tempdir()
        .map_err(Error::MountSetup)
}

#[cfg(not(target_os = "windows"))]
pub fn platform_mount_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().to_path_buf()
}

/// On Windows, SFTP mounts bind to a drive letter rather than a
/// directory under a temp root; this scans `C:`..`Z:` for the first one
/// free. The temp directory created alongside it is unused as a mount
/// target there, only as a registry key placeholder.
#[cfg(target_os = "windows")]
pub fn first_free_drive_letter() -> Result<PathBuf> {
    for letter in b'D'..=b'Z' {
        let candidate = PathBuf::from(format!("{}:\\", letter as char));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(Error::MountSetup(std::io::Error::new(
        std::io::ErrorKind::Other,
        "no free drive letter available",
    )))
}
