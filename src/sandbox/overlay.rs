//! Copy-on-write overlay rootfs management.
//!
//! Each sandbox boots from a private writable copy of the immutable base
//! image. The copy prefers a reflink (instant on btrfs/XFS) and falls back to
//! a sparse byte-wise copy elsewhere; `cp --reflink=auto --sparse=always`
//! does exactly that.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use crate::sandbox::SandboxError;

/// Create the per-sandbox writable rootfs inside `sandbox_dir`.
///
/// The base image is never written. Fails with `ArtifactMissing` if the base
/// image does not exist and `DiskFull` when the filesystem runs out of space.
pub async fn create_overlay(
    base_rootfs: &Path,
    sandbox_dir: &Path,
) -> Result<PathBuf, SandboxError> {
    if !base_rootfs.is_file() {
        return Err(SandboxError::ArtifactMissing(format!(
            "base rootfs not found: {}",
            base_rootfs.display()
        )));
    }

    let overlay = sandbox_dir.join("rootfs.ext4");

    let output = Command::new("cp")
        .arg("--reflink=auto")
        .arg("--sparse=always")
        .arg(base_rootfs)
        .arg(&overlay)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // cp reports ENOSPC in its stderr; surface it as a distinct kind so
        // the operator can tell capacity from corruption.
        if stderr.contains("No space left on device") {
            return Err(SandboxError::DiskFull(format!(
                "copying {}: {}",
                base_rootfs.display(),
                stderr.trim()
            )));
        }
        return Err(SandboxError::Io(std::io::Error::other(format!(
            "cp {} -> {} failed ({}): {}",
            base_rootfs.display(),
            overlay.display(),
            output.status,
            stderr.trim()
        ))));
    }

    debug!(overlay = %overlay.display(), "overlay rootfs created");
    Ok(overlay)
}

/// Remove a sandbox working directory recursively. Missing directories are
/// fine; destroy must stay idempotent.
pub fn remove_dir(dir: &Path) -> Result<(), SandboxError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
