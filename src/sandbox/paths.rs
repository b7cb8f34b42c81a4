//! On-disk layout of one sandbox's working directory.

use std::path::{Path, PathBuf};

/// Derived paths inside `{base}/sandboxes/{id}/`. Nothing here is persisted;
/// everything is recomputed from the base directory and the sandbox id.
#[derive(Debug, Clone)]
pub struct SandboxPaths {
    dir: PathBuf,
}

impl SandboxPaths {
    pub fn new(sandboxes_dir: &Path, sandbox_id: &str) -> Self {
        Self {
            dir: sandboxes_dir.join(sandbox_id),
        }
    }

    /// The sandbox working directory itself.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writable overlay image the VM boots from.
    pub fn rootfs(&self) -> PathBuf {
        self.dir.join("rootfs.ext4")
    }

    /// Firecracker API socket.
    pub fn api_sock(&self) -> PathBuf {
        self.dir.join("firecracker.sock")
    }

    /// Host-side UDS multiplexed to the guest vsock port.
    pub fn vsock_uds(&self) -> PathBuf {
        self.dir.join("vsock.sock")
    }

    /// Persisted sandbox descriptor.
    pub fn state_file(&self) -> PathBuf {
        self.dir.join("state.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = SandboxPaths::new(Path::new("/data/sandboxes"), "ab12cd34");
        assert_eq!(paths.dir(), Path::new("/data/sandboxes/ab12cd34"));
        assert_eq!(
            paths.rootfs(),
            PathBuf::from("/data/sandboxes/ab12cd34/rootfs.ext4")
        );
        assert_eq!(
            paths.api_sock(),
            PathBuf::from("/data/sandboxes/ab12cd34/firecracker.sock")
        );
        assert_eq!(
            paths.vsock_uds(),
            PathBuf::from("/data/sandboxes/ab12cd34/vsock.sock")
        );
        assert_eq!(
            paths.state_file(),
            PathBuf::from("/data/sandboxes/ab12cd34/state.json")
        );
    }
}
