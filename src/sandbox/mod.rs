pub mod manager;
pub mod overlay;
pub mod paths;
pub mod state;
pub mod vmm;
pub mod vsock;

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::sandbox::paths::SandboxPaths;
use crate::sandbox::vmm::VmmProcess;
use crate::sandbox::vsock::VsockClient;

// ── Sandbox error ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("sandbox not found: {0}")]
    NotFound(String),

    #[error("sandbox in wrong state: expected {expected}, got {actual}")]
    WrongState {
        expected: &'static str,
        actual: String,
    },

    #[error("at capacity: {0}")]
    AtCapacity(String),

    #[error("artifact missing: {0}")]
    ArtifactMissing(String),

    #[error("failed to spawn VMM: {0}")]
    VmmSpawn(String),

    #[error("VMM API error: {0}")]
    VmmProtocol(String),

    #[error("VMM unresponsive: {0}")]
    VmmUnresponsive(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("message too large: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),

    #[error("guest error: {0}")]
    GuestError(String),

    #[error("disk full: {0}")]
    DiskFull(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

// ── Sandbox status ──────────────────────────────────────────────────

/// Lifecycle states for a sandbox. Transitions are validated at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    /// VMM is being spawned and configured.
    Starting,
    /// Guest agent is reachable; exec and file ops are accepted.
    Running,
    /// A snapshot is being taken.
    Pausing,
    /// Snapshot on disk, no VMM child.
    Paused,
    /// A fresh VMM is loading the snapshot.
    Resuming,
    /// Teardown in progress.
    Destroying,
    /// Terminal: directories removed, capacity released.
    Destroyed,
    /// Terminal: an unrecoverable step failed; directory kept for diagnosis.
    Failed,
}

impl SandboxStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SandboxStatus::Destroyed | SandboxStatus::Failed)
    }

    /// Whether a VMM child process is expected to be alive in this state.
    pub fn expects_vmm(self) -> bool {
        matches!(
            self,
            SandboxStatus::Starting
                | SandboxStatus::Running
                | SandboxStatus::Pausing
                | SandboxStatus::Resuming
                | SandboxStatus::Destroying
        )
    }

    fn can_transition(self, to: SandboxStatus) -> bool {
        use SandboxStatus::*;
        match (self, to) {
            (Starting, Running) => true,
            (Running, Pausing) => true,
            (Pausing, Paused) => true,
            (Paused, Resuming) => true,
            (Resuming, Running) => true,
            // destroy() accepts any state except an in-flight or completed
            // destroy; Failed sandboxes must still be destroyable.
            (from, Destroying) => !matches!(from, Destroying | Destroyed),
            (Destroying, Destroyed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SandboxStatus::Starting => "starting",
            SandboxStatus::Running => "running",
            SandboxStatus::Pausing => "pausing",
            SandboxStatus::Paused => "paused",
            SandboxStatus::Resuming => "resuming",
            SandboxStatus::Destroying => "destroying",
            SandboxStatus::Destroyed => "destroyed",
            SandboxStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

// ── Sandbox descriptor ──────────────────────────────────────────────

/// Persisted state of one sandbox, written to `state.json` in its working
/// directory on every status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxDescriptor {
    pub sandbox_id: String,
    /// Identity that survives pause/resume lineage. Defaults to `sandbox_id`.
    pub workspace_id: String,
    pub template: String,
    pub memory_mib: u64,
    pub vcpu_count: u64,
    /// Guest context id, >= 3, unique among live sandboxes on this host.
    pub vsock_cid: u32,
    pub status: SandboxStatus,
    pub created_at: DateTime<Utc>,
    /// OS pid of the Firecracker child while one is expected alive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmm_pid: Option<u32>,
}

impl SandboxDescriptor {
    /// Transition to a new status, rejecting invalid edges.
    pub fn transition(&mut self, to: SandboxStatus) -> Result<(), SandboxError> {
        if self.status.can_transition(to) {
            self.status = to;
            Ok(())
        } else {
            Err(SandboxError::WrongState {
                expected: "valid transition target",
                actual: format!("{} -> {}", self.status, to),
            })
        }
    }
}

// ── Sandbox entry ───────────────────────────────────────────────────

/// One tracked sandbox: the descriptor plus its I/O handles.
///
/// Lock order and scope follow the concurrency model: the descriptor mutex
/// covers O(1) metadata reads and writes only; the `vmm` mutex is held across
/// a single VMM API request; the `transport` mutex is held across a single
/// guest round trip. None of them is held while another is being awaited.
pub struct SandboxEntry {
    pub id: String,
    pub paths: SandboxPaths,
    descriptor: StdMutex<SandboxDescriptor>,
    pub(crate) vmm: Mutex<Option<VmmProcess>>,
    pub(crate) transport: Mutex<Option<VsockClient>>,
    last_active: StdMutex<Instant>,
}

/// Thread-safe handle to a sandbox, shared between the registry and callers.
pub type SandboxHandle = Arc<SandboxEntry>;

impl SandboxEntry {
    pub fn new(descriptor: SandboxDescriptor, paths: SandboxPaths) -> Self {
        Self {
            id: descriptor.sandbox_id.clone(),
            paths,
            descriptor: StdMutex::new(descriptor),
            vmm: Mutex::new(None),
            transport: Mutex::new(None),
            last_active: StdMutex::new(Instant::now()),
        }
    }

    /// Snapshot of the current descriptor.
    pub fn descriptor(&self) -> SandboxDescriptor {
        self.descriptor.lock().unwrap().clone()
    }

    pub fn status(&self) -> SandboxStatus {
        self.descriptor.lock().unwrap().status
    }

    /// Apply a mutation to the descriptor under its lock and return a clone
    /// of the result, so callers can persist it without holding the lock.
    pub fn update_descriptor<F>(&self, f: F) -> Result<SandboxDescriptor, SandboxError>
    where
        F: FnOnce(&mut SandboxDescriptor) -> Result<(), SandboxError>,
    {
        let mut desc = self.descriptor.lock().unwrap();
        f(&mut desc)?;
        Ok(desc.clone())
    }

    /// Require the sandbox to be in `expected`, otherwise `WrongState`.
    pub fn require_status(&self, expected: SandboxStatus) -> Result<(), SandboxError> {
        let actual = self.status();
        if actual == expected {
            Ok(())
        } else {
            Err(SandboxError::WrongState {
                expected: match expected {
                    SandboxStatus::Running => "running",
                    SandboxStatus::Paused => "paused",
                    _ => "other",
                },
                actual: actual.to_string(),
            })
        }
    }

    pub fn touch(&self) {
        *self.last_active.lock().unwrap() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_active.lock().unwrap().elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_descriptor(status: SandboxStatus) -> SandboxDescriptor {
        SandboxDescriptor {
            sandbox_id: "ab12cd34".into(),
            workspace_id: "ab12cd34".into(),
            template: "default".into(),
            memory_mib: 512,
            vcpu_count: 1,
            vsock_cid: 3,
            status,
            created_at: Utc::now(),
            vmm_pid: Some(4242),
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SandboxStatus::Starting.to_string(), "starting");
        assert_eq!(SandboxStatus::Running.to_string(), "running");
        assert_eq!(SandboxStatus::Paused.to_string(), "paused");
        assert_eq!(SandboxStatus::Destroyed.to_string(), "destroyed");
        assert_eq!(SandboxStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_valid_lifecycle_path() {
        let mut desc = make_descriptor(SandboxStatus::Starting);

        assert!(desc.transition(SandboxStatus::Running).is_ok());
        assert!(desc.transition(SandboxStatus::Pausing).is_ok());
        assert!(desc.transition(SandboxStatus::Paused).is_ok());
        assert!(desc.transition(SandboxStatus::Resuming).is_ok());
        assert!(desc.transition(SandboxStatus::Running).is_ok());
        assert!(desc.transition(SandboxStatus::Destroying).is_ok());
        assert!(desc.transition(SandboxStatus::Destroyed).is_ok());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut desc = make_descriptor(SandboxStatus::Starting);
        // Starting cannot pause.
        assert!(desc.transition(SandboxStatus::Pausing).is_err());

        let mut desc = make_descriptor(SandboxStatus::Paused);
        // A second pause on a paused sandbox is rejected.
        assert!(desc.transition(SandboxStatus::Pausing).is_err());

        let mut desc = make_descriptor(SandboxStatus::Destroyed);
        // Destroyed stays destroyed.
        assert!(desc.transition(SandboxStatus::Destroying).is_err());
        assert!(desc.transition(SandboxStatus::Failed).is_err());
    }

    #[test]
    fn test_failed_sandbox_can_be_destroyed() {
        let mut desc = make_descriptor(SandboxStatus::Failed);
        assert!(desc.transition(SandboxStatus::Destroying).is_ok());
        assert!(desc.transition(SandboxStatus::Destroyed).is_ok());
    }

    #[test]
    fn test_any_nonterminal_can_destroy_or_fail() {
        for status in [
            SandboxStatus::Starting,
            SandboxStatus::Running,
            SandboxStatus::Pausing,
            SandboxStatus::Paused,
            SandboxStatus::Resuming,
        ] {
            let mut desc = make_descriptor(status);
            assert!(desc.transition(SandboxStatus::Destroying).is_ok());

            let mut desc = make_descriptor(status);
            assert!(desc.transition(SandboxStatus::Failed).is_ok());
        }
    }

    #[test]
    fn test_expects_vmm_matches_states() {
        assert!(SandboxStatus::Starting.expects_vmm());
        assert!(SandboxStatus::Running.expects_vmm());
        assert!(SandboxStatus::Pausing.expects_vmm());
        assert!(SandboxStatus::Resuming.expects_vmm());
        assert!(SandboxStatus::Destroying.expects_vmm());
        assert!(!SandboxStatus::Paused.expects_vmm());
        assert!(!SandboxStatus::Destroyed.expects_vmm());
        assert!(!SandboxStatus::Failed.expects_vmm());
    }

    #[test]
    fn test_descriptor_serde_roundtrip() {
        let desc = make_descriptor(SandboxStatus::Running);
        let json = serde_json::to_string(&desc).unwrap();
        assert!(json.contains(r#""status":"running""#));

        let back: SandboxDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sandbox_id, desc.sandbox_id);
        assert_eq!(back.status, SandboxStatus::Running);
        assert_eq!(back.vmm_pid, Some(4242));
        assert_eq!(back.vsock_cid, 3);
    }

    #[test]
    fn test_descriptor_without_pid() {
        let mut desc = make_descriptor(SandboxStatus::Paused);
        desc.vmm_pid = None;
        let json = serde_json::to_string(&desc).unwrap();
        assert!(!json.contains("vmm_pid"));

        let back: SandboxDescriptor = serde_json::from_str(&json).unwrap();
        assert!(back.vmm_pid.is_none());
    }

    #[test]
    fn test_require_status() {
        let entry = SandboxEntry::new(
            make_descriptor(SandboxStatus::Paused),
            SandboxPaths::new(std::path::Path::new("/tmp/sb"), "ab12cd34"),
        );

        assert!(entry.require_status(SandboxStatus::Paused).is_ok());
        let err = entry.require_status(SandboxStatus::Running).unwrap_err();
        assert!(matches!(err, SandboxError::WrongState { .. }));
    }
}
