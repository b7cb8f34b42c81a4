//! Sandbox registry, state machine enforcement, and capacity accounting.
//!
//! The registry mutex guards the sandbox map, the capacity counters, and the
//! CID allocator, and is only ever held across O(1) metadata work — all I/O
//! (overlay copies, VMM calls, guest round trips) happens against a cloned
//! handle with the registry unlocked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::protocol::{
    AckResponse, AgentRequest, ExecResponse, ListFilesResponse, PingResponse, ReadFileResponse,
    StatResponse,
};
use crate::sandbox::overlay;
use crate::sandbox::paths::SandboxPaths;
use crate::sandbox::state;
use crate::sandbox::vmm::{self, MachineSpec, VmmProcess, SHUTDOWN_GRACE};
use crate::sandbox::vsock::{VsockClient, RECONNECT_BUDGET};
use crate::sandbox::{SandboxDescriptor, SandboxEntry, SandboxError, SandboxHandle, SandboxStatus};

/// Deadline for the post-boot and post-resume agent ping.
const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters for creating a new sandbox.
#[derive(Debug, Clone, Default)]
pub struct CreateParams {
    pub template: String,
    pub memory_mib: Option<u64>,
    pub vcpu_count: Option<u64>,
    pub workspace_id: Option<String>,
}

/// Capacity information for the health endpoint.
#[derive(Debug, Clone)]
pub struct CapacityInfo {
    pub active_sandboxes: usize,
    pub max_sandboxes: usize,
    pub memory_reserved_mib: u64,
    pub memory_available_mib: u64,
    pub memory_budget_mib: u64,
}

struct Registry {
    sandboxes: HashMap<String, SandboxHandle>,
    active_count: usize,
    memory_reserved_mib: u64,
    next_cid: u32,
}

impl Registry {
    fn new() -> Self {
        Self {
            sandboxes: HashMap::new(),
            active_count: 0,
            memory_reserved_mib: 0,
            // CIDs 0-2 are reserved by the vsock spec.
            next_cid: 3,
        }
    }

    /// Allocate the next CID not used by any live sandbox.
    fn allocate_cid(&mut self) -> u32 {
        loop {
            let cid = self.next_cid;
            self.next_cid += 1;
            let in_use = self
                .sandboxes
                .values()
                .any(|h| h.descriptor().vsock_cid == cid);
            if !in_use {
                return cid;
            }
        }
    }

    fn reserve(&mut self, memory_mib: u64) {
        self.active_count += 1;
        self.memory_reserved_mib += memory_mib;
    }

    fn release(&mut self, memory_mib: u64) {
        self.active_count = self.active_count.saturating_sub(1);
        self.memory_reserved_mib = self.memory_reserved_mib.saturating_sub(memory_mib);
    }
}

/// Owns every sandbox on this host.
pub struct SandboxManager {
    config: Arc<Config>,
    registry: StdMutex<Registry>,
}

impl SandboxManager {
    /// Create the manager and the on-disk layout it works in.
    pub fn new(config: Arc<Config>) -> Result<Self, SandboxError> {
        for dir in [
            config.kernels_dir(),
            config.rootfs_dir(),
            config.sandboxes_dir(),
            config.snapshots_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(Self {
            config,
            registry: StdMutex::new(Registry::new()),
        })
    }

    // ── Create ──────────────────────────────────────────────────────

    /// Create and boot a new sandbox.
    ///
    /// Reservation happens under the registry lock; the slow work (overlay,
    /// spawn, configure, boot, agent ping) runs unlocked. Any failure rolls
    /// the reservation back and removes the sandbox directory.
    pub async fn create(&self, params: CreateParams) -> Result<SandboxDescriptor, SandboxError> {
        let memory_mib = params.memory_mib.unwrap_or(self.config.default_memory_mib);
        let vcpu_count = params.vcpu_count.unwrap_or(self.config.default_vcpu);

        if memory_mib < self.config.min_memory_mib || memory_mib > self.config.max_memory_mib {
            return Err(SandboxError::InvalidRequest(format!(
                "memory_mb {} outside [{}, {}]",
                memory_mib, self.config.min_memory_mib, self.config.max_memory_mib
            )));
        }
        if vcpu_count < self.config.min_vcpu || vcpu_count > self.config.max_vcpu {
            return Err(SandboxError::InvalidRequest(format!(
                "vcpu_count {} outside [{}, {}]",
                vcpu_count, self.config.min_vcpu, self.config.max_vcpu
            )));
        }

        let handle = {
            let mut reg = self.registry.lock().unwrap();

            if reg.active_count >= self.config.max_sandboxes {
                return Err(SandboxError::AtCapacity(format!(
                    "maximum sandbox limit reached ({})",
                    self.config.max_sandboxes
                )));
            }
            if reg.memory_reserved_mib + memory_mib > self.config.memory_budget_mib {
                return Err(SandboxError::AtCapacity(format!(
                    "insufficient memory: requested {} MiB, available {} MiB",
                    memory_mib,
                    self.config
                        .memory_budget_mib
                        .saturating_sub(reg.memory_reserved_mib)
                )));
            }
            if let Some(ref workspace_id) = params.workspace_id {
                let in_use = reg
                    .sandboxes
                    .values()
                    .any(|h| h.descriptor().workspace_id == *workspace_id);
                if in_use {
                    return Err(SandboxError::InvalidRequest(format!(
                        "workspace already attached to a live sandbox: {}",
                        workspace_id
                    )));
                }
            }

            let sandbox_id = loop {
                let candidate = new_sandbox_id();
                if !reg.sandboxes.contains_key(&candidate) {
                    break candidate;
                }
            };
            let vsock_cid = reg.allocate_cid();
            let workspace_id = params
                .workspace_id
                .clone()
                .unwrap_or_else(|| sandbox_id.clone());

            let descriptor = SandboxDescriptor {
                sandbox_id: sandbox_id.clone(),
                workspace_id,
                template: params.template.clone(),
                memory_mib,
                vcpu_count,
                vsock_cid,
                status: SandboxStatus::Starting,
                created_at: Utc::now(),
                vmm_pid: None,
            };

            let paths = SandboxPaths::new(&self.config.sandboxes_dir(), &sandbox_id);
            let handle: SandboxHandle = Arc::new(SandboxEntry::new(descriptor, paths));
            reg.sandboxes.insert(sandbox_id, handle.clone());
            reg.reserve(memory_mib);
            handle
        };

        match self.boot(&handle).await {
            Ok(descriptor) => {
                info!(
                    sandbox_id = %descriptor.sandbox_id,
                    workspace_id = %descriptor.workspace_id,
                    memory_mib,
                    vcpu_count,
                    "sandbox created"
                );
                Ok(descriptor)
            }
            Err(e) => {
                warn!(sandbox_id = %handle.id, error = %e, "create failed, rolling back");
                self.rollback_create(&handle, memory_mib).await;
                Err(e)
            }
        }
    }

    async fn boot(&self, handle: &SandboxHandle) -> Result<SandboxDescriptor, SandboxError> {
        let desc = handle.descriptor();

        let kernel_path = self.config.kernel_path(&desc.template);
        if !kernel_path.is_file() {
            return Err(SandboxError::ArtifactMissing(format!(
                "kernel not found: {}",
                kernel_path.display()
            )));
        }

        std::fs::create_dir_all(handle.paths.dir())?;
        let rootfs_path = overlay::create_overlay(
            &self.config.base_rootfs_path(&desc.template),
            handle.paths.dir(),
        )
        .await?;

        let spec = MachineSpec {
            vcpu_count: desc.vcpu_count,
            mem_size_mib: desc.memory_mib,
            kernel_path,
            rootfs_path,
            vsock_cid: desc.vsock_cid,
            vsock_uds: handle.paths.vsock_uds(),
        };

        let pid = {
            let mut vmm_slot = handle.vmm.lock().await;
            let process = VmmProcess::spawn(
                &self.config.firecracker_bin,
                handle.paths.dir(),
                handle.paths.api_sock(),
            )
            .await?;
            let pid = process.pid();
            *vmm_slot = Some(process);

            let vmm = vmm_slot.as_ref().expect("stored above");
            vmm.configure(&spec).await?;
            vmm.start().await?;
            pid
        };

        // The guest needs to boot and start its agent before the vsock UDS
        // answers; retry the whole handshake within the boot budget.
        let mut client = VsockClient::new(handle.paths.vsock_uds());
        client
            .connect(Duration::from_secs(self.config.boot_timeout_s))
            .await?;
        let ping: PingResponse = client.call(&AgentRequest::Ping, PING_TIMEOUT).await?;
        if !ping.success {
            return Err(SandboxError::Protocol("agent ping reported failure".into()));
        }
        *handle.transport.lock().await = Some(client);

        let descriptor = handle.update_descriptor(|d| {
            d.vmm_pid = Some(pid);
            d.transition(SandboxStatus::Running)
        })?;
        state::write_descriptor(handle.paths.dir(), &descriptor)?;
        Ok(descriptor)
    }

    async fn rollback_create(&self, handle: &SandboxHandle, memory_mib: u64) {
        if let Some(mut process) = handle.vmm.lock().await.take() {
            process.kill_now().await;
        }
        if let Err(e) = overlay::remove_dir(handle.paths.dir()) {
            warn!(sandbox_id = %handle.id, error = %e, "rollback could not remove directory");
        }

        let mut reg = self.registry.lock().unwrap();
        if reg.sandboxes.remove(&handle.id).is_some() {
            reg.release(memory_mib);
        }
    }

    // ── Lookup ──────────────────────────────────────────────────────

    fn get(&self, sandbox_id: &str) -> Result<SandboxHandle, SandboxError> {
        self.registry
            .lock()
            .unwrap()
            .sandboxes
            .get(sandbox_id)
            .cloned()
            .ok_or_else(|| SandboxError::NotFound(sandbox_id.to_string()))
    }

    pub fn descriptor(&self, sandbox_id: &str) -> Result<SandboxDescriptor, SandboxError> {
        Ok(self.get(sandbox_id)?.descriptor())
    }

    pub fn list(&self) -> Vec<SandboxDescriptor> {
        let reg = self.registry.lock().unwrap();
        let mut all: Vec<_> = reg.sandboxes.values().map(|h| h.descriptor()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    pub fn capacity_info(&self) -> CapacityInfo {
        let reg = self.registry.lock().unwrap();
        CapacityInfo {
            active_sandboxes: reg.active_count,
            max_sandboxes: self.config.max_sandboxes,
            memory_reserved_mib: reg.memory_reserved_mib,
            memory_available_mib: self
                .config
                .memory_budget_mib
                .saturating_sub(reg.memory_reserved_mib),
            memory_budget_mib: self.config.memory_budget_mib,
        }
    }

    // ── Guest operations ────────────────────────────────────────────

    /// One serialized round trip to a Running sandbox's guest agent.
    ///
    /// The status is re-checked under the transport mutex so a call racing a
    /// pause or destroy gets `WrongState` instead of an I/O error.
    async fn guest_call<T: DeserializeOwned>(
        &self,
        sandbox_id: &str,
        request: AgentRequest,
        deadline: Duration,
    ) -> Result<T, SandboxError> {
        let handle = self.get(sandbox_id)?;
        handle.require_status(SandboxStatus::Running)?;

        let mut transport = handle.transport.lock().await;
        handle.require_status(SandboxStatus::Running)?;

        let client = transport
            .get_or_insert_with(|| VsockClient::new(handle.paths.vsock_uds()));
        let response = client.call(&request, deadline).await?;
        handle.touch();
        Ok(response)
    }

    fn op_deadline(&self) -> Duration {
        Duration::from_secs(self.config.exec_timeout_s)
    }

    pub async fn exec(
        &self,
        sandbox_id: &str,
        command: String,
        timeout_s: u64,
        working_dir: String,
    ) -> Result<ExecResponse, SandboxError> {
        let request = AgentRequest::Exec {
            command,
            timeout: timeout_s,
            working_dir,
            env: HashMap::new(),
        };
        // The guest enforces the command timeout; give the transport a little
        // slack on top so the guest's answer wins the race.
        self.guest_call(sandbox_id, request, Duration::from_secs(timeout_s + 5))
            .await
    }

    pub async fn read_file(
        &self,
        sandbox_id: &str,
        path: String,
    ) -> Result<ReadFileResponse, SandboxError> {
        self.guest_call(sandbox_id, AgentRequest::ReadFile { path }, self.op_deadline())
            .await
    }

    pub async fn write_file(
        &self,
        sandbox_id: &str,
        path: String,
        content: String,
        is_base64: bool,
    ) -> Result<AckResponse, SandboxError> {
        let request = AgentRequest::WriteFile {
            path,
            content,
            is_base64,
            mode: None,
        };
        let response: AckResponse = self
            .guest_call(sandbox_id, request, self.op_deadline())
            .await?;
        if response.success {
            Ok(response)
        } else {
            Err(SandboxError::GuestError(
                response.error.unwrap_or_else(|| "write failed".into()),
            ))
        }
    }

    pub async fn list_files(
        &self,
        sandbox_id: &str,
        path: String,
    ) -> Result<ListFilesResponse, SandboxError> {
        let request = AgentRequest::ListFiles {
            path,
            recursive: false,
        };
        self.guest_call(sandbox_id, request, self.op_deadline()).await
    }

    pub async fn stat(
        &self,
        sandbox_id: &str,
        path: String,
    ) -> Result<StatResponse, SandboxError> {
        self.guest_call(sandbox_id, AgentRequest::Stat { path }, self.op_deadline())
            .await
    }

    pub async fn mkdir(
        &self,
        sandbox_id: &str,
        path: String,
        parents: bool,
    ) -> Result<(), SandboxError> {
        let response: AckResponse = self
            .guest_call(
                sandbox_id,
                AgentRequest::Mkdir { path, parents },
                self.op_deadline(),
            )
            .await?;
        if response.success {
            Ok(())
        } else {
            Err(SandboxError::GuestError(
                response.error.unwrap_or_else(|| "mkdir failed".into()),
            ))
        }
    }

    pub async fn delete_file(
        &self,
        sandbox_id: &str,
        path: String,
        recursive: bool,
    ) -> Result<(), SandboxError> {
        let response: AckResponse = self
            .guest_call(
                sandbox_id,
                AgentRequest::DeleteFile { path, recursive },
                self.op_deadline(),
            )
            .await?;
        if response.success {
            Ok(())
        } else {
            Err(SandboxError::GuestError(
                response.error.unwrap_or_else(|| "delete failed".into()),
            ))
        }
    }

    // ── Pause / resume ──────────────────────────────────────────────

    /// Snapshot a running sandbox and stop its VMM.
    ///
    /// The memory reservation is retained while paused so a later resume can
    /// never fail with `AtCapacity`.
    pub async fn pause(&self, sandbox_id: &str) -> Result<SandboxDescriptor, SandboxError> {
        let handle = self.get(sandbox_id)?;

        let desc = handle.update_descriptor(|d| d.transition(SandboxStatus::Pausing))?;
        state::write_descriptor(handle.paths.dir(), &desc)?;

        // Wait out any in-flight guest call, then drop the connection; the
        // guest is about to be frozen.
        {
            let mut transport = handle.transport.lock().await;
            *transport = None;
        }

        let snapshot_dir = self.config.snapshot_dir(&desc.workspace_id);
        let result: Result<(), SandboxError> = async {
            std::fs::create_dir_all(&snapshot_dir)?;

            let mut vmm_slot = handle.vmm.lock().await;
            let process = vmm_slot
                .as_mut()
                .ok_or_else(|| SandboxError::VmmUnresponsive("no VMM child".into()))?;
            process.pause_vm().await?;
            process.snapshot_create(&snapshot_dir).await?;
            validate_snapshot(&snapshot_dir)?;

            let mut process = vmm_slot.take().expect("checked above");
            drop(vmm_slot);
            process.shutdown(SHUTDOWN_GRACE).await;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                let descriptor = handle.update_descriptor(|d| {
                    d.vmm_pid = None;
                    d.transition(SandboxStatus::Paused)
                })?;
                state::write_descriptor(handle.paths.dir(), &descriptor)?;
                info!(sandbox_id, workspace_id = %descriptor.workspace_id, "sandbox paused");
                Ok(descriptor)
            }
            Err(e) => {
                self.mark_failed(&handle);
                Err(e)
            }
        }
    }

    /// Resume a paused sandbox by loading its snapshot into a fresh VMM.
    pub async fn resume(&self, sandbox_id: &str) -> Result<SandboxDescriptor, SandboxError> {
        let handle = self.get(sandbox_id)?;

        let desc = handle.update_descriptor(|d| d.transition(SandboxStatus::Resuming))?;
        state::write_descriptor(handle.paths.dir(), &desc)?;

        let snapshot_dir = self.config.snapshot_dir(&desc.workspace_id);
        let result: Result<u32, SandboxError> = async {
            validate_snapshot(&snapshot_dir)?;

            let mut process = VmmProcess::spawn(
                &self.config.firecracker_bin,
                handle.paths.dir(),
                handle.paths.api_sock(),
            )
            .await?;
            let pid = process.pid();

            if let Err(e) = process.snapshot_load(&snapshot_dir, true).await {
                process.kill_now().await;
                return Err(e);
            }
            *handle.vmm.lock().await = Some(process);

            let mut client = VsockClient::new(handle.paths.vsock_uds());
            client.connect(RECONNECT_BUDGET).await?;
            let ping: PingResponse = client.call(&AgentRequest::Ping, PING_TIMEOUT).await?;
            if !ping.success {
                return Err(SandboxError::Protocol("agent ping reported failure".into()));
            }
            *handle.transport.lock().await = Some(client);
            Ok(pid)
        }
        .await;

        match result {
            Ok(pid) => {
                let descriptor = handle.update_descriptor(|d| {
                    d.vmm_pid = Some(pid);
                    d.transition(SandboxStatus::Running)
                })?;
                state::write_descriptor(handle.paths.dir(), &descriptor)?;
                handle.touch();
                info!(sandbox_id, pid, "sandbox resumed");
                Ok(descriptor)
            }
            Err(e) => {
                if let Some(mut process) = handle.vmm.lock().await.take() {
                    process.kill_now().await;
                }
                self.mark_failed(&handle);
                Err(e)
            }
        }
    }

    fn mark_failed(&self, handle: &SandboxHandle) {
        if let Ok(descriptor) = handle.update_descriptor(|d| d.transition(SandboxStatus::Failed)) {
            let _ = state::write_descriptor(handle.paths.dir(), &descriptor);
            warn!(sandbox_id = %handle.id, "sandbox marked failed");
        }
    }

    // ── Destroy ─────────────────────────────────────────────────────

    /// Tear down a sandbox and reclaim everything it holds. Idempotent: an
    /// unknown id and a repeat call both succeed.
    pub async fn destroy(&self, sandbox_id: &str) -> Result<(), SandboxError> {
        let handle = {
            let reg = self.registry.lock().unwrap();
            reg.sandboxes.get(sandbox_id).cloned()
        };
        let Some(handle) = handle else {
            return Ok(());
        };

        let desc = match handle.update_descriptor(|d| d.transition(SandboxStatus::Destroying)) {
            Ok(desc) => desc,
            // Another destroy is already in flight (or finished).
            Err(_) => return Ok(()),
        };
        let _ = state::write_descriptor(handle.paths.dir(), &desc);

        {
            let mut transport = handle.transport.lock().await;
            *transport = None;
        }

        if let Some(mut process) = handle.vmm.lock().await.take() {
            process.shutdown(SHUTDOWN_GRACE).await;
        }

        // Directory removal is best-effort: destroy must reclaim capacity
        // even when the filesystem misbehaves.
        if let Err(e) = overlay::remove_dir(handle.paths.dir()) {
            warn!(sandbox_id, error = %e, "could not remove sandbox directory");
        }
        let snapshot_dir = self.config.snapshot_dir(&desc.workspace_id);
        if let Err(e) = overlay::remove_dir(&snapshot_dir) {
            warn!(sandbox_id, error = %e, "could not remove snapshot directory");
        }

        {
            let mut reg = self.registry.lock().unwrap();
            if reg.sandboxes.remove(sandbox_id).is_some() {
                reg.release(desc.memory_mib);
            }
        }
        let _ = handle.update_descriptor(|d| d.transition(SandboxStatus::Destroyed));

        info!(sandbox_id, "sandbox destroyed");
        Ok(())
    }

    /// Destroy Running sandboxes idle longer than `idle_timeout`.
    pub async fn reap_idle(&self, idle_timeout: Duration) {
        let expired: Vec<String> = {
            let reg = self.registry.lock().unwrap();
            reg.sandboxes
                .values()
                .filter(|h| {
                    h.status() == SandboxStatus::Running && h.idle_for() > idle_timeout
                })
                .map(|h| h.id.clone())
                .collect()
        };

        for id in expired {
            info!(sandbox_id = %id, "reaping idle sandbox");
            if let Err(e) = self.destroy(&id).await {
                warn!(sandbox_id = %id, error = %e, "idle reap failed");
            }
        }
    }

    // ── Crash recovery ──────────────────────────────────────────────

    /// Reconcile on-disk descriptors with reality at process start.
    ///
    /// Running sandboxes reattach when their recorded pid is alive and the
    /// API socket answers; Paused sandboxes reattach when their snapshot pair
    /// is valid. Everything else — mid-transition descriptors, dead VMMs,
    /// unreadable state — is swept.
    pub async fn recover(&self) -> (usize, usize) {
        let (found, unreadable) = state::scan(&self.config.sandboxes_dir());

        let mut reattached = 0;
        let mut swept = 0;

        for dir in unreadable {
            if let Err(e) = overlay::remove_dir(&dir) {
                warn!(dir = %dir.display(), error = %e, "sweep failed");
            }
            swept += 1;
        }

        for (dir, descriptor) in found {
            // Already tracked (a repeat recover must not double-reserve).
            let tracked = {
                let reg = self.registry.lock().unwrap();
                reg.sandboxes.contains_key(&descriptor.sandbox_id)
            };
            if tracked {
                continue;
            }

            let paths = SandboxPaths::new(&self.config.sandboxes_dir(), &descriptor.sandbox_id);
            let keep = match descriptor.status {
                SandboxStatus::Running => {
                    let pid_ok = descriptor.vmm_pid.is_some_and(vmm::pid_alive);
                    if pid_ok {
                        VmmProcess::attach(descriptor.vmm_pid.unwrap(), paths.api_sock())
                            .probe_api()
                            .await
                    } else {
                        false
                    }
                }
                SandboxStatus::Paused => {
                    validate_snapshot(&self.config.snapshot_dir(&descriptor.workspace_id)).is_ok()
                }
                _ => false,
            };

            if !keep {
                info!(
                    sandbox_id = %descriptor.sandbox_id,
                    status = %descriptor.status,
                    "sweeping stale sandbox"
                );
                if let Err(e) = overlay::remove_dir(&dir) {
                    warn!(dir = %dir.display(), error = %e, "sweep failed");
                }
                let snapshot_dir = self.config.snapshot_dir(&descriptor.workspace_id);
                let _ = overlay::remove_dir(&snapshot_dir);
                swept += 1;
                continue;
            }

            info!(
                sandbox_id = %descriptor.sandbox_id,
                status = %descriptor.status,
                "reattaching sandbox"
            );
            let entry = SandboxEntry::new(descriptor.clone(), paths.clone());
            if descriptor.status == SandboxStatus::Running {
                *entry.vmm.lock().await =
                    Some(VmmProcess::attach(descriptor.vmm_pid.unwrap(), paths.api_sock()));
            }

            let mut reg = self.registry.lock().unwrap();
            reg.sandboxes
                .insert(descriptor.sandbox_id.clone(), Arc::new(entry));
            reg.reserve(descriptor.memory_mib);
            if descriptor.vsock_cid >= reg.next_cid {
                reg.next_cid = descriptor.vsock_cid + 1;
            }
            reattached += 1;
        }

        (reattached, swept)
    }
}

/// A snapshot pair is valid only when both files exist and are non-empty.
fn validate_snapshot(snapshot_dir: &std::path::Path) -> Result<(), SandboxError> {
    for name in ["snapshot", "memory"] {
        let path = snapshot_dir.join(name);
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(SandboxError::ArtifactMissing(format!(
                "snapshot file missing or empty: {}",
                path.display()
            )));
        }
    }
    Ok(())
}

fn new_sandbox_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
