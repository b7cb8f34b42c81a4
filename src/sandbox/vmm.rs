//! Firecracker child process supervision and API client.
//!
//! One `VmmProcess` per sandbox. Configuration happens over HTTP/1.1 on the
//! API Unix socket and must follow Firecracker's ordering: machine-config,
//! boot-source, drives, vsock, then InstanceStart. Firecracker rejects
//! configuration after start and rejects `/snapshot/create` unless the VM is
//! paused; violations come back as opaque 400s which are surfaced as
//! `VmmProtocol` rather than retried.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::sandbox::SandboxError;

/// How long to wait for the VMM to create its API socket after spawn.
const API_SOCKET_WAIT: Duration = Duration::from_secs(5);

/// Per-request deadline on the API socket.
const API_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Time between SendCtrlAltDel and the SIGKILL fallback.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const BOOT_ARGS: &str = "console=ttyS0 reboot=k panic=1 pci=off init=/sbin/init";

/// Everything the VMM needs to configure one microVM.
#[derive(Debug, Clone)]
pub struct MachineSpec {
    pub vcpu_count: u64,
    pub mem_size_mib: u64,
    pub kernel_path: PathBuf,
    pub rootfs_path: PathBuf,
    pub vsock_cid: u32,
    pub vsock_uds: PathBuf,
}

/// A supervised Firecracker child.
///
/// `spawn` produces a child we own and can `wait()` on; `attach` wraps a pid
/// recovered from a previous service run, where signals are the only handle
/// we have.
pub struct VmmProcess {
    pid: u32,
    child: Option<Child>,
    api_sock: PathBuf,
}

impl VmmProcess {
    /// Start the VMM binary with its API socket inside `sandbox_dir` and wait
    /// for the socket to appear.
    pub async fn spawn(
        firecracker_bin: &Path,
        sandbox_dir: &Path,
        api_sock: PathBuf,
    ) -> Result<Self, SandboxError> {
        // A stale socket from a previous child makes Firecracker refuse to bind.
        if api_sock.exists() {
            std::fs::remove_file(&api_sock)?;
        }

        let child = Command::new(firecracker_bin)
            .arg("--api-sock")
            .arg(&api_sock)
            .current_dir(sandbox_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                SandboxError::VmmSpawn(format!("{}: {}", firecracker_bin.display(), e))
            })?;

        let pid = child
            .id()
            .ok_or_else(|| SandboxError::VmmSpawn("child exited before returning a pid".into()))?;

        let mut vmm = Self {
            pid,
            child: Some(child),
            api_sock,
        };

        if !wait_for_socket(&vmm.api_sock, API_SOCKET_WAIT).await {
            vmm.kill_now().await;
            return Err(SandboxError::VmmUnresponsive(format!(
                "API socket not ready after {:?}",
                API_SOCKET_WAIT
            )));
        }

        debug!(pid, api_sock = %vmm.api_sock.display(), "firecracker spawned");
        Ok(vmm)
    }

    /// Wrap a pid recovered from a prior run of the service.
    pub fn attach(pid: u32, api_sock: PathBuf) -> Self {
        Self {
            pid,
            child: None,
            api_sock,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Signal-0 liveness probe.
    pub fn is_alive(&self) -> bool {
        pid_alive(self.pid)
    }

    /// Configure the microVM. Order matters; any failure aborts.
    pub async fn configure(&self, spec: &MachineSpec) -> Result<(), SandboxError> {
        self.request(
            "PUT",
            "/machine-config",
            Some(json!({
                "vcpu_count": spec.vcpu_count,
                "mem_size_mib": spec.mem_size_mib,
                "smt": false,
            })),
        )
        .await?;

        self.request(
            "PUT",
            "/boot-source",
            Some(json!({
                "kernel_image_path": spec.kernel_path.to_string_lossy(),
                "boot_args": BOOT_ARGS,
            })),
        )
        .await?;

        self.request(
            "PUT",
            "/drives/rootfs",
            Some(json!({
                "drive_id": "rootfs",
                "path_on_host": spec.rootfs_path.to_string_lossy(),
                "is_root_device": true,
                "is_read_only": false,
            })),
        )
        .await?;

        self.request(
            "PUT",
            "/vsock",
            Some(json!({
                "vsock_id": "vsock0",
                "guest_cid": spec.vsock_cid,
                "uds_path": spec.vsock_uds.to_string_lossy(),
            })),
        )
        .await?;

        Ok(())
    }

    pub async fn start(&self) -> Result<(), SandboxError> {
        self.request("PUT", "/actions", Some(json!({"action_type": "InstanceStart"})))
            .await
            .map(|_| ())
    }

    /// Pause the running VM. Only used as an intermediate step before
    /// snapshotting.
    pub async fn pause_vm(&self) -> Result<(), SandboxError> {
        self.request("PATCH", "/vm", Some(json!({"state": "Paused"})))
            .await
            .map(|_| ())
    }

    pub async fn resume_vm(&self) -> Result<(), SandboxError> {
        self.request("PATCH", "/vm", Some(json!({"state": "Resumed"})))
            .await
            .map(|_| ())
    }

    /// Create a full snapshot into `snapshot_dir`. The VM must already be
    /// paused.
    pub async fn snapshot_create(&self, snapshot_dir: &Path) -> Result<(), SandboxError> {
        self.request(
            "PUT",
            "/snapshot/create",
            Some(json!({
                "snapshot_type": "Full",
                "snapshot_path": snapshot_dir.join("snapshot").to_string_lossy(),
                "mem_file_path": snapshot_dir.join("memory").to_string_lossy(),
            })),
        )
        .await
        .map(|_| ())
    }

    /// Load a snapshot on a freshly spawned VMM with no VM configured yet.
    pub async fn snapshot_load(
        &self,
        snapshot_dir: &Path,
        resume: bool,
    ) -> Result<(), SandboxError> {
        self.request(
            "PUT",
            "/snapshot/load",
            Some(json!({
                "snapshot_path": snapshot_dir.join("snapshot").to_string_lossy(),
                "mem_backend": {
                    "backend_type": "File",
                    "backend_path": snapshot_dir.join("memory").to_string_lossy(),
                },
                "enable_diff_snapshots": false,
                "resume_vm": resume,
            })),
        )
        .await
        .map(|_| ())
    }

    /// Probe the API socket. Used during crash recovery to decide whether a
    /// recorded pid still fronts a responsive VMM.
    pub async fn probe_api(&self) -> bool {
        self.request("GET", "/", None).await.is_ok()
    }

    pub async fn send_ctrl_alt_del(&self) -> Result<(), SandboxError> {
        self.request(
            "PUT",
            "/actions",
            Some(json!({"action_type": "SendCtrlAltDel"})),
        )
        .await
        .map(|_| ())
    }

    /// Graceful shutdown: Ctrl-Alt-Del, wait out the grace, then SIGKILL.
    /// Always reaps an owned child.
    pub async fn shutdown(&mut self, grace: Duration) {
        if let Err(e) = self.send_ctrl_alt_del().await {
            debug!(pid = self.pid, error = %e, "ctrl-alt-del not delivered");
        }

        match self.child.as_mut() {
            Some(child) => {
                if timeout(grace, child.wait()).await.is_err() {
                    warn!(pid = self.pid, "VMM did not exit within grace, killing");
                    let _ = child.kill().await;
                }
            }
            None => {
                sleep(grace).await;
                if self.is_alive() {
                    warn!(pid = self.pid, "reattached VMM did not exit, killing");
                    let _ = kill(Pid::from_raw(self.pid as i32), Signal::SIGKILL);
                }
            }
        }
    }

    /// Immediate SIGKILL, used when rolling back a failed create.
    pub async fn kill_now(&mut self) {
        match self.child.as_mut() {
            Some(child) => {
                let _ = child.kill().await;
            }
            None => {
                let _ = kill(Pid::from_raw(self.pid as i32), Signal::SIGKILL);
            }
        }
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<String, SandboxError> {
        let (status, response_body) =
            http_request(&self.api_sock, method, path, body, API_CALL_TIMEOUT).await?;

        if (200..300).contains(&status) {
            return Ok(response_body);
        }

        // Firecracker wraps errors as {"fault_message": "..."}.
        let fault = serde_json::from_str::<Value>(&response_body)
            .ok()
            .and_then(|v| v.get("fault_message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or(response_body);
        Err(SandboxError::VmmProtocol(format!(
            "{} {} -> {}: {}",
            method, path, status, fault
        )))
    }
}

/// Whether a pid is alive, via a signal-0 probe.
pub fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Poll for a Unix socket path to appear.
pub async fn wait_for_socket(path: &Path, budget: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + budget;
    while tokio::time::Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        sleep(Duration::from_millis(100)).await;
    }
    path.exists()
}

/// One HTTP/1.1 request over a Unix socket: connect, write, read the response
/// head and a Content-Length-framed body. Returns (status, body).
pub(crate) async fn http_request(
    sock: &Path,
    method: &str,
    path: &str,
    body: Option<Value>,
    deadline: Duration,
) -> Result<(u16, String), SandboxError> {
    timeout(deadline, async {
        let mut stream = UnixStream::connect(sock).await.map_err(|e| {
            SandboxError::VmmUnresponsive(format!("connect {}: {}", sock.display(), e))
        })?;

        let payload = body.map(|b| b.to_string()).unwrap_or_default();
        let request = format!(
            "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            method,
            path,
            payload.len(),
            payload
        );
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| SandboxError::VmmUnresponsive(format!("write: {}", e)))?;

        // Read until the end of the header block.
        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| SandboxError::VmmUnresponsive(format!("read: {}", e)))?;
            if n == 0 {
                return Err(SandboxError::VmmProtocol(
                    "connection closed before response head".into(),
                ));
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
                break pos + 4;
            }
            if buf.len() > 64 * 1024 {
                return Err(SandboxError::VmmProtocol("response head too large".into()));
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let status = parse_status(&head)?;
        let content_length = parse_content_length(&head);

        let mut body_bytes = buf[header_end..].to_vec();
        while body_bytes.len() < content_length {
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| SandboxError::VmmUnresponsive(format!("read body: {}", e)))?;
            if n == 0 {
                break;
            }
            body_bytes.extend_from_slice(&chunk[..n]);
        }
        body_bytes.truncate(content_length);

        Ok((status, String::from_utf8_lossy(&body_bytes).to_string()))
    })
    .await
    .map_err(|_| SandboxError::VmmUnresponsive(format!("{} {} timed out", method, path)))?
}

fn parse_status(head: &str) -> Result<u16, SandboxError> {
    head.lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| SandboxError::VmmProtocol(format!("malformed status line: {:?}", head.lines().next())))
}

fn parse_content_length(head: &str) -> usize {
    head.lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
