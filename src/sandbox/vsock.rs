//! Host side of the guest RPC.
//!
//! Firecracker multiplexes guest vsock ports over a host Unix socket: the
//! host connects to `vsock.sock`, sends `CONNECT 5000\n`, and reads an
//! `OK <host_port>\n` line before the framed conversation begins. Frames are
//! a 4-byte big-endian length followed by UTF-8 JSON, capped at 10 MiB.

use std::path::PathBuf;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::protocol::{AgentRequest, MAX_FRAME_LEN, VSOCK_PORT};
use crate::sandbox::SandboxError;

/// Default budget for reconnecting to an already-booted guest.
pub const RECONNECT_BUDGET: Duration = Duration::from_secs(15);

/// Backoff cap between connect attempts while the guest is booting.
const BACKOFF_CAP: Duration = Duration::from_millis(200);

/// Client for one sandbox's guest agent.
///
/// Exactly one request is in flight at a time; callers serialize through the
/// sandbox's transport mutex. The connection is kept open between calls to
/// amortize the CONNECT handshake and reopened on demand after errors.
pub struct VsockClient {
    uds_path: PathBuf,
    stream: Option<UnixStream>,
}

impl VsockClient {
    pub fn new(uds_path: PathBuf) -> Self {
        Self {
            uds_path,
            stream: None,
        }
    }

    /// Connect and complete the CONNECT/OK handshake, retrying with
    /// exponential backoff while the guest boots. A non-OK reply is fatal.
    pub async fn connect(&mut self, budget: Duration) -> Result<(), SandboxError> {
        let deadline = Instant::now() + budget;
        let mut backoff = Duration::from_millis(10);
        let mut last_error = String::from("no attempt made");

        while Instant::now() < deadline {
            match self.try_handshake().await {
                Ok(stream) => {
                    self.stream = Some(stream);
                    debug!(uds = %self.uds_path.display(), "guest transport connected");
                    return Ok(());
                }
                Err(SandboxError::Transport(msg)) if msg.starts_with("CONNECT refused") => {
                    // The multiplexer answered with something other than OK;
                    // retrying will not change its mind.
                    return Err(SandboxError::Transport(msg));
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            sleep(backoff).await;
            backoff = (backoff * 2).min(BACKOFF_CAP);
        }

        Err(SandboxError::Transport(format!(
            "failed to connect to guest via {}: {}",
            self.uds_path.display(),
            last_error
        )))
    }

    async fn try_handshake(&self) -> Result<UnixStream, SandboxError> {
        let mut stream = UnixStream::connect(&self.uds_path)
            .await
            .map_err(|e| SandboxError::Transport(format!("connect: {}", e)))?;

        stream
            .write_all(format!("CONNECT {}\n", VSOCK_PORT).as_bytes())
            .await
            .map_err(|e| SandboxError::Transport(format!("handshake write: {}", e)))?;

        // The reply is a single short line; read byte-wise so no framed data
        // is consumed past the newline.
        let mut line = Vec::with_capacity(16);
        loop {
            let mut byte = [0u8; 1];
            let n = stream
                .read(&mut byte)
                .await
                .map_err(|e| SandboxError::Transport(format!("handshake read: {}", e)))?;
            if n == 0 {
                return Err(SandboxError::Transport(
                    "connection closed during handshake".into(),
                ));
            }
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
            if line.len() > 64 {
                return Err(SandboxError::Transport("oversized handshake reply".into()));
            }
        }

        let reply = String::from_utf8_lossy(&line);
        if reply.starts_with("OK") {
            Ok(stream)
        } else {
            Err(SandboxError::Transport(format!(
                "CONNECT refused: {}",
                reply.trim()
            )))
        }
    }

    /// Drop the connection. The next call reconnects.
    pub fn disconnect(&mut self) {
        self.stream = None;
    }

    /// One request/response round trip with a deadline. On expiry or any I/O
    /// failure the connection is discarded so the next call starts clean.
    pub async fn call<T: DeserializeOwned>(
        &mut self,
        request: &AgentRequest,
        deadline: Duration,
    ) -> Result<T, SandboxError> {
        let payload = serde_json::to_vec(request)?;
        if payload.len() > MAX_FRAME_LEN {
            return Err(SandboxError::MessageTooLarge(payload.len(), MAX_FRAME_LEN));
        }

        if self.stream.is_none() {
            self.connect(RECONNECT_BUDGET).await?;
        }
        let stream = self.stream.as_mut().expect("connected above");

        let result = timeout(deadline, Self::round_trip(stream, &payload)).await;

        match result {
            Ok(Ok(response)) => {
                serde_json::from_slice(&response).map_err(|e| {
                    self.stream = None;
                    SandboxError::Protocol(format!("unexpected response shape: {}", e))
                })
            }
            Ok(Err(e)) => {
                self.stream = None;
                Err(e)
            }
            Err(_) => {
                self.stream = None;
                Err(SandboxError::Timeout(format!(
                    "guest call exceeded {:?}",
                    deadline
                )))
            }
        }
    }

    async fn round_trip(stream: &mut UnixStream, payload: &[u8]) -> Result<Vec<u8>, SandboxError> {
        stream
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await
            .map_err(|e| SandboxError::Transport(format!("write frame length: {}", e)))?;
        stream
            .write_all(payload)
            .await
            .map_err(|e| SandboxError::Transport(format!("write frame: {}", e)))?;

        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| SandboxError::Transport(format!("read frame length: {}", e)))?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(SandboxError::MessageTooLarge(len, MAX_FRAME_LEN));
        }

        let mut body = vec![0u8; len];
        stream
            .read_exact(&mut body)
            .await
            .map_err(|e| SandboxError::Transport(format!("read frame: {}", e)))?;
        Ok(body)
    }
}
