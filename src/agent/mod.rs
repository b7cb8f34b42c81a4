//! Guest agent request handling.
//!
//! The agent runs inside the microVM and answers the action-dispatched RPC on
//! vsock port 5000. Everything here is plain blocking std so the handlers can
//! be exercised on the host in tests; the vsock listener itself lives in the
//! `guest-agent` binary.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant, SystemTime};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::protocol::{
    AckResponse, AgentRequest, ExecResponse, FileEntry, ListFilesResponse, PingResponse,
    ReadFileResponse, StatResponse, MAX_FRAME_LEN, WORKSPACE_DIR,
};

/// Poll interval while waiting for a child process.
const EXEC_POLL: Duration = Duration::from_millis(50);

/// Serve framed requests on one connection until the peer hangs up.
pub fn serve_connection<S: Read + Write>(stream: &mut S) -> io::Result<()> {
    loop {
        let mut len_buf = [0u8; 4];
        if !read_exact_or_eof(stream, &mut len_buf)? {
            return Ok(());
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::other(format!(
                "frame too large: {} bytes",
                len
            )));
        }

        let mut body = vec![0u8; len];
        stream.read_exact(&mut body)?;

        let response = handle_frame(&body);
        stream.write_all(&(response.len() as u32).to_be_bytes())?;
        stream.write_all(&response)?;
        stream.flush()?;
    }
}

/// Read exactly `buf.len()` bytes, or return false on a clean EOF at a frame
/// boundary.
fn read_exact_or_eof<S: Read>(stream: &mut S, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-frame",
            ));
        }
        filled += n;
    }
    Ok(true)
}

/// Decode one request frame and produce the response frame.
pub fn handle_frame(data: &[u8]) -> Vec<u8> {
    let response = match serde_json::from_slice::<AgentRequest>(data) {
        Ok(request) => return dispatch(request),
        Err(parse_err) => match serde_json::from_slice::<serde_json::Value>(data) {
            Ok(value) => match value.get("action").and_then(|a| a.as_str()) {
                Some(action) if AgentRequest::ACTIONS.contains(&action) => {
                    AckResponse::err(format!("invalid {} request: {}", action, parse_err))
                }
                Some(action) => AckResponse::err(format!("unknown action: {}", action)),
                None => AckResponse::err("missing action field"),
            },
            Err(e) => AckResponse::err(format!("invalid JSON: {}", e)),
        },
    };
    serde_json::to_vec(&response).expect("response serialization cannot fail")
}

fn dispatch(request: AgentRequest) -> Vec<u8> {
    match request {
        AgentRequest::Ping => to_frame(&handle_ping()),
        AgentRequest::Exec {
            command,
            timeout,
            working_dir,
            env,
        } => to_frame(&handle_exec(&command, timeout, &working_dir, &env)),
        AgentRequest::ReadFile { path } => to_frame(&handle_read_file(&path)),
        AgentRequest::WriteFile {
            path,
            content,
            is_base64,
            mode,
        } => to_frame(&handle_write_file(&path, &content, is_base64, mode)),
        AgentRequest::ListFiles { path, recursive } => {
            to_frame(&handle_list_files(&path, recursive))
        }
        AgentRequest::Mkdir { path, parents } => to_frame(&handle_mkdir(&path, parents)),
        AgentRequest::Stat { path } => to_frame(&handle_stat(&path)),
        AgentRequest::DeleteFile { path, recursive } => {
            to_frame(&handle_delete_file(&path, recursive))
        }
    }
}

fn to_frame<T: serde::Serialize>(response: &T) -> Vec<u8> {
    serde_json::to_vec(response).expect("response serialization cannot fail")
}

// ── Handlers ────────────────────────────────────────────────────────

fn handle_ping() -> PingResponse {
    PingResponse {
        success: true,
        message: "pong".into(),
        workspace: WORKSPACE_DIR.into(),
    }
}

/// Run a shell command with a wall-clock timeout.
///
/// The command is evaluated by `/bin/sh -c`; the isolation boundary is the
/// VM, not the shell. stdout/stderr are drained on threads so a chatty child
/// cannot wedge itself on a full pipe.
pub fn handle_exec(
    command: &str,
    timeout_s: u64,
    working_dir: &str,
    env: &HashMap<String, String>,
) -> ExecResponse {
    if let Err(e) = std::fs::create_dir_all(working_dir) {
        return exec_error(format!("working dir {}: {}", working_dir, e));
    }

    let mut child = match Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return exec_error(e.to_string()),
    };

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + Duration::from_secs(timeout_s);
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return ExecResponse {
                    success: true,
                    exit_code: exit_code_of(status),
                    stdout: join_drain(stdout),
                    stderr: join_drain(stderr),
                    error: None,
                };
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    // Discard whatever the child managed to write.
                    let _ = join_drain(stdout);
                    let _ = join_drain(stderr);
                    return ExecResponse {
                        success: false,
                        exit_code: -1,
                        stdout: String::new(),
                        stderr: String::new(),
                        error: Some(format!("Command timed out after {} seconds", timeout_s)),
                    };
                }
                std::thread::sleep(EXEC_POLL);
            }
            Err(e) => return exec_error(e.to_string()),
        }
    }
}

fn exec_error(error: String) -> ExecResponse {
    ExecResponse {
        success: false,
        exit_code: -1,
        stdout: String::new(),
        stderr: String::new(),
        error: Some(error),
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| -s))
        .unwrap_or(-1)
}

fn drain(pipe: Option<impl Read + Send + 'static>) -> Option<std::thread::JoinHandle<String>> {
    pipe.map(|mut reader| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_drain(handle: Option<std::thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

pub fn handle_read_file(path: &str) -> ReadFileResponse {
    let file_path = Path::new(path);
    if !file_path.exists() {
        return read_error(format!("File not found: {}", path));
    }
    if !file_path.is_file() {
        return read_error(format!("Not a file: {}", path));
    }

    match std::fs::read(file_path) {
        Ok(bytes) => ReadFileResponse {
            success: true,
            content: BASE64.encode(&bytes),
            size: bytes.len() as u64,
            error: None,
        },
        Err(e) => read_error(format!("{}: {}", path, e)),
    }
}

fn read_error(error: String) -> ReadFileResponse {
    ReadFileResponse {
        success: false,
        content: String::new(),
        size: 0,
        error: Some(error),
    }
}

pub fn handle_write_file(
    path: &str,
    content: &str,
    is_base64: bool,
    mode: Option<u32>,
) -> AckResponse {
    let file_path = Path::new(path);

    if let Some(parent) = file_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return AckResponse::err(format!("{}: {}", parent.display(), e));
        }
    }

    let bytes = if is_base64 {
        match BASE64.decode(content) {
            Ok(bytes) => bytes,
            Err(e) => return AckResponse::err(format!("invalid base64: {}", e)),
        }
    } else {
        content.as_bytes().to_vec()
    };

    if let Err(e) = std::fs::write(file_path, &bytes) {
        return AckResponse::err(format!("{}: {}", path, e));
    }

    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(file_path, std::fs::Permissions::from_mode(mode)) {
            return AckResponse::err(format!("chmod {}: {}", path, e));
        }
    }

    AckResponse {
        success: true,
        path: Some(path.into()),
        size: Some(bytes.len() as u64),
        error: None,
    }
}

pub fn handle_list_files(path: &str, recursive: bool) -> ListFilesResponse {
    let dir = Path::new(path);
    if !dir.exists() {
        return list_error(format!("Directory not found: {}", path));
    }
    if !dir.is_dir() {
        return list_error(format!("Not a directory: {}", path));
    }

    let mut entries = Vec::new();
    if let Err(e) = collect_entries(dir, dir, recursive, &mut entries) {
        return list_error(format!("{}: {}", path, e));
    }

    ListFilesResponse {
        success: true,
        entries,
        error: None,
    }
}

fn list_error(error: String) -> ListFilesResponse {
    ListFilesResponse {
        success: false,
        entries: Vec::new(),
        error: Some(error),
    }
}

fn collect_entries(
    root: &Path,
    dir: &Path,
    recursive: bool,
    out: &mut Vec<FileEntry>,
) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        // Entries that vanish or deny access mid-listing are skipped.
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };

        let name = if recursive {
            path.strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned()
        } else {
            entry.file_name().to_string_lossy().into_owned()
        };

        out.push(FileEntry {
            name,
            path: path.to_string_lossy().into_owned(),
            is_dir: meta.is_dir(),
            size: if meta.is_file() { meta.len() } else { 0 },
            modified: mtime_secs(&meta),
        });

        if recursive && meta.is_dir() {
            collect_entries(root, &path, recursive, out)?;
        }
    }
    Ok(())
}

pub fn handle_mkdir(path: &str, parents: bool) -> AckResponse {
    let result = if parents {
        std::fs::create_dir_all(path)
    } else {
        match std::fs::create_dir(path) {
            // Matching an existing directory is fine either way.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && Path::new(path).is_dir() => {
                Ok(())
            }
            other => other,
        }
    };

    match result {
        Ok(()) => AckResponse::ok(path),
        Err(e) => AckResponse::err(format!("{}: {}", path, e)),
    }
}

pub fn handle_stat(path: &str) -> StatResponse {
    match std::fs::metadata(path) {
        Ok(meta) => StatResponse {
            success: true,
            exists: true,
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            size: meta.len(),
            mtime: mtime_secs(&meta),
            error: None,
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => StatResponse {
            success: true,
            exists: false,
            is_dir: false,
            is_file: false,
            size: 0,
            mtime: 0,
            error: None,
        },
        Err(e) => StatResponse {
            success: false,
            exists: false,
            is_dir: false,
            is_file: false,
            size: 0,
            mtime: 0,
            error: Some(format!("{}: {}", path, e)),
        },
    }
}

pub fn handle_delete_file(path: &str, recursive: bool) -> AckResponse {
    let file_path = Path::new(path);
    if !file_path.exists() {
        return AckResponse::err(format!("Path not found: {}", path));
    }

    let result = if file_path.is_dir() {
        if recursive {
            std::fs::remove_dir_all(file_path)
        } else {
            std::fs::remove_dir(file_path)
        }
    } else {
        std::fs::remove_file(file_path)
    };

    match result {
        Ok(()) => AckResponse::ok(path),
        Err(e) => AckResponse::err(format!("{}: {}", path, e)),
    }
}

fn mtime_secs(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
