//! Wire types for the host↔guest RPC.
//!
//! Both sides speak length-prefixed JSON: a 4-byte big-endian length followed
//! by that many bytes of UTF-8 JSON. Requests dispatch on the `action` field;
//! responses always carry `success` plus either result fields or `error`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Guest agent port inside the microVM.
pub const VSOCK_PORT: u32 = 5000;

/// Upper bound on a single frame in either direction.
pub const MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

/// Guest workspace directory, the default working directory for exec and
/// file listings.
pub const WORKSPACE_DIR: &str = "/workspace";

pub fn default_exec_timeout() -> u64 {
    300
}

fn default_workspace() -> String {
    WORKSPACE_DIR.to_string()
}

fn default_true() -> bool {
    true
}

// ── Requests ────────────────────────────────────────────────────────

/// A request to the guest agent, dispatched on the `action` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentRequest {
    Ping,
    Exec {
        command: String,
        #[serde(default = "default_exec_timeout")]
        timeout: u64,
        #[serde(default = "default_workspace")]
        working_dir: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
        #[serde(default)]
        is_base64: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<u32>,
    },
    ListFiles {
        #[serde(default = "default_workspace")]
        path: String,
        #[serde(default)]
        recursive: bool,
    },
    Mkdir {
        path: String,
        #[serde(default = "default_true")]
        parents: bool,
    },
    Stat {
        path: String,
    },
    DeleteFile {
        path: String,
        #[serde(default)]
        recursive: bool,
    },
}

impl AgentRequest {
    /// The wire names of every action the agent understands.
    pub const ACTIONS: &'static [&'static str] = &[
        "ping",
        "exec",
        "read_file",
        "write_file",
        "list_files",
        "mkdir",
        "stat",
        "delete_file",
    ];
}

// ── Responses ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub success: bool,
    pub message: String,
    pub workspace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResponse {
    pub success: bool,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFileResponse {
    pub success: bool,
    /// File contents, base64-encoded.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    /// Modification time, seconds since the epoch.
    pub modified: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub success: bool,
    #[serde(default)]
    pub entries: Vec<FileEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatResponse {
    pub success: bool,
    #[serde(default)]
    pub exists: bool,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub is_file: bool,
    #[serde(default)]
    pub size: u64,
    /// Modification time, seconds since the epoch. 0 when the path is absent.
    #[serde(default)]
    pub mtime: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response shape shared by write_file, mkdir, and delete_file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckResponse {
    pub fn ok(path: impl Into<String>) -> Self {
        Self {
            success: true,
            path: Some(path.into()),
            size: None,
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            path: None,
            size: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_tags() {
        let req = AgentRequest::Ping;
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["action"], "ping");

        let req = AgentRequest::Exec {
            command: "uname -s".into(),
            timeout: 10,
            working_dir: "/workspace".into(),
            env: HashMap::new(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["action"], "exec");
        assert_eq!(json["command"], "uname -s");
        assert_eq!(json["timeout"], 10);
        assert!(json.get("env").is_none());
    }

    #[test]
    fn test_exec_request_defaults() {
        let req: AgentRequest =
            serde_json::from_str(r#"{"action": "exec", "command": "ls"}"#).unwrap();
        match req {
            AgentRequest::Exec {
                command,
                timeout,
                working_dir,
                env,
            } => {
                assert_eq!(command, "ls");
                assert_eq!(timeout, 300);
                assert_eq!(working_dir, "/workspace");
                assert!(env.is_empty());
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_write_file_defaults() {
        let req: AgentRequest = serde_json::from_str(
            r#"{"action": "write_file", "path": "/tmp/x", "content": "hi"}"#,
        )
        .unwrap();
        match req {
            AgentRequest::WriteFile {
                is_base64, mode, ..
            } => {
                assert!(!is_base64);
                assert!(mode.is_none());
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_mkdir_parents_defaults_true() {
        let req: AgentRequest =
            serde_json::from_str(r#"{"action": "mkdir", "path": "/tmp/a/b"}"#).unwrap();
        match req {
            AgentRequest::Mkdir { parents, .. } => assert!(parents),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_action_fails_parse() {
        let err = serde_json::from_str::<AgentRequest>(r#"{"action": "reboot"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_error_field_omitted_on_success() {
        let resp = ExecResponse {
            success: true,
            exit_code: 0,
            stdout: "ok\n".into(),
            stderr: String::new(),
            error: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_actions_list_matches_enum() {
        for action in AgentRequest::ACTIONS {
            // Every listed action must at least be recognised by the tag;
            // parse errors for missing fields are fine.
            let raw = format!(r#"{{"action": "{}"}}"#, action);
            let err = serde_json::from_str::<AgentRequest>(&raw).err();
            if let Some(e) = err {
                let msg = e.to_string();
                assert!(
                    !msg.contains("unknown variant"),
                    "action {} not recognised: {}",
                    action,
                    msg
                );
            }
        }
    }
}
