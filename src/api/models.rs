use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sandbox::{SandboxDescriptor, SandboxError};

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response: `{"error": "message"}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An error a handler can return with `?`, carrying its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Map core errors onto the wire contract: 400 invalid / 404 unknown /
/// 409 wrong state / 503 at capacity / 504 timeout / 500 everything else.
impl From<SandboxError> for ApiError {
    fn from(e: SandboxError) -> Self {
        let status = match &e {
            SandboxError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SandboxError::NotFound(_) => StatusCode::NOT_FOUND,
            SandboxError::WrongState { .. } => StatusCode::CONFLICT,
            SandboxError::AtCapacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            SandboxError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sandbox lifecycle
// ---------------------------------------------------------------------------

/// POST /sandboxes request body. Everything defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSandboxRequest {
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub vcpu_count: Option<u64>,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

fn default_template() -> String {
    "default".to_string()
}

/// Descriptor as returned from every sandbox endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxResponse {
    pub sandbox_id: String,
    pub workspace_id: String,
    pub status: String,
    pub template: String,
    pub memory_mb: u64,
    pub vcpu_count: u64,
    pub created_at: DateTime<Utc>,
}

impl From<SandboxDescriptor> for SandboxResponse {
    fn from(d: SandboxDescriptor) -> Self {
        Self {
            sandbox_id: d.sandbox_id,
            workspace_id: d.workspace_id,
            status: d.status.to_string(),
            template: d.template,
            memory_mb: d.memory_mib,
            vcpu_count: d.vcpu_count,
            created_at: d.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Exec
// ---------------------------------------------------------------------------

/// POST /sandboxes/{id}/exec request body.
#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub command: String,
    #[serde(default = "default_exec_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
}

fn default_exec_timeout() -> u64 {
    300
}

fn default_working_dir() -> String {
    "/workspace".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecApiResponse {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// POST /sandboxes/{id}/files/write request body.
#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub is_base64: bool,
}

#[derive(Debug, Serialize)]
pub struct WriteFileResponse {
    pub status: String,
    pub path: String,
}

/// Query string for GET files/read and files/list.
#[derive(Debug, Deserialize)]
pub struct PathQuery {
    #[serde(default = "default_working_dir")]
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileReadResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /sandboxes/{id}/files/mkdir request body.
#[derive(Debug, Deserialize)]
pub struct MkdirRequest {
    pub path: String,
    #[serde(default = "default_true")]
    pub parents: bool,
}

/// POST /sandboxes/{id}/files/delete request body.
#[derive(Debug, Deserialize)]
pub struct DeleteFileRequest {
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatApiResponse {
    pub success: bool,
    pub exists: bool,
    pub is_dir: bool,
    pub size: u64,
    pub mtime: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileListEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileListResponse {
    pub success: bool,
    #[serde(default)]
    pub entries: Vec<FileListEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// GET /health response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_sandboxes: usize,
    pub max_sandboxes: usize,
    pub memory_used_mb: u64,
    pub memory_available_mb: u64,
}
