use std::time::Instant;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::info;

use crate::sandbox::manager::CreateParams;

use super::models::*;
use super::AppState;

// ── Health ──────────────────────────────────────────────────────────

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let capacity = state.manager.capacity_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        active_sandboxes: capacity.active_sandboxes,
        max_sandboxes: capacity.max_sandboxes,
        memory_used_mb: capacity.memory_reserved_mib,
        memory_available_mb: capacity.memory_available_mib,
    })
}

// ── Sandbox lifecycle ───────────────────────────────────────────────

/// GET /sandboxes
pub async fn list_sandboxes(State(state): State<AppState>) -> Json<Vec<SandboxResponse>> {
    Json(
        state
            .manager
            .list()
            .into_iter()
            .map(SandboxResponse::from)
            .collect(),
    )
}

/// POST /sandboxes — returns 201 on success.
pub async fn create_sandbox(
    State(state): State<AppState>,
    Json(body): Json<CreateSandboxRequest>,
) -> Result<(StatusCode, Json<SandboxResponse>), ApiError> {
    if body.template.is_empty() {
        return Err(ApiError::bad_request("template must not be empty"));
    }

    let descriptor = state
        .manager
        .create(CreateParams {
            template: body.template,
            memory_mib: body.memory_mb,
            vcpu_count: body.vcpu_count,
            workspace_id: body.workspace_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(descriptor.into())))
}

/// GET /sandboxes/{id}
pub async fn get_sandbox(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<SandboxResponse>, ApiError> {
    Ok(Json(state.manager.descriptor(&id)?.into()))
}

/// DELETE /sandboxes/{id} — idempotent, 200 even when the id is unknown.
pub async fn destroy_sandbox(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.manager.destroy(&id).await?;
    Ok(Json(
        serde_json::json!({"status": "destroyed", "sandbox_id": id}),
    ))
}

/// POST /sandboxes/{id}/pause
pub async fn pause_sandbox(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<SandboxResponse>, ApiError> {
    let descriptor = state.manager.pause(&id).await?;
    Ok(Json(descriptor.into()))
}

/// POST /sandboxes/{id}/resume
pub async fn resume_sandbox(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<SandboxResponse>, ApiError> {
    let descriptor = state.manager.resume(&id).await?;
    Ok(Json(descriptor.into()))
}

// ── Exec ────────────────────────────────────────────────────────────

/// POST /sandboxes/{id}/exec
pub async fn exec_command(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<ExecRequest>,
) -> Result<Json<ExecApiResponse>, ApiError> {
    if body.command.is_empty() {
        return Err(ApiError::bad_request("command must not be empty"));
    }

    let started = Instant::now();
    let result = state
        .manager
        .exec(&id, body.command, body.timeout_seconds, body.working_dir)
        .await?;
    let duration_ms = started.elapsed().as_millis() as u64;

    info!(sandbox_id = %id, exit_code = result.exit_code, duration_ms, "exec finished");

    Ok(Json(ExecApiResponse {
        success: result.success,
        exit_code: result.exit_code,
        stdout: result.stdout,
        stderr: result.stderr,
        duration_ms,
        error: result.error,
    }))
}

// ── Files ───────────────────────────────────────────────────────────

/// POST /sandboxes/{id}/files/write
pub async fn write_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<WriteFileRequest>,
) -> Result<Json<WriteFileResponse>, ApiError> {
    if body.path.is_empty() {
        return Err(ApiError::bad_request("path must not be empty"));
    }

    let path = body.path.clone();
    state
        .manager
        .write_file(&id, body.path, body.content, body.is_base64)
        .await?;

    Ok(Json(WriteFileResponse {
        status: "written".to_string(),
        path,
    }))
}

/// GET /sandboxes/{id}/files/read?path=
pub async fn read_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<FileReadResponse>, ApiError> {
    let result = state.manager.read_file(&id, query.path).await?;
    Ok(Json(FileReadResponse {
        success: result.success,
        content: result.success.then_some(result.content),
        error: result.error,
    }))
}

/// GET /sandboxes/{id}/files/list?path=
pub async fn list_files(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<FileListResponse>, ApiError> {
    let result = state.manager.list_files(&id, query.path).await?;
    Ok(Json(FileListResponse {
        success: result.success,
        entries: result
            .entries
            .into_iter()
            .map(|e| FileListEntry {
                name: e.name,
                is_dir: e.is_dir,
                size: e.size,
            })
            .collect(),
        error: result.error,
    }))
}

/// GET /sandboxes/{id}/files/stat?path=
pub async fn stat_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<StatApiResponse>, ApiError> {
    let result = state.manager.stat(&id, query.path).await?;
    Ok(Json(StatApiResponse {
        success: result.success,
        exists: result.exists,
        is_dir: result.is_dir,
        size: result.size,
        mtime: result.mtime,
        error: result.error,
    }))
}

/// POST /sandboxes/{id}/files/mkdir
pub async fn mkdir(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<MkdirRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.path.is_empty() {
        return Err(ApiError::bad_request("path must not be empty"));
    }
    state.manager.mkdir(&id, body.path.clone(), body.parents).await?;
    Ok(Json(
        serde_json::json!({"status": "created", "path": body.path}),
    ))
}

/// POST /sandboxes/{id}/files/delete
pub async fn delete_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<DeleteFileRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.path.is_empty() {
        return Err(ApiError::bad_request("path must not be empty"));
    }
    state
        .manager
        .delete_file(&id, body.path.clone(), body.recursive)
        .await?;
    Ok(Json(
        serde_json::json!({"status": "deleted", "path": body.path}),
    ))
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sandbox::manager::SandboxManager;
    use crate::sandbox::state;
    use crate::sandbox::{SandboxDescriptor, SandboxStatus};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::Utc;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestEnv {
        _base: tempfile::TempDir,
        config: Arc<Config>,
        state: AppState,
    }

    fn test_env() -> TestEnv {
        let base = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.base_dir = base.path().to_path_buf();
        config.firecracker_bin = base.path().join("no-such-firecracker");
        config.max_sandboxes = 2;
        config.memory_budget_mib = 1024;
        let config = Arc::new(config);
        let state = AppState {
            config: config.clone(),
            manager: Arc::new(SandboxManager::new(config.clone()).unwrap()),
        };
        TestEnv {
            _base: base,
            config,
            state,
        }
    }

    fn app(env: &TestEnv) -> axum::Router {
        crate::api::router(env.config.clone(), env.state.manager.clone())
    }

    /// Seed a paused sandbox on disk and recover it into the manager.
    async fn seed_paused(env: &TestEnv, id: &str, cid: u32) {
        let dir = env.config.sandboxes_dir().join(id);
        std::fs::create_dir_all(&dir).unwrap();
        state::write_descriptor(
            &dir,
            &SandboxDescriptor {
                sandbox_id: id.into(),
                workspace_id: id.into(),
                template: "default".into(),
                memory_mib: 256,
                vcpu_count: 1,
                vsock_cid: cid,
                status: SandboxStatus::Paused,
                created_at: Utc::now(),
                vmm_pid: None,
            },
        )
        .unwrap();
        let snap = env.config.snapshot_dir(id);
        std::fs::create_dir_all(&snap).unwrap();
        std::fs::write(snap.join("snapshot"), b"state").unwrap();
        std::fs::write(snap.join("memory"), b"ram").unwrap();
        env.state.manager.recover().await;
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_capacity() {
        let env = test_env();
        seed_paused(&env, "aaaa1111", 3).await;

        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["active_sandboxes"], 1);
        assert_eq!(json["max_sandboxes"], 2);
        assert_eq!(json["memory_used_mb"], 256);
        assert_eq!(json["memory_available_mb"], 1024 - 256);
    }

    #[tokio::test]
    async fn test_get_unknown_sandbox_is_404() {
        let env = test_env();
        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .uri("/sandboxes/deadbeef")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_sandbox_descriptor() {
        let env = test_env();
        seed_paused(&env, "aaaa1111", 3).await;

        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .uri("/sandboxes/aaaa1111")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["sandbox_id"], "aaaa1111");
        assert_eq!(json["status"], "paused");
        assert_eq!(json["memory_mb"], 256);
    }

    #[tokio::test]
    async fn test_list_sandboxes() {
        let env = test_env();
        seed_paused(&env, "aaaa1111", 3).await;
        seed_paused(&env, "bbbb2222", 4).await;

        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .uri("/sandboxes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(resp).await;
        assert_eq!(json.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_invalid_memory_is_400() {
        let env = test_env();
        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sandboxes")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"memory_mb": 64}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_at_capacity_is_503() {
        let env = test_env();
        seed_paused(&env, "aaaa1111", 3).await;
        seed_paused(&env, "bbbb2222", 4).await;

        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sandboxes")
                    .header("Content-Type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_exec_against_paused_is_409() {
        let env = test_env();
        seed_paused(&env, "aaaa1111", 3).await;

        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sandboxes/aaaa1111/exec")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"command": "uname -s"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_file_ops_against_paused_are_409() {
        let env = test_env();
        seed_paused(&env, "aaaa1111", 3).await;

        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .uri("/sandboxes/aaaa1111/files/stat?path=/workspace")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sandboxes/aaaa1111/files/delete")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"path": "/workspace/x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sandboxes/aaaa1111/files/mkdir")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"path": "/workspace/d"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_pause_paused_is_409() {
        let env = test_env();
        seed_paused(&env, "aaaa1111", 3).await;

        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sandboxes/aaaa1111/pause")
                    .header("Content-Type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_exec_empty_command_is_400() {
        let env = test_env();
        seed_paused(&env, "aaaa1111", 3).await;

        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sandboxes/aaaa1111/exec")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"command": ""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_destroy_unknown_still_succeeds() {
        let env = test_env();
        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/sandboxes/deadbeef")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "destroyed");
    }

    #[tokio::test]
    async fn test_destroy_then_get_is_404() {
        let env = test_env();
        seed_paused(&env, "aaaa1111", 3).await;

        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/sandboxes/aaaa1111")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .uri("/sandboxes/aaaa1111")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_auth_enforced_on_api_but_not_health() {
        let base = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.base_dir = base.path().to_path_buf();
        config.api_key = Some("sk-test".into());
        let config = Arc::new(config);
        let manager = Arc::new(SandboxManager::new(config.clone()).unwrap());
        let app = crate::api::router(config, manager);

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/sandboxes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/sandboxes")
                    .header("Authorization", "Bearer sk-test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_without_json_content_type_is_415() {
        let env = test_env();
        let resp = app(&env)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sandboxes")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
