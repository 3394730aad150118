//! 익스텐션 API 핸들러
//!
//! GET    /api/extensions?server_id=   → 레코드 목록
//! POST   /api/extensions              → 생성
//! PATCH  /api/extension/:id           → 수정 (설정은 얕게 병합)
//! DELETE /api/extension/:id           → 삭제
//! POST   /api/extension/:id/toggle    → 활성/비활성 전환

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::LifecycleError;
use crate::ipc::IPCServer;
use crate::lifecycle::{CreateExtensionRequest, RecordPatch, UpdateOutcome};

#[derive(Debug, Deserialize)]
pub struct ExtensionQuery {
    pub server_id: Option<String>,
}

fn update_response(id: &str, outcome: UpdateOutcome) -> Json<Value> {
    Json(json!({
        "success": true,
        "id": id,
        "enabled": outcome.enabled,
        "warning": outcome.warning,
    }))
}

pub async fn list_extensions(
    State(state): State<IPCServer>,
    Query(query): Query<ExtensionQuery>,
) -> Result<Json<Value>, LifecycleError> {
    let extensions = state
        .coordinator
        .list_extensions(query.server_id.as_deref())
        .await?;
    Ok(Json(json!({ "extensions": extensions })))
}

pub async fn create_extension(
    State(state): State<IPCServer>,
    Json(req): Json<CreateExtensionRequest>,
) -> Result<Json<Value>, LifecycleError> {
    let cancel = state.request_token();
    let outcome = state.coordinator.create_extension(req, &cancel).await?;
    Ok(Json(json!({
        "success": true,
        "id": outcome.id,
        "enabled": outcome.enabled,
        "warning": outcome.warning,
    })))
}

pub async fn update_extension(
    State(state): State<IPCServer>,
    Path(id): Path<String>,
    Json(patch): Json<RecordPatch>,
) -> Result<Json<Value>, LifecycleError> {
    let cancel = state.request_token();
    let outcome = state.coordinator.update_extension(&id, patch, &cancel).await?;
    Ok(update_response(&id, outcome))
}

pub async fn toggle_extension(
    State(state): State<IPCServer>,
    Path(id): Path<String>,
) -> Result<Json<Value>, LifecycleError> {
    let cancel = state.request_token();
    let outcome = state.coordinator.toggle_extension(&id, &cancel).await?;
    Ok(update_response(&id, outcome))
}

pub async fn delete_extension(
    State(state): State<IPCServer>,
    Path(id): Path<String>,
) -> Result<Json<Value>, LifecycleError> {
    let cancel = state.request_token();
    state.coordinator.delete_extension(&id, &cancel).await?;
    Ok(Json(json!({ "success": true, "id": id })))
}
