//! 커넥터 API 핸들러
//!
//! GET    /api/connectors      → 레코드 목록
//! POST   /api/connectors      → 생성
//! PATCH  /api/connector/:id   → 수정 (비활성화 시 의존 익스텐션 연쇄 비활성화, 재시작 시 재연결)
//! DELETE /api/connector/:id   → 삭제 (영향받은 익스텐션 ID 반환)

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::error::LifecycleError;
use crate::ipc::IPCServer;
use crate::lifecycle::{CreateConnectorRequest, RecordPatch};

pub async fn list_connectors(State(state): State<IPCServer>) -> Result<Json<Value>, LifecycleError> {
    let connectors = state.coordinator.list_connectors().await?;
    Ok(Json(json!({ "connectors": connectors })))
}

pub async fn create_connector(
    State(state): State<IPCServer>,
    Json(req): Json<CreateConnectorRequest>,
) -> Result<Json<Value>, LifecycleError> {
    let cancel = state.request_token();
    let outcome = state.coordinator.create_connector(req, &cancel).await?;
    Ok(Json(json!({
        "success": true,
        "id": outcome.id,
        "enabled": outcome.enabled,
        "warning": outcome.warning,
    })))
}

pub async fn update_connector(
    State(state): State<IPCServer>,
    Path(id): Path<String>,
    Json(patch): Json<RecordPatch>,
) -> Result<Json<Value>, LifecycleError> {
    let cancel = state.request_token();
    let outcome = state.coordinator.update_connector(&id, patch, &cancel).await?;
    Ok(Json(json!({
        "success": true,
        "id": id,
        "enabled": outcome.enabled,
        "warning": outcome.warning,
        "disabled_extensions": outcome.disabled_extensions,
        "restarted_extensions": outcome.restarted_extensions,
    })))
}

pub async fn delete_connector(
    State(state): State<IPCServer>,
    Path(id): Path<String>,
) -> Result<Json<Value>, LifecycleError> {
    let cancel = state.request_token();
    let affected = state.coordinator.delete_connector(&id, &cancel).await?;
    Ok(Json(json!({
        "success": true,
        "id": id,
        "disabled_extensions": affected,
    })))
}
