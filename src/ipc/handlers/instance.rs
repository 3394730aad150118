//! 라이브 인스턴스 조회 API
//!
//! GET /api/instances?server_id=&type_id=
//! GET /api/instance/:id

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::ipc::IPCServer;

#[derive(Debug, Deserialize)]
pub struct InstanceQuery {
    pub server_id: Option<String>,
    pub type_id: Option<String>,
}

pub async fn list_instances(
    State(state): State<IPCServer>,
    Query(query): Query<InstanceQuery>,
) -> Json<Value> {
    let coordinator = &state.coordinator;
    let mut instances = match (&query.server_id, &query.type_id) {
        (Some(server_id), _) => coordinator.get_instances_by_server(server_id),
        (None, Some(type_id)) => coordinator.get_instances_by_type(type_id),
        (None, None) => coordinator.instances().list(),
    };
    // 두 필터가 모두 있으면 교집합
    if let (Some(_), Some(type_id)) = (&query.server_id, &query.type_id) {
        instances.retain(|v| &v.type_id == type_id);
    }
    Json(json!({ "instances": instances }))
}

pub async fn get_instance(
    State(state): State<IPCServer>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.coordinator.get_instance(&id) {
        Some(view) => Ok(Json(json!({ "instance": view }))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": format!("Instance '{}' is not running", id),
                "error_code": "NOT_FOUND",
            })),
        )),
    }
}
