//! GET /api/plugins/definitions?kind=&scope= → 등록된 플러그인 타입 목록

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::ipc::IPCServer;
use crate::plugin::{Definition, PluginKind, Scope};

#[derive(Debug, Deserialize)]
pub struct DefinitionQuery {
    pub kind: Option<PluginKind>,
    pub scope: Option<Scope>,
}

pub async fn list_definitions(
    State(state): State<IPCServer>,
    Query(query): Query<DefinitionQuery>,
) -> Json<Value> {
    let kinds = match query.kind {
        Some(kind) => vec![kind],
        None => vec![PluginKind::Connector, PluginKind::Extension],
    };
    let defs: Vec<_> = kinds
        .into_iter()
        .flat_map(|kind| state.coordinator.list_definitions(kind, query.scope))
        .collect();
    let defs: Vec<&Definition> = defs.iter().map(|d| d.as_ref()).collect();
    Json(json!({ "definitions": defs }))
}
