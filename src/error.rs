//! 라이프사이클 에러 타입: 하드 실패(아무것도 바뀌지 않음)와 소프트 실패
//! (레코드는 비활성 상태로 저장됨)를 구분하고, IPC 핸들러에서 적절한
//! HTTP 상태 코드를 반환할 수 있게 합니다.

use axum::http::StatusCode;

use crate::lifecycle::TransitionError;
use crate::plugin::{DependencyKind, PluginKind, Scope};
use crate::store::StoreError;
use crate::validator::ValidationError;

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unknown {kind} type '{type_id}'")]
    UnknownType { kind: PluginKind, type_id: String },

    #[error("{kind} type '{type_id}' is {expected}-scoped but was requested as {requested}")]
    ScopeMismatch {
        kind: PluginKind,
        type_id: String,
        expected: Scope,
        requested: Scope,
    },

    #[error("Extension '{type_id}' already exists on server '{server_id}'")]
    DuplicateInstance { server_id: String, type_id: String },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: PluginKind, id: String },

    #[error("Missing dependency: {0}")]
    MissingDependency(DependencyKind),

    #[error("Missing required connector '{0}'")]
    MissingConnector(String),

    #[error("Initialization of '{id}' failed: {reason}")]
    Initialization { id: String, reason: String },

    #[error("Shutdown of '{id}' failed: {reason}")]
    Shutdown { id: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// 백그라운드에서 돌던 라이프사이클 작업이 끝나지 못함 (런타임 종료 등)
    #[error("Lifecycle task aborted: {0}")]
    Aborted(String),
}

impl LifecycleError {
    /// 레코드를 비활성 상태로 저장하고 경고로 처리할 수 있는 에러인지
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MissingDependency(_) | Self::MissingConnector(_) | Self::Initialization { .. }
        )
    }

    /// HTTP 상태 코드 매핑
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::ScopeMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownType { .. } | Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::DuplicateInstance { .. } => StatusCode::CONFLICT,
            Self::MissingDependency(_) | Self::MissingConnector(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Initialization { .. }
            | Self::Shutdown { .. }
            | Self::Store(_)
            | Self::Transition(_)
            | Self::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::UnknownType { .. } => "UNKNOWN_TYPE",
            Self::ScopeMismatch { .. } => "SCOPE_MISMATCH",
            Self::DuplicateInstance { .. } => "DUPLICATE_INSTANCE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::MissingDependency(_) => "MISSING_DEPENDENCY",
            Self::MissingConnector(_) => "MISSING_CONNECTOR",
            Self::Initialization { .. } => "INITIALIZATION_FAILURE",
            Self::Shutdown { .. } => "SHUTDOWN_FAILURE",
            Self::Store(_) => "STORE_ERROR",
            Self::Transition(_) => "INVALID_STATE_TRANSITION",
            Self::Aborted(_) => "ABORTED",
        }
    }

    /// JSON 에러 응답 생성
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        });
        if let Self::Validation(v) = self {
            body["field"] = serde_json::json!(v.field);
        }
        body
    }
}

/// axum 핸들러에서 LifecycleError를 직접 반환할 수 있도록 IntoResponse 구현
impl axum::response::IntoResponse for LifecycleError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = axum::Json(self.to_json());
        (status, body).into_response()
    }
}
