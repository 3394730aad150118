//! 호스트 애플리케이션이 제공하는 외부 협력자 인터페이스
//!
//! - `ServerDirectory`: 관리 대상 게임 서버 메타데이터 조회
//! - `DatabaseHandle` / `RconManager`: 프로세스 전역 공유 핸들 (런타임은 건드리지 않고 전달만)
//! - `AuditSink`: 생성/수정/삭제/연쇄 비활성화 이벤트 통지 (fire-and-forget)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::plugin::PluginKind;

/// 관리 대상 서버 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub id: String,
    pub name: String,
    pub module_name: String,        // 사용할 모듈 이름 (예: "minecraft")
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub rcon_port: Option<u16>,
    #[serde(default)]
    pub rest_port: Option<u16>,
}

impl ServerMetadata {
    pub fn new(id: &str, name: &str, module_name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            module_name: module_name.to_string(),
            port: None,
            rcon_port: None,
            rest_port: None,
        }
    }
}

#[async_trait]
pub trait ServerDirectory: Send + Sync {
    async fn get_server(&self, server_id: &str) -> Option<ServerMetadata>;
}

/// 설정 파일의 `[[servers]]` 목록으로 만든 고정 디렉토리
#[derive(Debug, Default, Clone)]
pub struct StaticServerDirectory {
    servers: HashMap<String, ServerMetadata>,
}

impl StaticServerDirectory {
    pub fn new(servers: impl IntoIterator<Item = ServerMetadata>) -> Self {
        Self {
            servers: servers.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[async_trait]
impl ServerDirectory for StaticServerDirectory {
    async fn get_server(&self, server_id: &str) -> Option<ServerMetadata> {
        self.servers.get(server_id).cloned()
    }
}

/// 불투명 공유 핸들. 소유/종료는 프로세스만 한다.
#[derive(Clone)]
struct SharedHandle(Arc<dyn Any + Send + Sync>);

impl SharedHandle {
    fn new<T: Any + Send + Sync>(inner: T) -> Self {
        Self(Arc::new(inner))
    }

    fn get<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

/// 데이터베이스 공유 핸들
#[derive(Clone)]
pub struct DatabaseHandle(SharedHandle);

impl DatabaseHandle {
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self {
        Self(SharedHandle::new(inner))
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.get::<T>()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0 .0, &other.0 .0)
    }
}

impl std::fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DatabaseHandle(..)")
    }
}

/// RCON 매니저 공유 핸들
#[derive(Clone)]
pub struct RconManager(SharedHandle);

impl RconManager {
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self {
        Self(SharedHandle::new(inner))
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.get::<T>()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0 .0, &other.0 .0)
    }
}

impl std::fmt::Debug for RconManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RconManager(..)")
    }
}

/// 의존성 해석에 쓰이는 프로세스 싱글톤 모음
#[derive(Clone)]
pub struct SharedServices {
    pub database: Option<DatabaseHandle>,
    pub rcon: Option<RconManager>,
    pub servers: Arc<dyn ServerDirectory>,
}

impl SharedServices {
    pub fn new(servers: Arc<dyn ServerDirectory>) -> Self {
        Self {
            database: None,
            rcon: None,
            servers,
        }
    }

    pub fn with_database(mut self, database: DatabaseHandle) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_rcon(mut self, rcon: RconManager) -> Self {
        self.rcon = Some(rcon);
        self
    }
}

// ═══════════════════════════════════════════════════════════════
//  Audit
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    Created {
        kind: PluginKind,
        id: String,
        type_id: String,
        server_id: Option<String>,
        enabled: bool,
    },
    Updated {
        kind: PluginKind,
        id: String,
        enabled: bool,
    },
    Deleted {
        kind: PluginKind,
        id: String,
        type_id: String,
    },
    /// 커넥터 삭제/비활성화로 인해 익스텐션이 강제로 꺼짐
    CascadeDisabled {
        extension_id: String,
        server_id: Option<String>,
        connector_id: String,
        connector_type: String,
    },
}

pub trait AuditSink: Send + Sync {
    fn notify(&self, event: AuditEvent);
}

/// 기본 AuditSink: `audit` 타깃으로 tracing 로그만 남긴다
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn notify(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(target: "audit", "{}", json),
            Err(e) => tracing::warn!(target: "audit", "Failed to serialize audit event: {}", e),
        }
    }
}
