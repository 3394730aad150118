//! 플러그인 모델
//!
//! - `Definition`: 타입별 정적 메타데이터 + 스키마 + 의존성 선언 + 생성자
//! - `DefinitionRegistry`: (kind, TypeID) → Definition, 시작 시 한 번 작성
//! - `PluginInstance`: 런타임이 인스턴스에 요구하는 최소 인터페이스
//! - `Dependencies`: Initialize 한 번에 넘겨지는 공유 싱글톤 + 커넥터 묶음

pub mod definition;
pub mod registry;
#[cfg(test)]
pub(crate) mod testing;

pub use definition::{
    ConfigField, Definition, DependencyKind, FieldType, InstanceFactory, PluginKind, Scope,
};
pub use registry::{DefinitionRegistry, RegistryError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::host::{DatabaseHandle, RconManager, ServerMetadata};

/// 커넥터/익스텐션 구현체가 제공해야 하는 capability 인터페이스.
///
/// `initialize`/`shutdown`은 외부 I/O로 블로킹될 수 있으며, 런타임은
/// 레지스트리 락을 잡지 않은 상태에서 타임아웃/취소와 함께 호출한다.
#[async_trait]
pub trait PluginInstance: Send + Sync + 'static {
    async fn initialize(&self, config: &Map<String, Value>, deps: Dependencies) -> anyhow::Result<()>;

    async fn shutdown(&self) -> anyhow::Result<()>;

    /// 익스텐션이 커넥터의 구체 타입에 접근할 때 사용
    fn as_any(&self) -> &dyn Any;
}

/// 의존성 묶음에 담기는 라이브 커넥터 참조
#[derive(Clone)]
pub struct ConnectorHandle {
    pub id: String,
    pub type_id: String,
    /// None이면 글로벌 커넥터
    pub server_id: Option<String>,
    pub instance: Arc<dyn PluginInstance>,
}

impl ConnectorHandle {
    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.instance.as_any().downcast_ref::<T>()
    }
}

impl std::fmt::Debug for ConnectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorHandle")
            .field("id", &self.id)
            .field("type_id", &self.type_id)
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}

/// Initialize 한 사이클 동안 유효한 의존성 묶음. 넘긴 뒤에는 변경되지 않는다.
#[derive(Clone, Default, Debug)]
pub struct Dependencies {
    pub database: Option<DatabaseHandle>,
    pub server: Option<ServerMetadata>,
    pub rcon: Option<RconManager>,
    /// TypeID → 커넥터
    pub connectors: HashMap<String, ConnectorHandle>,
}

impl Dependencies {
    pub fn connector(&self, type_id: &str) -> Option<&ConnectorHandle> {
        self.connectors.get(type_id)
    }

    /// TypeID로 커넥터를 찾아 구체 타입으로 캐스팅
    pub fn connector_as<T: Any>(&self, type_id: &str) -> Option<&T> {
        self.connectors.get(type_id).and_then(|c| c.downcast::<T>())
    }

    pub fn has_connector(&self, type_id: &str) -> bool {
        self.connectors.contains_key(type_id)
    }
}
