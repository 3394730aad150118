//! 커넥터/익스텐션 레코드 저장소
//!
//! 레코드는 라이브 인스턴스 존재 여부와 무관한 영속 상태다.
//! 런타임은 `Store` 트레이트만 사용하며, 실제 백엔드는 호스트가 결정한다.
//! 기본 구현으로 메모리 저장소와 JSON 파일 저장소를 제공한다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::plugin::PluginKind;

/// 영속 레코드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub kind: PluginKind,
    pub type_id: String,
    /// 익스텐션은 항상 Some, 글로벌 커넥터는 None
    #[serde(default)]
    pub server_id: Option<String>,
    pub enabled: bool,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Record {
    pub fn new(
        kind: PluginKind,
        type_id: &str,
        server_id: Option<&str>,
        enabled: bool,
        config: Map<String, Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            type_id: type_id.to_string(),
            server_id: server_id.map(|s| s.to_string()),
            enabled,
            config,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("record '{0}' not found")]
    NotFound(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn load_record(&self, id: &str) -> Result<Option<Record>, StoreError>;

    /// 같은 ID가 있으면 덮어쓴다
    async fn save_record(&self, record: &Record) -> Result<(), StoreError>;

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError>;

    /// 없는 ID 삭제는 no-op
    async fn delete_record(&self, id: &str) -> Result<(), StoreError>;

    /// `server_id`가 None이면 모든 서버
    async fn list_extension_records(
        &self,
        server_id: Option<&str>,
    ) -> Result<Vec<Record>, StoreError>;

    async fn list_connector_records(&self) -> Result<Vec<Record>, StoreError>;
}

// ═══════════════════════════════════════════════════════════════
//  공통 레코드 테이블 (생성 순서 유지)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone)]
struct RecordTable {
    records: Vec<Record>,
}

impl RecordTable {
    fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    fn upsert(&mut self, record: &Record) {
        if let Some(pos) = self.records.iter().position(|r| r.id == record.id) {
            self.records[pos] = record.clone();
        } else {
            self.records.push(record.clone());
        }
    }

    fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), StoreError> {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(r) => {
                r.enabled = enabled;
                Ok(())
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    /// 실제로 지웠으면 true
    fn remove(&mut self, id: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        self.records.len() != before
    }

    fn extensions(&self, server_id: Option<&str>) -> Vec<Record> {
        self.records
            .iter()
            .filter(|r| r.kind == PluginKind::Extension)
            .filter(|r| server_id.map_or(true, |s| r.server_id.as_deref() == Some(s)))
            .cloned()
            .collect()
    }

    fn connectors(&self) -> Vec<Record> {
        self.records
            .iter()
            .filter(|r| r.kind == PluginKind::Connector)
            .cloned()
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

/// 프로세스 메모리 저장소 (테스트/임베딩용)
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: RwLock<RecordTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_record(&self, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.table.read().await.get(id).cloned())
    }

    async fn save_record(&self, record: &Record) -> Result<(), StoreError> {
        self.table.write().await.upsert(record);
        Ok(())
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        self.table.write().await.set_enabled(id, enabled)
    }

    async fn delete_record(&self, id: &str) -> Result<(), StoreError> {
        self.table.write().await.remove(id);
        Ok(())
    }

    async fn list_extension_records(
        &self,
        server_id: Option<&str>,
    ) -> Result<Vec<Record>, StoreError> {
        Ok(self.table.read().await.extensions(server_id))
    }

    async fn list_connector_records(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.table.read().await.connectors())
    }
}

// ═══════════════════════════════════════════════════════════════
//  JsonFileStore
// ═══════════════════════════════════════════════════════════════

/// 레코드 전체를 하나의 JSON 파일로 관리하는 저장소.
/// 변경마다 임시 파일에 쓰고 rename 하여 교체한다.
pub struct JsonFileStore {
    file_path: PathBuf,
    table: RwLock<RecordTable>,
}

impl JsonFileStore {
    /// 파일에서 레코드 로드 (없으면 빈 저장소)
    pub async fn open(file_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let file_path = file_path.as_ref().to_path_buf();
        let records = if tokio::fs::try_exists(&file_path).await? {
            let content = tokio::fs::read_to_string(&file_path).await?;
            if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str::<Vec<Record>>(&content)?
            }
        } else {
            tracing::info!(
                "Record store file does not exist, starting empty: {}",
                file_path.display()
            );
            Vec::new()
        };
        tracing::info!("Loaded {} plugin records", records.len());

        Ok(Self {
            file_path,
            table: RwLock::new(RecordTable { records }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    async fn persist(&self, table: &RecordTable) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&table.records)?;
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.file_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.file_path).await?;
        tracing::debug!("Saved {} plugin records", table.records.len());
        Ok(())
    }

    /// 사본에 변경을 적용해 디스크에 쓰고, 성공했을 때만 메모리에 반영한다
    async fn commit<F>(&self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut RecordTable) -> Result<bool, StoreError>,
    {
        let mut table = self.table.write().await;
        let mut next = table.clone();
        if !change(&mut next)? {
            return Ok(());
        }
        self.persist(&next).await?;
        *table = next;
        Ok(())
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn load_record(&self, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.table.read().await.get(id).cloned())
    }

    async fn save_record(&self, record: &Record) -> Result<(), StoreError> {
        self.commit(|table| {
            table.upsert(record);
            Ok(true)
        })
        .await
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        self.commit(|table| table.set_enabled(id, enabled).map(|()| true))
            .await
    }

    async fn delete_record(&self, id: &str) -> Result<(), StoreError> {
        self.commit(|table| Ok(table.remove(id))).await
    }

    async fn list_extension_records(
        &self,
        server_id: Option<&str>,
    ) -> Result<Vec<Record>, StoreError> {
        Ok(self.table.read().await.extensions(server_id))
    }

    async fn list_connector_records(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.table.read().await.connectors())
    }
}
