//! Lifecycle Coordinator
//!
//! 생성/수정/토글/삭제를 검증 → 해석 → 초기화 → 저장 순서의 원자적 시퀀스로 조율한다.
//!
//! ## 실패 의미론
//! - 검증/알 수 없는 타입/스코프 불일치/중복은 아무것도 바꾸기 전에 거부 (하드 실패)
//! - 의존성 누락/초기화 실패는 레코드를 비활성으로 저장하고 경고로 반환 (소프트 실패)
//! - 종료 실패는 로그만 남기고 삼킨다
//! - 저장소 실패는 그대로 전파
//!
//! ## 락 순서
//! TypeID 락 → (server, type) 생성 락 → 레코드 락 → (InstanceRegistry 내부) per-ID 락.
//! 커넥터 삭제/비활성화 스윕은 해당 TypeID 락을 배타로 잡고,
//! 익스텐션 생성/수정/토글은 참조하는 커넥터 TypeID 락을 공유로 잡는다.
//!
//! 변경 연산은 별도 태스크에서 돌아가므로 호출자(예: 끊긴 HTTP 요청)가 사라져도
//! 초기화와 저장이 짝을 이룬 채 끝난다. 중단은 취소 토큰으로만 요청한다.

pub mod state;

pub use state::{InstanceState, StateMachine, TransitionError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::LifecycleError;
use crate::host::{AuditEvent, AuditSink, SharedServices};
use crate::instance::{InstanceRegistry, InstanceView, LockTable, Pending};
use crate::plugin::{Definition, DefinitionRegistry, PluginKind, Scope};
use crate::resolver::DependencyResolver;
use crate::store::{Record, Store};
use crate::validator::{validate_config, with_defaults, ValidationError, ValidationErrorType};

// ═══════════════════════════════════════════════════════════════
//  요청 / 결과 타입
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct CreateConnectorRequest {
    pub type_id: String,
    /// None이면 글로벌 커넥터
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateExtensionRequest {
    pub server_id: String,
    pub type_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

/// 부분 수정. `config`는 기존 설정에 얕게 병합된다.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordPatch {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub config: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateOutcome {
    pub id: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOutcome {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// 커넥터 비활성화로 함께 꺼진 익스텐션
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disabled_extensions: Vec<String>,
    /// 커넥터 재시작 후 새 핸들로 다시 띄운 익스텐션
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub restarted_extensions: Vec<String>,
}

/// 시작 시 복원 결과
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RestoreReport {
    pub started: Vec<String>,
    /// (레코드 ID, 사유)
    pub disabled: Vec<(String, String)>,
}

/// 얕은 병합: 새 키는 덮어쓰고 패치에 없는 기존 키는 유지
pub fn merge_config(base: &Map<String, Value>, patch: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// 복구 가능한 실패면 레코드를 비활성으로 내리고 경고 메시지를 돌려준다
fn downgrade(record: &mut Record, err: LifecycleError) -> Result<String, LifecycleError> {
    if !err.is_recoverable() {
        return Err(err);
    }
    tracing::warn!(
        "{} '{}' ({}) will be saved disabled: {}",
        record.kind,
        record.id,
        record.type_id,
        err
    );
    record.enabled = false;
    Ok(err.to_string())
}

/// 호출자 future가 버려져도 시퀀스가 끝까지 진행되도록 별도 태스크에서 실행한다.
/// 중단은 CancellationToken으로만 전달된다.
async fn detached<T, F>(task: F) -> Result<T, LifecycleError>
where
    F: Future<Output = Result<T, LifecycleError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(task).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(LifecycleError::Aborted(e.to_string())),
    }
}

/// 진행 중인 전이 한 건. 상태 기계와 레지스트리 게시를 함께 움직인다.
/// Initializing 이후는 InstanceRegistry가 직접 게시한다.
struct Progress<'a> {
    sm: StateMachine,
    pending: Pending<'a>,
}

impl<'a> Progress<'a> {
    fn new(instances: &'a InstanceRegistry, record: &Record, from: InstanceState) -> Self {
        Self {
            sm: StateMachine::starting_at(&record.id, from),
            pending: instances.pending(
                &record.id,
                record.kind,
                &record.type_id,
                record.server_id.as_deref(),
            ),
        }
    }

    /// Absent → Validating
    fn begin(instances: &'a InstanceRegistry, record: &Record) -> Result<Self, TransitionError> {
        let mut progress = Self::new(instances, record, InstanceState::Absent);
        progress.enter(InstanceState::Validating)?;
        Ok(progress)
    }

    fn enter(&mut self, to: InstanceState) -> Result<(), TransitionError> {
        self.sm.transition(to)?;
        match to {
            InstanceState::Validating | InstanceState::Resolving => self.pending.set(to),
            InstanceState::Absent => self.pending.clear(),
            _ => {}
        }
        Ok(())
    }

    fn fail(&mut self) {
        self.sm.fail();
        self.pending.clear();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Coordinator
// ═══════════════════════════════════════════════════════════════

pub struct LifecycleCoordinator {
    definitions: Arc<DefinitionRegistry>,
    instances: Arc<InstanceRegistry>,
    resolver: DependencyResolver,
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditSink>,
    type_locks: LockTable,
    creation_locks: LockTable,
    record_locks: LockTable,
}

impl LifecycleCoordinator {
    pub fn new(
        definitions: Arc<DefinitionRegistry>,
        instances: Arc<InstanceRegistry>,
        services: SharedServices,
        store: Arc<dyn Store>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let resolver = DependencyResolver::new(instances.clone(), services);
        Self {
            definitions,
            instances,
            resolver,
            store,
            audit,
            type_locks: LockTable::new(),
            creation_locks: LockTable::new(),
            record_locks: LockTable::new(),
        }
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.definitions
    }

    pub fn instances(&self) -> &InstanceRegistry {
        &self.instances
    }

    fn definition(&self, kind: PluginKind, type_id: &str) -> Result<Arc<Definition>, LifecycleError> {
        self.definitions
            .get(kind, type_id)
            .ok_or_else(|| LifecycleError::UnknownType {
                kind,
                type_id: type_id.to_string(),
            })
    }

    async fn load(&self, kind: PluginKind, id: &str) -> Result<Record, LifecycleError> {
        match self.store.load_record(id).await? {
            Some(record) if record.kind == kind => Ok(record),
            _ => Err(LifecycleError::NotFound {
                kind,
                id: id.to_string(),
            }),
        }
    }

    /// 디렉터리에 없는 서버를 가리키는 요청은 검증 에러
    async fn check_server(&self, server_id: &str) -> Result<(), LifecycleError> {
        if self.resolver.services().servers.get_server(server_id).await.is_none() {
            return Err(ValidationError {
                field: "server_id".to_string(),
                message: format!("Server '{}' does not exist", server_id),
                error_type: ValidationErrorType::UnknownServer,
            }
            .into());
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────
    //  공통 단계
    // ───────────────────────────────────────────────────────────

    /// Resolving → Initializing → Running. 실패 시 인스턴스는 남지 않는다.
    async fn bring_up(
        &self,
        def: &Definition,
        record: &Record,
        progress: &mut Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        progress.enter(InstanceState::Resolving)?;
        let server_id = record.server_id.as_deref();
        let deps = match self.resolver.resolve(def, server_id).await {
            Ok(deps) => deps,
            Err(e) => {
                progress.fail();
                return Err(e);
            }
        };

        progress.enter(InstanceState::Initializing)?;
        let effective = with_defaults(&def.config_schema, &record.config);
        if let Err(e) = self
            .instances
            .create(def, &record.id, server_id, &effective, deps, cancel)
            .await
        {
            progress.fail();
            return Err(e);
        }
        progress.enter(InstanceState::Running)?;
        Ok(())
    }

    /// 실행 중인 인스턴스를 새 설정으로 재시작. 의존성은 종료 전에 먼저 해석한다.
    async fn restart(
        &self,
        def: &Definition,
        record: &Record,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        let mut progress = Progress::new(&self.instances, record, InstanceState::Running);
        let server_id = record.server_id.as_deref();
        let deps = match self.resolver.resolve(def, server_id).await {
            Ok(deps) => deps,
            Err(e) => {
                progress.enter(InstanceState::ShuttingDown)?;
                self.instances.shutdown(&record.id, cancel).await;
                progress.enter(InstanceState::Absent)?;
                return Err(e);
            }
        };

        progress.enter(InstanceState::ShuttingDown)?;
        progress.enter(InstanceState::Initializing)?;
        let effective = with_defaults(&def.config_schema, &record.config);
        if let Err(e) = self
            .instances
            .restart(def, &record.id, server_id, &effective, deps, cancel)
            .await
        {
            progress.fail();
            return Err(e);
        }
        progress.enter(InstanceState::Running)?;
        tracing::info!("{} '{}' restarted with updated config", record.kind, record.id);
        Ok(())
    }

    /// 설정 반영: 살아있으면 재시작, 없으면 새로 띄운다
    async fn reload(
        &self,
        def: &Definition,
        record: &Record,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        if self.instances.contains(&record.id) {
            self.restart(def, record, cancel).await
        } else {
            let mut progress = Progress::begin(&self.instances, record)?;
            self.bring_up(def, record, &mut progress, cancel).await
        }
    }

    async fn stop(&self, record: &Record, cancel: &CancellationToken) -> Result<(), LifecycleError> {
        if self.instances.contains(&record.id) {
            let mut sm = StateMachine::starting_at(&record.id, InstanceState::Running);
            sm.transition(InstanceState::ShuttingDown)?;
            self.instances.shutdown(&record.id, cancel).await;
            sm.transition(InstanceState::Absent)?;
        }
        Ok(())
    }

    /// 저장. 방금 띄운 인스턴스가 있는데 저장이 실패하면 인스턴스를 내린다.
    async fn persist(
        &self,
        record: &Record,
        started: bool,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        if let Err(e) = self.store.save_record(record).await {
            tracing::error!("Failed to persist {} '{}': {}", record.kind, record.id, e);
            if started {
                self.instances.shutdown(&record.id, cancel).await;
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// 커넥터에 의존하는 활성 익스텐션 레코드 (스캔 단계).
    /// 서버 스코프 커넥터는 자기 서버만, 글로벌 커넥터는 모든 서버를 대상으로 한다.
    async fn dependents(&self, connector: &Record) -> Result<Vec<Record>, LifecycleError> {
        Ok(self
            .store
            .list_extension_records(connector.server_id.as_deref())
            .await?
            .into_iter()
            .filter(|r| r.enabled)
            .filter(|r| {
                self.definitions
                    .get(PluginKind::Extension, &r.type_id)
                    .map_or(false, |d| d.required_connector_types.contains(&connector.type_id))
            })
            .collect())
    }

    /// 의존 익스텐션 하나를 끄고 감사 이벤트를 남긴다. 호출자는 레코드 락을 잡고 있어야 한다.
    async fn cascade_disable(
        &self,
        ext: &Record,
        connector: &Record,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        self.stop(ext, cancel).await?;
        self.store.set_enabled(&ext.id, false).await?;
        tracing::warn!(
            "Extension '{}' ({}) on server '{}' disabled: connector '{}' ({}) is unavailable",
            ext.id,
            ext.type_id,
            ext.server_id.as_deref().unwrap_or("-"),
            connector.id,
            connector.type_id
        );
        self.audit.notify(AuditEvent::CascadeDisabled {
            extension_id: ext.id.clone(),
            server_id: ext.server_id.clone(),
            connector_id: connector.id.clone(),
            connector_type: connector.type_id.clone(),
        });
        Ok(())
    }

    /// 커넥터에 의존하는 활성 익스텐션을 모두 끈다 (스캔 후 변경).
    /// 호출자는 해당 TypeID 락을 배타로 잡고 있어야 한다.
    async fn sweep_dependents(
        &self,
        connector: &Record,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, LifecycleError> {
        let mut affected = Vec::new();
        for ext in self.dependents(connector).await? {
            let _guard = self.record_locks.exclusive(&ext.id).await;
            match self.store.load_record(&ext.id).await? {
                Some(current) if current.enabled => {}
                _ => continue,
            }
            self.cascade_disable(&ext, connector, cancel).await?;
            affected.push(ext.id);
        }
        Ok(affected)
    }

    /// 재시작된 커넥터의 새 핸들로 의존 익스텐션을 다시 띄운다.
    /// 다시 띄우지 못한 익스텐션은 비활성으로 내린다. (재시작, 비활성) ID 목록 반환.
    /// 호출자는 해당 TypeID 락을 배타로 잡고 있어야 한다.
    async fn refresh_dependents(
        &self,
        connector: &Record,
        cancel: &CancellationToken,
    ) -> Result<(Vec<String>, Vec<String>), LifecycleError> {
        let mut restarted = Vec::new();
        let mut disabled = Vec::new();
        for ext in self.dependents(connector).await? {
            let _guard = self.record_locks.exclusive(&ext.id).await;
            let current = match self.store.load_record(&ext.id).await? {
                Some(current) if current.enabled => current,
                _ => continue,
            };
            let def = self.definition(PluginKind::Extension, &current.type_id)?;
            match self.reload(&def, &current, cancel).await {
                Ok(()) => restarted.push(current.id),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!("Extension '{}' could not follow connector restart: {}", current.id, e);
                    self.cascade_disable(&current, connector, cancel).await?;
                    disabled.push(current.id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok((restarted, disabled))
    }

    /// 새 레코드를 (요청대로) 활성화. 실패는 비활성 다운그레이드로 흡수.
    async fn enable_new(
        &self,
        def: &Definition,
        record: &mut Record,
        progress: &mut Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<(bool, Option<String>), LifecycleError> {
        if !record.enabled {
            progress.enter(InstanceState::Absent)?;
            return Ok((false, None));
        }
        match self.bring_up(def, record, progress, cancel).await {
            Ok(()) => Ok((true, None)),
            Err(e) => Ok((false, Some(downgrade(record, e)?))),
        }
    }

    // ═══════════════════════════════════════════════════════════════
    //  조회
    // ═══════════════════════════════════════════════════════════════

    pub fn list_definitions(&self, kind: PluginKind, scope: Option<Scope>) -> Vec<Arc<Definition>> {
        self.definitions.list_scoped(kind, scope)
    }

    pub async fn list_connectors(&self) -> Result<Vec<Record>, LifecycleError> {
        Ok(self.store.list_connector_records().await?)
    }

    pub async fn list_extensions(&self, server_id: Option<&str>) -> Result<Vec<Record>, LifecycleError> {
        Ok(self.store.list_extension_records(server_id).await?)
    }

    /// 진행 중인 전이(Validating/Resolving/Initializing)도 보인다
    pub fn get_instance(&self, id: &str) -> Option<InstanceView> {
        self.instances.get(id)
    }

    pub fn get_instances_by_server(&self, server_id: &str) -> Vec<InstanceView> {
        self.instances.get_instances_by_server(server_id)
    }

    pub fn get_instances_by_type(&self, type_id: &str) -> Vec<InstanceView> {
        self.instances.get_instances_by_type(type_id)
    }

    // ═══════════════════════════════════════════════════════════════
    //  커넥터
    // ═══════════════════════════════════════════════════════════════

    pub async fn create_connector(
        self: &Arc<Self>,
        req: CreateConnectorRequest,
        cancel: &CancellationToken,
    ) -> Result<CreateOutcome, LifecycleError> {
        let (this, cancel) = (Arc::clone(self), cancel.clone());
        detached(async move { this.create_connector_now(req, &cancel).await }).await
    }

    async fn create_connector_now(
        &self,
        req: CreateConnectorRequest,
        cancel: &CancellationToken,
    ) -> Result<CreateOutcome, LifecycleError> {
        let def = self.definition(PluginKind::Connector, &req.type_id)?;
        let requested = if req.server_id.is_some() {
            Scope::Server
        } else {
            Scope::Global
        };
        if def.scope != requested {
            return Err(LifecycleError::ScopeMismatch {
                kind: PluginKind::Connector,
                type_id: req.type_id,
                expected: def.scope,
                requested,
            });
        }

        // 새 UUID라 경쟁자가 없으므로 레코드 락은 잡지 않는다
        let mut record = Record::new(
            PluginKind::Connector,
            &req.type_id,
            req.server_id.as_deref(),
            req.enabled,
            req.config,
        );

        let mut progress = Progress::begin(&self.instances, &record)?;
        if let Err(e) = validate_config(&def.config_schema, &record.config) {
            progress.fail();
            return Err(e.into());
        }
        if let Some(server_id) = &req.server_id {
            if let Err(e) = self.check_server(server_id).await {
                progress.fail();
                return Err(e);
            }
        }

        let (started, warning) = self.enable_new(&def, &mut record, &mut progress, cancel).await?;
        self.persist(&record, started, cancel).await?;

        self.audit.notify(AuditEvent::Created {
            kind: PluginKind::Connector,
            id: record.id.clone(),
            type_id: record.type_id.clone(),
            server_id: record.server_id.clone(),
            enabled: record.enabled,
        });
        Ok(CreateOutcome {
            id: record.id,
            enabled: record.enabled,
            warning,
        })
    }

    pub async fn update_connector(
        self: &Arc<Self>,
        id: &str,
        patch: RecordPatch,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome, LifecycleError> {
        let (this, id, cancel) = (Arc::clone(self), id.to_string(), cancel.clone());
        detached(async move { this.update_connector_now(&id, patch, &cancel).await }).await
    }

    async fn update_connector_now(
        &self,
        id: &str,
        patch: RecordPatch,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome, LifecycleError> {
        let existing = self.load(PluginKind::Connector, id).await?;
        let def = self.definition(PluginKind::Connector, &existing.type_id)?;

        let _type_guard = self.type_locks.exclusive(&def.type_id).await;
        let _guard = self.record_locks.exclusive(id).await;
        let mut record = self.load(PluginKind::Connector, id).await?;

        let config_changed = patch.config.is_some();
        if let Some(patch_config) = &patch.config {
            let merged = merge_config(&record.config, patch_config);
            validate_config(&def.config_schema, &merged)?;
            record.config = merged;
        }

        let was_enabled = record.enabled;
        let now_enabled = patch.enabled.unwrap_or(was_enabled);
        let mut warning = None;
        let mut disabled_extensions = Vec::new();
        let mut restarted_extensions = Vec::new();
        let mut started = false;
        let mut refresh = false;

        match (was_enabled, now_enabled) {
            (true, false) => {
                disabled_extensions = self.sweep_dependents(&record, cancel).await?;
                self.stop(&record, cancel).await?;
                record.enabled = false;
            }
            (false, true) => {
                record.enabled = true;
                let mut progress = Progress::begin(&self.instances, &record)?;
                let (up, w) = self.enable_new(&def, &mut record, &mut progress, cancel).await?;
                started = up;
                warning = w;
            }
            (true, true) if config_changed || !self.instances.contains(id) => {
                match self.reload(&def, &record, cancel).await {
                    Ok(()) => {
                        started = true;
                        // 의존 익스텐션이 들고 있는 핸들은 이전 인스턴스를 가리킨다
                        refresh = true;
                    }
                    Err(e) => {
                        warning = Some(downgrade(&mut record, e)?);
                        // 커넥터가 내려갔으므로 의존 익스텐션도 정리
                        disabled_extensions = self.sweep_dependents(&record, cancel).await?;
                    }
                }
            }
            _ => {}
        }

        self.persist(&record, started, cancel).await?;
        if refresh {
            let (restarted, disabled) = self.refresh_dependents(&record, cancel).await?;
            restarted_extensions = restarted;
            disabled_extensions.extend(disabled);
        }

        self.audit.notify(AuditEvent::Updated {
            kind: PluginKind::Connector,
            id: record.id.clone(),
            enabled: record.enabled,
        });
        Ok(UpdateOutcome {
            enabled: record.enabled,
            warning,
            disabled_extensions,
            restarted_extensions,
        })
    }

    /// 2단계 삭제: (a) 의존 익스텐션 비활성화 (b) 커넥터 레코드 삭제 + 인스턴스 종료.
    /// 비활성화된 익스텐션 ID 목록을 돌려준다.
    pub async fn delete_connector(
        self: &Arc<Self>,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, LifecycleError> {
        let (this, id, cancel) = (Arc::clone(self), id.to_string(), cancel.clone());
        detached(async move { this.delete_connector_now(&id, &cancel).await }).await
    }

    async fn delete_connector_now(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, LifecycleError> {
        let existing = self.load(PluginKind::Connector, id).await?;

        let _type_guard = self.type_locks.exclusive(&existing.type_id).await;
        let _guard = self.record_locks.exclusive(id).await;
        let record = self.load(PluginKind::Connector, id).await?;

        let affected = self.sweep_dependents(&record, cancel).await?;

        self.store.delete_record(id).await?;
        self.stop(&record, cancel).await?;

        tracing::info!(
            "Connector '{}' ({}) deleted, {} extension(s) disabled",
            id,
            record.type_id,
            affected.len()
        );
        self.audit.notify(AuditEvent::Deleted {
            kind: PluginKind::Connector,
            id: id.to_string(),
            type_id: record.type_id.clone(),
        });
        Ok(affected)
    }

    // ═══════════════════════════════════════════════════════════════
    //  익스텐션
    // ═══════════════════════════════════════════════════════════════

    pub async fn create_extension(
        self: &Arc<Self>,
        req: CreateExtensionRequest,
        cancel: &CancellationToken,
    ) -> Result<CreateOutcome, LifecycleError> {
        let (this, cancel) = (Arc::clone(self), cancel.clone());
        detached(async move { this.create_extension_now(req, &cancel).await }).await
    }

    async fn create_extension_now(
        &self,
        req: CreateExtensionRequest,
        cancel: &CancellationToken,
    ) -> Result<CreateOutcome, LifecycleError> {
        let def = self.definition(PluginKind::Extension, &req.type_id)?;

        let mut record = Record::new(
            PluginKind::Extension,
            &req.type_id,
            Some(&req.server_id),
            req.enabled,
            req.config,
        );
        let mut progress = Progress::begin(&self.instances, &record)?;
        if let Err(e) = validate_config(&def.config_schema, &record.config) {
            progress.fail();
            return Err(e.into());
        }
        if let Err(e) = self.check_server(&req.server_id).await {
            progress.fail();
            return Err(e);
        }

        let _type_guards = self.type_locks.shared_many(&def.connector_types()).await;
        let _creation_guard = if def.allow_multiple_instances {
            None
        } else {
            let key = format!("{}/{}", req.server_id, def.type_id);
            let guard = self.creation_locks.exclusive(&key).await;
            let exists = self
                .store
                .list_extension_records(Some(&req.server_id))
                .await?
                .iter()
                .any(|r| r.type_id == def.type_id);
            if exists {
                progress.fail();
                return Err(LifecycleError::DuplicateInstance {
                    server_id: req.server_id,
                    type_id: def.type_id.clone(),
                });
            }
            Some(guard)
        };

        let (started, warning) = self.enable_new(&def, &mut record, &mut progress, cancel).await?;
        self.persist(&record, started, cancel).await?;

        self.audit.notify(AuditEvent::Created {
            kind: PluginKind::Extension,
            id: record.id.clone(),
            type_id: record.type_id.clone(),
            server_id: record.server_id.clone(),
            enabled: record.enabled,
        });
        Ok(CreateOutcome {
            id: record.id,
            enabled: record.enabled,
            warning,
        })
    }

    pub async fn update_extension(
        self: &Arc<Self>,
        id: &str,
        patch: RecordPatch,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome, LifecycleError> {
        let (this, id, cancel) = (Arc::clone(self), id.to_string(), cancel.clone());
        detached(async move { this.modify_extension(&id, patch, false, &cancel).await }).await
    }

    /// enabled 플래그를 뒤집는다
    pub async fn toggle_extension(
        self: &Arc<Self>,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome, LifecycleError> {
        let (this, id, cancel) = (Arc::clone(self), id.to_string(), cancel.clone());
        detached(async move {
            this.modify_extension(&id, RecordPatch::default(), true, &cancel)
                .await
        })
        .await
    }

    async fn modify_extension(
        &self,
        id: &str,
        patch: RecordPatch,
        toggle: bool,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome, LifecycleError> {
        let existing = self.load(PluginKind::Extension, id).await?;
        let def = self.definition(PluginKind::Extension, &existing.type_id)?;

        let _type_guards = self.type_locks.shared_many(&def.connector_types()).await;
        let _guard = self.record_locks.exclusive(id).await;
        let mut record = self.load(PluginKind::Extension, id).await?;

        let config_changed = patch.config.is_some();
        if let Some(patch_config) = &patch.config {
            let merged = merge_config(&record.config, patch_config);
            validate_config(&def.config_schema, &merged)?;
            record.config = merged;
        }

        let was_enabled = record.enabled;
        let now_enabled = if toggle {
            !was_enabled
        } else {
            patch.enabled.unwrap_or(was_enabled)
        };
        let mut warning = None;
        let mut started = false;

        match (was_enabled, now_enabled) {
            (true, false) => {
                self.stop(&record, cancel).await?;
                record.enabled = false;
            }
            (false, true) => {
                record.enabled = true;
                let mut progress = Progress::begin(&self.instances, &record)?;
                let (up, w) = self.enable_new(&def, &mut record, &mut progress, cancel).await?;
                started = up;
                warning = w;
            }
            (true, true) if config_changed || !self.instances.contains(id) => {
                match self.reload(&def, &record, cancel).await {
                    Ok(()) => started = true,
                    Err(e) => warning = Some(downgrade(&mut record, e)?),
                }
            }
            _ => {}
        }

        self.persist(&record, started, cancel).await?;
        self.audit.notify(AuditEvent::Updated {
            kind: PluginKind::Extension,
            id: record.id.clone(),
            enabled: record.enabled,
        });
        Ok(UpdateOutcome {
            enabled: record.enabled,
            warning,
            disabled_extensions: Vec::new(),
            restarted_extensions: Vec::new(),
        })
    }

    pub async fn delete_extension(
        self: &Arc<Self>,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        let (this, id, cancel) = (Arc::clone(self), id.to_string(), cancel.clone());
        detached(async move { this.delete_extension_now(&id, &cancel).await }).await
    }

    async fn delete_extension_now(&self, id: &str, cancel: &CancellationToken) -> Result<(), LifecycleError> {
        let existing = self.load(PluginKind::Extension, id).await?;
        let connector_types = self
            .definitions
            .get(PluginKind::Extension, &existing.type_id)
            .map(|d| d.connector_types())
            .unwrap_or_default();

        let _type_guards = self.type_locks.shared_many(&connector_types).await;
        let _guard = self.record_locks.exclusive(id).await;
        let record = self.load(PluginKind::Extension, id).await?;

        self.stop(&record, cancel).await?;
        self.store.delete_record(id).await?;

        tracing::info!(
            "Extension '{}' ({}) deleted from server '{}'",
            id,
            record.type_id,
            record.server_id.as_deref().unwrap_or("-")
        );
        self.audit.notify(AuditEvent::Deleted {
            kind: PluginKind::Extension,
            id: id.to_string(),
            type_id: record.type_id.clone(),
        });
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    //  프로세스 시작 / 종료
    // ═══════════════════════════════════════════════════════════════

    /// 활성 레코드의 인스턴스를 다시 띄운다 (커넥터 먼저).
    /// 실패한 레코드는 비활성으로 내린다.
    pub async fn restore_enabled(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<RestoreReport, LifecycleError> {
        let (this, cancel) = (Arc::clone(self), cancel.clone());
        detached(async move { this.restore_enabled_now(&cancel).await }).await
    }

    async fn restore_enabled_now(&self, cancel: &CancellationToken) -> Result<RestoreReport, LifecycleError> {
        let mut report = RestoreReport::default();
        let connectors = self.store.list_connector_records().await?;
        let extensions = self.store.list_extension_records(None).await?;

        for record in connectors.into_iter().chain(extensions).filter(|r| r.enabled) {
            let _guard = self.record_locks.exclusive(&record.id).await;
            let result = match self.definition(record.kind, &record.type_id) {
                Ok(def) => {
                    let mut progress = Progress::begin(&self.instances, &record)?;
                    match validate_config(&def.config_schema, &record.config) {
                        Ok(()) => self.bring_up(&def, &record, &mut progress, cancel).await,
                        Err(e) => {
                            progress.fail();
                            Err(e.into())
                        }
                    }
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => report.started.push(record.id.clone()),
                Err(e) => {
                    if matches!(
                        e,
                        LifecycleError::Store(_) | LifecycleError::Transition(_) | LifecycleError::Aborted(_)
                    ) {
                        return Err(e);
                    }
                    tracing::warn!(
                        "Could not restore {} '{}' ({}), disabling: {}",
                        record.kind,
                        record.id,
                        record.type_id,
                        e
                    );
                    self.store.set_enabled(&record.id, false).await?;
                    report.disabled.push((record.id.clone(), e.to_string()));
                }
            }
        }

        tracing::info!(
            "Restored {} plugin instance(s), {} disabled",
            report.started.len(),
            report.disabled.len()
        );
        Ok(report)
    }

    /// 모든 인스턴스 종료 (익스텐션 먼저). 레코드는 건드리지 않는다.
    pub async fn shutdown_all(&self, cancel: &CancellationToken) -> usize {
        let count = self.instances.shutdown_all(cancel).await;
        tracing::info!("Shut down {} plugin instance(s)", count);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ServerMetadata, StaticServerDirectory};
    use crate::instance::LifecycleTimeouts;
    use crate::plugin::testing::{MockBehavior, MockPlugin, Tracker};
    use crate::plugin::{ConfigField, FieldType};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<AuditEvent>>);

    impl AuditSink for RecordingSink {
        fn notify(&self, event: AuditEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    struct Fixture {
        coordinator: Arc<LifecycleCoordinator>,
        store: Arc<MemoryStore>,
        audit: Arc<RecordingSink>,
        discord: Tracker,
        automod: Tracker,
        cancel: CancellationToken,
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn fixture_with(automod_behavior: MockBehavior, allow_multiple: bool) -> Fixture {
        let discord = Tracker::default();
        let automod = Tracker::default();
        let d = discord.clone();
        let a = automod.clone();

        let mut defs = DefinitionRegistry::new();
        defs.register(
            Definition::connector("discord", Scope::Global, move || {
                MockPlugin::new(d.clone(), MockBehavior::Ok)
            })
            .field(ConfigField::new("token", FieldType::String).required()),
        )
        .unwrap();
        defs.register(Definition::connector("irc", Scope::Server, || {
            MockPlugin::new(Tracker::default(), MockBehavior::Ok)
        }))
        .unwrap();
        defs.register(
            Definition::extension("auto-mod", move || MockPlugin::new(a.clone(), automod_behavior))
                .requires_connector("discord")
                .allow_multiple_instances(allow_multiple)
                .field(ConfigField::new("x", FieldType::Integer))
                .field(ConfigField::new("level", FieldType::String).with_default(json!("low"))),
        )
        .unwrap();

        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(RecordingSink::default());
        let services = SharedServices::new(Arc::new(StaticServerDirectory::new(vec![
            ServerMetadata::new("s1", "main", "minecraft"),
            ServerMetadata::new("s2", "creative", "minecraft"),
            ServerMetadata::new("s3", "modded", "minecraft"),
        ])));
        let coordinator = LifecycleCoordinator::new(
            Arc::new(defs),
            Arc::new(InstanceRegistry::new(LifecycleTimeouts {
                initialize: Duration::from_millis(200),
                shutdown: Duration::from_millis(200),
            })),
            services,
            store.clone(),
            audit.clone(),
        );
        Fixture {
            coordinator: Arc::new(coordinator),
            store,
            audit,
            discord,
            automod,
            cancel: CancellationToken::new(),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockBehavior::Ok, false)
    }

    async fn discord(f: &Fixture) -> String {
        f.coordinator
            .create_connector(
                CreateConnectorRequest {
                    type_id: "discord".into(),
                    server_id: None,
                    enabled: true,
                    config: obj(json!({"token": "abc"})),
                },
                &f.cancel,
            )
            .await
            .unwrap()
            .id
    }

    fn automod_req(server: &str, config: Value) -> CreateExtensionRequest {
        CreateExtensionRequest {
            server_id: server.into(),
            type_id: "auto-mod".into(),
            enabled: true,
            config: obj(config),
        }
    }

    #[tokio::test]
    async fn test_validation_error_changes_nothing() {
        let f = fixture();
        let err = f
            .coordinator
            .create_connector(
                CreateConnectorRequest {
                    type_id: "discord".into(),
                    server_id: None,
                    enabled: true,
                    config: Map::new(),
                },
                &f.cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(ref v) if v.field == "token"));
        assert!(f.store.list_connector_records().await.unwrap().is_empty());
        assert!(f.audit.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_type_and_scope_mismatch() {
        let f = fixture();
        let err = f
            .coordinator
            .create_connector(
                CreateConnectorRequest {
                    type_id: "slack".into(),
                    server_id: None,
                    enabled: true,
                    config: Map::new(),
                },
                &f.cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::UnknownType { .. }));

        let err = f
            .coordinator
            .create_connector(
                CreateConnectorRequest {
                    type_id: "irc".into(),
                    server_id: None,
                    enabled: true,
                    config: Map::new(),
                },
                &f.cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::ScopeMismatch {
                expected: Scope::Server,
                requested: Scope::Global,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_connector_is_soft_failure() {
        let f = fixture();
        let out = f
            .coordinator
            .create_extension(automod_req("s1", json!({})), &f.cancel)
            .await
            .unwrap();
        assert!(!out.enabled);
        assert!(out.warning.unwrap().contains("discord"));

        let record = f.store.load_record(&out.id).await.unwrap().unwrap();
        assert!(!record.enabled);
        assert!(f.coordinator.get_instance(&out.id).is_none());
    }

    #[tokio::test]
    async fn test_initialize_failure_is_soft_failure() {
        let f = fixture_with(MockBehavior::FailInit, false);
        discord(&f).await;
        let out = f
            .coordinator
            .create_extension(automod_req("s1", json!({})), &f.cancel)
            .await
            .unwrap();
        assert!(!out.enabled);
        assert!(out.warning.unwrap().contains("connection refused"));
        assert!(f.coordinator.get_instance(&out.id).is_none());
    }

    #[tokio::test]
    async fn test_defaults_applied_but_not_stored() {
        let f = fixture();
        discord(&f).await;
        let out = f
            .coordinator
            .create_extension(automod_req("s1", json!({"x": 1})), &f.cancel)
            .await
            .unwrap();
        assert!(out.enabled);
        assert_eq!(f.automod.last_config().unwrap()["level"], json!("low"));
        let record = f.store.load_record(&out.id).await.unwrap().unwrap();
        assert!(!record.config.contains_key("level"));
    }

    #[tokio::test]
    async fn test_duplicate_instance_rejected_before_side_effects() {
        let f = fixture();
        discord(&f).await;
        f.coordinator
            .create_extension(automod_req("s1", json!({})), &f.cancel)
            .await
            .unwrap();
        let err = f
            .coordinator
            .create_extension(automod_req("s1", json!({})), &f.cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::DuplicateInstance { .. }));
        assert_eq!(f.store.list_extension_records(Some("s1")).await.unwrap().len(), 1);
        assert_eq!(f.automod.initialized(), 1);
    }

    #[tokio::test]
    async fn test_multiple_instances_allowed() {
        let f = fixture_with(MockBehavior::Ok, true);
        discord(&f).await;
        let a = f
            .coordinator
            .create_extension(automod_req("s1", json!({})), &f.cancel)
            .await
            .unwrap();
        let b = f
            .coordinator
            .create_extension(automod_req("s1", json!({})), &f.cancel)
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.enabled && b.enabled);
    }

    #[tokio::test]
    async fn test_merge_on_restart() {
        let f = fixture();
        discord(&f).await;
        let out = f
            .coordinator
            .create_extension(automod_req("s1", json!({"x": 0, "y": 2})), &f.cancel)
            .await
            .unwrap();

        let updated = f
            .coordinator
            .update_extension(
                &out.id,
                RecordPatch {
                    enabled: Some(true),
                    config: Some(obj(json!({"x": 1}))),
                },
                &f.cancel,
            )
            .await
            .unwrap();
        assert!(updated.enabled);

        let effective = f.automod.last_config().unwrap();
        assert_eq!(effective["x"], json!(1));
        assert_eq!(effective["y"], json!(2));
        assert_eq!(f.automod.initialized(), 2);
        assert_eq!(f.automod.shut_down(), 1);
        let record = f.store.load_record(&out.id).await.unwrap().unwrap();
        assert_eq!(record.config, obj(json!({"x": 1, "y": 2})));
    }

    #[tokio::test]
    async fn test_toggle_round_trip() {
        let f = fixture();
        discord(&f).await;
        let out = f
            .coordinator
            .create_extension(automod_req("s1", json!({})), &f.cancel)
            .await
            .unwrap();

        let off = f.coordinator.toggle_extension(&out.id, &f.cancel).await.unwrap();
        assert!(!off.enabled);
        assert!(f.coordinator.get_instance(&out.id).is_none());

        let on = f.coordinator.toggle_extension(&out.id, &f.cancel).await.unwrap();
        assert!(on.enabled);
        assert_eq!(
            f.coordinator.get_instance(&out.id).unwrap().state,
            InstanceState::Running
        );
    }

    #[tokio::test]
    async fn test_unknown_record_is_not_found() {
        let f = fixture();
        let err = f.coordinator.toggle_extension("nope", &f.cancel).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { .. }));

        // 커넥터 ID로 익스텐션 API를 호출해도 NotFound
        let cid = discord(&f).await;
        let err = f.coordinator.delete_extension(&cid, &f.cancel).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_connector_cascade_completeness() {
        let f = fixture();
        let cid = discord(&f).await;
        let e1 = f
            .coordinator
            .create_extension(automod_req("s1", json!({})), &f.cancel)
            .await
            .unwrap()
            .id;
        let e2 = f
            .coordinator
            .create_extension(automod_req("s2", json!({})), &f.cancel)
            .await
            .unwrap()
            .id;
        let mut e3_req = automod_req("s3", json!({}));
        e3_req.enabled = false;
        let e3 = f.coordinator.create_extension(e3_req, &f.cancel).await.unwrap().id;

        let mut affected = f.coordinator.delete_connector(&cid, &f.cancel).await.unwrap();
        affected.sort();
        let mut expected = vec![e1.clone(), e2.clone()];
        expected.sort();
        assert_eq!(affected, expected);
        assert!(!affected.contains(&e3));

        for id in [&e1, &e2, &e3] {
            assert!(!f.store.load_record(id).await.unwrap().unwrap().enabled);
            assert!(f.coordinator.get_instance(id).is_none());
        }
        assert!(f.store.load_record(&cid).await.unwrap().is_none());
        assert!(f.coordinator.get_instance(&cid).is_none());
        assert_eq!(f.discord.shut_down(), 1);

        let cascades = f
            .audit
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, AuditEvent::CascadeDisabled { .. }))
            .count();
        assert_eq!(cascades, 2);
    }

    #[tokio::test]
    async fn test_disabling_connector_cascades() {
        let f = fixture();
        let cid = discord(&f).await;
        let eid = f
            .coordinator
            .create_extension(automod_req("s1", json!({})), &f.cancel)
            .await
            .unwrap()
            .id;

        let out = f
            .coordinator
            .update_connector(
                &cid,
                RecordPatch {
                    enabled: Some(false),
                    config: None,
                },
                &f.cancel,
            )
            .await
            .unwrap();
        assert!(!out.enabled);
        assert_eq!(out.disabled_extensions, vec![eid.clone()]);
        assert!(f.coordinator.get_instance(&cid).is_none());
        assert!(!f.store.load_record(&eid).await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn test_restore_enabled_downgrades_failures() {
        let f = fixture();
        let cid = discord(&f).await;
        let eid = f
            .coordinator
            .create_extension(automod_req("s1", json!({})), &f.cancel)
            .await
            .unwrap()
            .id;
        // 프로세스 재시작 흉내: 인스턴스만 내린다
        f.coordinator.shutdown_all(&f.cancel).await;
        assert!(f.coordinator.instances().is_empty());

        // 커넥터 레코드를 망가뜨려 복원 실패를 만든다
        let mut broken = f.store.load_record(&cid).await.unwrap().unwrap();
        broken.config = Map::new();
        f.store.save_record(&broken).await.unwrap();

        let report = f.coordinator.restore_enabled(&f.cancel).await.unwrap();
        assert!(report.started.is_empty());
        assert_eq!(report.disabled.len(), 2);
        assert!(!f.store.load_record(&cid).await.unwrap().unwrap().enabled);
        assert!(!f.store.load_record(&eid).await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn test_restore_enabled_starts_connectors_first() {
        let f = fixture();
        discord(&f).await;
        let eid = f
            .coordinator
            .create_extension(automod_req("s1", json!({})), &f.cancel)
            .await
            .unwrap()
            .id;
        f.coordinator.shutdown_all(&f.cancel).await;

        let report = f.coordinator.restore_enabled(&f.cancel).await.unwrap();
        assert_eq!(report.started.len(), 2);
        assert!(report.disabled.is_empty());
        assert!(f.coordinator.get_instance(&eid).is_some());
    }

    #[tokio::test]
    async fn test_unknown_server_rejected_before_side_effects() {
        let f = fixture();
        discord(&f).await;
        let err = f
            .coordinator
            .create_extension(automod_req("nowhere", json!({})), &f.cancel)
            .await
            .unwrap_err();
        match err {
            LifecycleError::Validation(v) => {
                assert_eq!(v.field, "server_id");
                assert_eq!(v.error_type, ValidationErrorType::UnknownServer);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(f.store.list_extension_records(None).await.unwrap().is_empty());
        assert_eq!(f.automod.initialized(), 0);
        assert!(f.coordinator.get_instances_by_server("nowhere").is_empty());
    }

    #[tokio::test]
    async fn test_connector_restart_reconnects_dependents() {
        let f = fixture();
        let cid = discord(&f).await;
        let eid = f
            .coordinator
            .create_extension(automod_req("s1", json!({})), &f.cancel)
            .await
            .unwrap()
            .id;

        let out = f
            .coordinator
            .update_connector(
                &cid,
                RecordPatch {
                    enabled: None,
                    config: Some(obj(json!({"token": "rotated"}))),
                },
                &f.cancel,
            )
            .await
            .unwrap();
        assert!(out.enabled);
        assert_eq!(out.restarted_extensions, vec![eid.clone()]);
        assert!(out.disabled_extensions.is_empty());

        assert_eq!(f.discord.initialized(), 2);
        assert_eq!(f.automod.initialized(), 2);
        assert_eq!(f.automod.shut_down(), 1);
        assert_eq!(
            f.coordinator.get_instance(&eid).unwrap().state,
            InstanceState::Running
        );

        // 익스텐션이 받은 핸들은 재시작된 커넥터 인스턴스여야 한다
        let current = f
            .coordinator
            .instances()
            .get_connectors_by_server_and_type(None, "discord")
            .remove(0);
        let deps = f.automod.last_deps().unwrap();
        let held = deps.connector("discord").unwrap();
        assert_eq!(held.id, cid);
        assert_eq!(
            Arc::as_ptr(&held.instance) as *const (),
            Arc::as_ptr(&current.instance) as *const ()
        );
    }

    #[tokio::test]
    async fn test_transient_state_visible_during_initialize() {
        let f = fixture_with(MockBehavior::HangInit, false);
        discord(&f).await;

        let task = {
            let (coordinator, cancel) = (f.coordinator.clone(), f.cancel.clone());
            tokio::spawn(async move {
                coordinator
                    .create_extension(automod_req("s1", json!({})), &cancel)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let views = f.coordinator.get_instances_by_server("s1");
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].state, InstanceState::Initializing);
        assert_eq!(
            f.coordinator.get_instance(&views[0].id).unwrap().state,
            InstanceState::Initializing
        );

        // 초기화 타임아웃은 소프트 실패: 대기 항목도 함께 사라진다
        let out = task.await.unwrap().unwrap();
        assert!(!out.enabled);
        assert!(f.coordinator.get_instance(&out.id).is_none());
        assert!(f.coordinator.get_instances_by_server("s1").is_empty());
    }

    #[tokio::test]
    async fn test_restore_disables_unregistered_type() {
        let f = fixture();
        let retired = Record::new(PluginKind::Extension, "retired-bot", Some("s1"), true, Map::new());
        f.store.save_record(&retired).await.unwrap();

        let report = f.coordinator.restore_enabled(&f.cancel).await.unwrap();
        assert!(report.started.is_empty());
        assert_eq!(report.disabled.len(), 1);
        assert_eq!(report.disabled[0].0, retired.id);
        assert!(report.disabled[0].1.contains("Unknown extension type 'retired-bot'"));
        assert!(!f.store.load_record(&retired.id).await.unwrap().unwrap().enabled);
        assert!(f.coordinator.get_instance(&retired.id).is_none());
    }

    #[test]
    fn test_merge_config_is_shallow() {
        let base = obj(json!({"x": 0, "nested": {"a": 1, "b": 2}}));
        let patch = obj(json!({"nested": {"a": 5}}));
        let merged = merge_config(&base, &patch);
        assert_eq!(merged, obj(json!({"x": 0, "nested": {"a": 5}})));
    }
}
