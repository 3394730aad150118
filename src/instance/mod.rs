//! Instance Registry: 라이브 커넥터/익스텐션 인스턴스의 유일한 소유자
//!
//! - 인덱스: ID별, (kind, scope, TypeID)별 (생성 순서 유지)
//! - 인덱스 락(`std::sync::RwLock`)은 맵 변경에만 쓰이고 `.await`를 넘어 잡지 않는다
//! - 같은 ID에 대한 생성/종료/재시작은 per-ID 임계 구역으로 전순서화된다
//! - `initialize`/`shutdown` 호출은 타임아웃과 취소 토큰으로 제한된다
//! - 인스턴스가 아직 없는 동안의 전이 상태(Validating/Resolving/Initializing)는
//!   대기 항목으로 따로 보관한다. 조회에는 보이지만 커넥터 해석에는 쓰이지 않는다.

pub mod locks;

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::LifecycleError;
use crate::lifecycle::InstanceState;
use crate::plugin::{ConnectorHandle, Definition, Dependencies, PluginInstance, PluginKind};
pub use locks::{KeyGuard, LockTable};

/// initialize/shutdown 호출 제한 시간
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTimeouts {
    pub initialize: Duration,
    pub shutdown: Duration,
}

impl Default for LifecycleTimeouts {
    fn default() -> Self {
        Self {
            initialize: Duration::from_secs(30),
            shutdown: Duration::from_secs(10),
        }
    }
}

/// 외부로 노출되는 인스턴스 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceView {
    pub id: String,
    pub kind: PluginKind,
    pub type_id: String,
    pub server_id: Option<String>,
    pub state: InstanceState,
}

struct LiveInstance {
    kind: PluginKind,
    type_id: String,
    server_id: Option<String>,
    state: InstanceState,
    seq: u64,
    instance: Arc<dyn PluginInstance>,
}

impl LiveInstance {
    fn view(&self, id: &str) -> InstanceView {
        InstanceView {
            id: id.to_string(),
            kind: self.kind,
            type_id: self.type_id.clone(),
            server_id: self.server_id.clone(),
            state: self.state,
        }
    }
}

/// 아직 인스턴스가 없는 ID의 진행 중 상태
struct PendingEntry {
    kind: PluginKind,
    type_id: String,
    server_id: Option<String>,
    state: InstanceState,
    seq: u64,
}

impl PendingEntry {
    fn view(&self, id: &str) -> InstanceView {
        InstanceView {
            id: id.to_string(),
            kind: self.kind,
            type_id: self.type_id.clone(),
            server_id: self.server_id.clone(),
            state: self.state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopeKey {
    kind: PluginKind,
    server_id: Option<String>,
    type_id: String,
}

#[derive(Default)]
struct Indices {
    by_id: HashMap<String, LiveInstance>,
    /// 생성 순서대로 ID 보관
    by_scope_type: HashMap<ScopeKey, Vec<String>>,
    pending: HashMap<String, PendingEntry>,
}

impl Indices {
    fn insert(&mut self, id: &str, live: LiveInstance) {
        let key = ScopeKey {
            kind: live.kind,
            server_id: live.server_id.clone(),
            type_id: live.type_id.clone(),
        };
        self.by_scope_type.entry(key).or_default().push(id.to_string());
        self.by_id.insert(id.to_string(), live);
    }

    fn remove(&mut self, id: &str) -> Option<LiveInstance> {
        let live = self.by_id.remove(id)?;
        let key = ScopeKey {
            kind: live.kind,
            server_id: live.server_id.clone(),
            type_id: live.type_id.clone(),
        };
        if let Some(ids) = self.by_scope_type.get_mut(&key) {
            ids.retain(|i| i != id);
            if ids.is_empty() {
                self.by_scope_type.remove(&key);
            }
        }
        Some(live)
    }

    /// 조건에 맞는 인스턴스를 생성 순서로. `with_pending`이면 대기 항목도 포함.
    fn views_where<F>(&self, with_pending: bool, pred: F) -> Vec<InstanceView>
    where
        F: Fn(&InstanceView) -> bool,
    {
        let mut matched: Vec<(u64, InstanceView)> = self
            .by_id
            .iter()
            .map(|(id, live)| (live.seq, live.view(id)))
            .collect();
        if with_pending {
            matched.extend(
                self.pending
                    .iter()
                    .map(|(id, entry)| (entry.seq, entry.view(id))),
            );
        }
        matched.retain(|(_, view)| pred(view));
        matched.sort_by_key(|(seq, _)| *seq);
        matched.into_iter().map(|(_, view)| view).collect()
    }
}

/// 인스턴스가 생기기 전까지의 전이 상태를 레지스트리에 게시한다.
/// drop 시 게시한 대기 항목을 지운다.
pub struct Pending<'a> {
    registry: &'a InstanceRegistry,
    id: String,
    kind: PluginKind,
    type_id: String,
    server_id: Option<String>,
}

impl Pending<'_> {
    /// 같은 ID가 이미 살아있으면 라이브 항목이 상태를 대변하므로 무시
    pub fn set(&self, state: InstanceState) {
        let seq = self.registry.next_seq.fetch_add(1, Ordering::SeqCst);
        let mut idx = self.registry.write();
        if idx.by_id.contains_key(&self.id) {
            return;
        }
        idx.pending.insert(
            self.id.clone(),
            PendingEntry {
                kind: self.kind,
                type_id: self.type_id.clone(),
                server_id: self.server_id.clone(),
                state,
                seq,
            },
        );
    }

    pub fn clear(&self) {
        self.registry.write().pending.remove(&self.id);
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        self.clear();
    }
}

/// 취소/타임아웃을 적용하여 플러그인 호출. 실패 시 사람이 읽을 수 있는 사유 반환.
async fn bounded<F>(call: F, limit: Duration, cancel: &CancellationToken) -> Result<(), String>
where
    F: Future<Output = anyhow::Result<()>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err("cancelled".to_string()),
        res = tokio::time::timeout(limit, call) => match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(_) => Err(format!("timed out after {}ms", limit.as_millis())),
        },
    }
}

pub struct InstanceRegistry {
    indices: RwLock<Indices>,
    id_locks: LockTable,
    timeouts: LifecycleTimeouts,
    next_seq: AtomicU64,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new(LifecycleTimeouts::default())
    }
}

impl InstanceRegistry {
    pub fn new(timeouts: LifecycleTimeouts) -> Self {
        Self {
            indices: RwLock::new(Indices::default()),
            id_locks: LockTable::new(),
            timeouts,
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn timeouts(&self) -> LifecycleTimeouts {
        self.timeouts
    }

    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.indices.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.indices.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Running으로 등록. 같은 ID의 대기 항목은 같은 락 안에서 치운다.
    fn insert(
        &self,
        id: &str,
        kind: PluginKind,
        type_id: &str,
        server_id: Option<&str>,
        instance: Arc<dyn PluginInstance>,
    ) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let mut idx = self.write();
        idx.pending.remove(id);
        idx.insert(
            id,
            LiveInstance {
                kind,
                type_id: type_id.to_string(),
                server_id: server_id.map(|s| s.to_string()),
                state: InstanceState::Running,
                seq,
                instance,
            },
        );
    }

    /// 전이 상태 게시용 핸들. 상태는 `Pending::set`을 호출해야 보이기 시작한다.
    pub fn pending(
        &self,
        id: &str,
        kind: PluginKind,
        type_id: &str,
        server_id: Option<&str>,
    ) -> Pending<'_> {
        Pending {
            registry: self,
            id: id.to_string(),
            kind,
            type_id: type_id.to_string(),
            server_id: server_id.map(|s| s.to_string()),
        }
    }

    // ═══════════════════════════════════════════════════════════════
    //  생성 / 등록
    // ═══════════════════════════════════════════════════════════════

    /// Definition의 생성자로 인스턴스를 만들고 초기화한 뒤 등록한다.
    ///
    /// 이미 같은 ID가 살아있으면 아무것도 하지 않는다. 초기화 실패(타임아웃, 취소 포함)
    /// 시 인스턴스는 버려지고 인덱스에는 절대 들어가지 않는다.
    pub async fn create(
        &self,
        def: &Definition,
        id: &str,
        server_id: Option<&str>,
        config: &Map<String, Value>,
        deps: Dependencies,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        let _guard = self.id_locks.exclusive(id).await;
        self.create_locked(def, id, server_id, config, deps, cancel).await
    }

    async fn create_locked(
        &self,
        def: &Definition,
        id: &str,
        server_id: Option<&str>,
        config: &Map<String, Value>,
        deps: Dependencies,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        if self.contains(id) {
            tracing::debug!("{} '{}' is already running, skipping create", def.kind, id);
            return Ok(());
        }

        let pending = self.pending(id, def.kind, &def.type_id, server_id);
        pending.set(InstanceState::Initializing);

        let instance = def.instantiate();
        match bounded(instance.initialize(config, deps), self.timeouts.initialize, cancel).await {
            Ok(()) => {
                self.insert(id, def.kind, &def.type_id, server_id, instance);
                tracing::info!(
                    "{} '{}' ({}) is running{}",
                    def.kind,
                    id,
                    def.type_id,
                    server_id.map(|s| format!(" on server '{}'", s)).unwrap_or_default()
                );
                Ok(())
            }
            Err(reason) => {
                tracing::warn!("{} '{}' ({}) failed to initialize: {}", def.kind, id, def.type_id, reason);
                Err(LifecycleError::Initialization {
                    id: id.to_string(),
                    reason,
                })
            }
        }
    }

    /// 이미 초기화된 인스턴스를 직접 등록. 같은 ID가 살아있으면 false.
    pub async fn register_instance(
        &self,
        id: &str,
        kind: PluginKind,
        type_id: &str,
        server_id: Option<&str>,
        instance: Arc<dyn PluginInstance>,
    ) -> bool {
        let _guard = self.id_locks.exclusive(id).await;
        if self.contains(id) {
            return false;
        }
        self.insert(id, kind, type_id, server_id, instance);
        true
    }

    // ═══════════════════════════════════════════════════════════════
    //  종료 / 재시작
    // ═══════════════════════════════════════════════════════════════

    /// best-effort 종료 후 인덱스에서 제거. 모르는 ID는 no-op.
    /// 실제로 종료한 인스턴스가 있었으면 true.
    pub async fn shutdown(&self, id: &str, cancel: &CancellationToken) -> bool {
        let _guard = self.id_locks.exclusive(id).await;
        self.shutdown_locked(id, cancel).await
    }

    async fn shutdown_locked(&self, id: &str, cancel: &CancellationToken) -> bool {
        let (instance, kind) = {
            let mut idx = self.write();
            match idx.by_id.get_mut(id) {
                Some(live) => {
                    live.state = InstanceState::ShuttingDown;
                    (live.instance.clone(), live.kind)
                }
                None => return false,
            }
        };

        if let Err(reason) = bounded(instance.shutdown(), self.timeouts.shutdown, cancel).await {
            let err = LifecycleError::Shutdown {
                id: id.to_string(),
                reason,
            };
            tracing::warn!("{} (ignored)", err);
        }

        self.write().remove(id);
        tracing::info!("{} '{}' shut down", kind, id);
        true
    }

    /// 서버의 해당 TypeID 익스텐션 인스턴스를 모두 종료. 종료한 ID 목록 반환.
    pub async fn shutdown_extension(
        &self,
        server_id: &str,
        type_id: &str,
        cancel: &CancellationToken,
    ) -> Vec<String> {
        let ids = self.ids_for(PluginKind::Extension, Some(server_id), type_id);
        let mut stopped = Vec::new();
        for id in ids {
            if self.shutdown(&id, cancel).await {
                stopped.push(id);
            }
        }
        stopped
    }

    /// 종료 후 새 설정으로 재생성 (하나의 임계 구역).
    /// 새 초기화가 실패하면 인스턴스는 없는 상태로 남는다. 이전 설정으로 롤백하지 않음.
    pub async fn restart(
        &self,
        def: &Definition,
        id: &str,
        server_id: Option<&str>,
        config: &Map<String, Value>,
        deps: Dependencies,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        let _guard = self.id_locks.exclusive(id).await;
        self.shutdown_locked(id, cancel).await;
        self.create_locked(def, id, server_id, config, deps, cancel).await
    }

    /// 모든 인스턴스 종료 (익스텐션 먼저, 그 다음 커넥터)
    pub async fn shutdown_all(&self, cancel: &CancellationToken) -> usize {
        let mut count = 0;
        for kind in [PluginKind::Extension, PluginKind::Connector] {
            let ids: Vec<String> = self
                .read()
                .views_where(false, |view| view.kind == kind)
                .into_iter()
                .map(|v| v.id)
                .collect();
            for id in ids {
                if self.shutdown(&id, cancel).await {
                    count += 1;
                }
            }
        }
        count
    }

    // ═══════════════════════════════════════════════════════════════
    //  조회
    // ═══════════════════════════════════════════════════════════════

    pub fn contains(&self, id: &str) -> bool {
        self.read().by_id.contains_key(id)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.read()
            .by_id
            .get(id)
            .map_or(false, |live| live.state == InstanceState::Running)
    }

    /// 라이브 인스턴스, 없으면 진행 중인 대기 항목
    pub fn get(&self, id: &str) -> Option<InstanceView> {
        let idx = self.read();
        match idx.by_id.get(id) {
            Some(live) => Some(live.view(id)),
            None => idx.pending.get(id).map(|entry| entry.view(id)),
        }
    }

    /// 라이브 인스턴스 수 (대기 항목 제외)
    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ids_for(&self, kind: PluginKind, server_id: Option<&str>, type_id: &str) -> Vec<String> {
        let key = ScopeKey {
            kind,
            server_id: server_id.map(|s| s.to_string()),
            type_id: type_id.to_string(),
        };
        self.read().by_scope_type.get(&key).cloned().unwrap_or_default()
    }

    /// 해당 스코프(None = 글로벌)의 실행 중인 커넥터를 생성 순서로
    pub fn get_connectors_by_server_and_type(
        &self,
        server_id: Option<&str>,
        type_id: &str,
    ) -> Vec<ConnectorHandle> {
        let key = ScopeKey {
            kind: PluginKind::Connector,
            server_id: server_id.map(|s| s.to_string()),
            type_id: type_id.to_string(),
        };
        let idx = self.read();
        let ids = match idx.by_scope_type.get(&key) {
            Some(ids) => ids,
            None => return Vec::new(),
        };
        ids.iter()
            .filter_map(|id| {
                let live = idx.by_id.get(id)?;
                if live.state != InstanceState::Running {
                    return None;
                }
                Some(ConnectorHandle {
                    id: id.clone(),
                    type_id: live.type_id.clone(),
                    server_id: live.server_id.clone(),
                    instance: live.instance.clone(),
                })
            })
            .collect()
    }

    /// 서버 스코프 커넥터 (글로벌 제외, 라이브만)
    pub fn get_connectors_by_server(&self, server_id: &str) -> Vec<InstanceView> {
        self.read().views_where(false, |view| {
            view.kind == PluginKind::Connector && view.server_id.as_deref() == Some(server_id)
        })
    }

    /// TypeID의 모든 커넥터 (글로벌 + 서버 스코프, 라이브만)
    pub fn get_connectors_by_type(&self, type_id: &str) -> Vec<InstanceView> {
        self.read().views_where(false, |view| {
            view.kind == PluginKind::Connector && view.type_id == type_id
        })
    }

    /// 서버에 바인딩된 모든 인스턴스 (커넥터 + 익스텐션, 진행 중 포함)
    pub fn get_instances_by_server(&self, server_id: &str) -> Vec<InstanceView> {
        self.read()
            .views_where(true, |view| view.server_id.as_deref() == Some(server_id))
    }

    /// TypeID의 모든 인스턴스 (종류 무관, 진행 중 포함)
    pub fn get_instances_by_type(&self, type_id: &str) -> Vec<InstanceView> {
        self.read().views_where(true, |view| view.type_id == type_id)
    }

    pub fn list(&self) -> Vec<InstanceView> {
        self.read().views_where(true, |_| true)
    }
}
