//! 키 단위 비동기 락 테이블
//!
//! 같은 키에 대한 작업을 직렬화한다 (per-ID 임계 구역, TypeID 삭제 락).
//! 잡고 있거나 기다리는 쪽이 없어지면 엔트리를 정리한다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type LockMap = Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>;

#[derive(Default, Clone)]
pub struct LockTable {
    locks: LockMap,
}

enum Held {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// 드롭 시 락을 풀고 테이블 엔트리를 정리한다
pub struct KeyGuard {
    key: String,
    held: Option<Held>,
    locks: LockMap,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self.held, Some(Held::Exclusive(_)))
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // 가드를 먼저 풀어야 strong_count가 대기자 수를 정확히 반영한다
        self.held.take();
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = map.get(&self.key) {
            if Arc::strong_count(lock) == 1 {
                map.remove(&self.key);
            }
        }
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<RwLock<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key.to_string()).or_default().clone()
    }

    /// 배타 락 (같은 키의 다른 모든 작업과 직렬화)
    pub async fn exclusive(&self, key: &str) -> KeyGuard {
        let guard = self.entry(key).write_owned().await;
        KeyGuard {
            key: key.to_string(),
            held: Some(Held::Exclusive(guard)),
            locks: self.locks.clone(),
        }
    }

    /// 공유 락 (배타 락과만 직렬화)
    pub async fn shared(&self, key: &str) -> KeyGuard {
        let guard = self.entry(key).read_owned().await;
        KeyGuard {
            key: key.to_string(),
            held: Some(Held::Shared(guard)),
            locks: self.locks.clone(),
        }
    }

    /// 여러 키에 대한 공유 락. 데드락 방지를 위해 정렬 순서로 획득한다.
    pub async fn shared_many(&self, keys: &[String]) -> Vec<KeyGuard> {
        let mut sorted: Vec<&String> = keys.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            guards.push(self.shared(key).await);
        }
        guards
    }

    /// 현재 테이블에 남아있는 키 수
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
