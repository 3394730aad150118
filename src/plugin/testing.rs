//! 단위 테스트용 목 플러그인

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Dependencies, PluginInstance};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    Ok,
    FailInit,
    /// initialize가 끝나지 않음 (타임아웃/취소 확인용)
    HangInit,
    /// initialize가 잠깐 걸림 (동시성 확인용)
    SlowInit,
    FailShutdown,
}

#[derive(Debug, Default)]
struct TrackerState {
    initialized: usize,
    shut_down: usize,
    in_init: usize,
    max_in_init: usize,
    last_config: Option<Map<String, Value>>,
    last_deps: Option<Dependencies>,
}

/// 목 인스턴스들이 공유하는 관측 지점
#[derive(Debug, Clone, Default)]
pub struct Tracker(Arc<Mutex<TrackerState>>);

impl Tracker {
    fn with<R>(&self, f: impl FnOnce(&mut TrackerState) -> R) -> R {
        let mut state = self.0.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// 성공적으로 끝난 initialize 횟수
    pub fn initialized(&self) -> usize {
        self.with(|s| s.initialized)
    }

    pub fn shut_down(&self) -> usize {
        self.with(|s| s.shut_down)
    }

    pub fn max_concurrent_init(&self) -> usize {
        self.with(|s| s.max_in_init)
    }

    pub fn last_config(&self) -> Option<Map<String, Value>> {
        self.with(|s| s.last_config.clone())
    }

    pub fn last_deps(&self) -> Option<Dependencies> {
        self.with(|s| s.last_deps.clone())
    }
}

pub struct MockPlugin {
    tracker: Tracker,
    behavior: MockBehavior,
}

impl MockPlugin {
    pub fn new(tracker: Tracker, behavior: MockBehavior) -> Self {
        Self { tracker, behavior }
    }
}

#[async_trait]
impl PluginInstance for MockPlugin {
    async fn initialize(&self, config: &Map<String, Value>, deps: Dependencies) -> anyhow::Result<()> {
        self.tracker.with(|s| {
            s.in_init += 1;
            s.max_in_init = s.max_in_init.max(s.in_init);
        });

        let result = match self.behavior {
            MockBehavior::FailInit => Err(anyhow::anyhow!("connection refused")),
            MockBehavior::HangInit => {
                std::future::pending::<()>().await;
                Ok(())
            }
            MockBehavior::SlowInit => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            }
            MockBehavior::Ok | MockBehavior::FailShutdown => Ok(()),
        };

        self.tracker.with(|s| {
            s.in_init -= 1;
            if result.is_ok() {
                s.initialized += 1;
                s.last_config = Some(config.clone());
                s.last_deps = Some(deps);
            }
        });
        result
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.tracker.with(|s| s.shut_down += 1);
        if self.behavior == MockBehavior::FailShutdown {
            anyhow::bail!("socket already closed");
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
