//! 통합 테스트 공용 플러그인과 조립 도우미
#![allow(dead_code)]

use async_trait::async_trait;
use saba_plugins::host::{ServerMetadata, SharedServices, StaticServerDirectory, TracingAuditSink};
use saba_plugins::instance::{InstanceRegistry, LifecycleTimeouts};
use saba_plugins::plugin::{
    ConfigField, Definition, DefinitionRegistry, Dependencies, FieldType, PluginInstance, Scope,
};
use saba_plugins::store::Store;
use saba_plugins::LifecycleCoordinator;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 토큰으로 로그인하는 척하는 채팅 브리지
#[derive(Default)]
pub struct ChatBridge {
    token: Mutex<Option<String>>,
    sent: Mutex<Vec<String>>,
}

impl ChatBridge {
    pub fn send(&self, message: &str) -> anyhow::Result<()> {
        if self.token.lock().unwrap().is_none() {
            anyhow::bail!("bridge is not logged in");
        }
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PluginInstance for ChatBridge {
    async fn initialize(&self, config: &Map<String, Value>, _deps: Dependencies) -> anyhow::Result<()> {
        let token = config
            .get("token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("token missing"))?;
        *self.token.lock().unwrap() = Some(token.to_string());
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.token.lock().unwrap().take();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 초기화 시 discord 커넥터로 인사 메시지를 보내는 익스텐션
pub struct AutoMod {
    started: Arc<AtomicUsize>,
}

#[async_trait]
impl PluginInstance for AutoMod {
    async fn initialize(&self, config: &Map<String, Value>, deps: Dependencies) -> anyhow::Result<()> {
        let bridge = deps
            .connector_as::<ChatBridge>("discord")
            .ok_or_else(|| anyhow::anyhow!("discord connector is not a ChatBridge"))?;
        let level = config.get("level").and_then(|v| v.as_str()).unwrap_or("?");
        bridge.send(&format!("auto-mod online (level {})", level))?;
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn discord_definition() -> Definition {
    Definition::connector("discord", Scope::Global, ChatBridge::default)
        .display_name("Discord")
        .field(ConfigField::new("token", FieldType::String).required())
}

pub fn automod_definition(started: Arc<AtomicUsize>, allow_multiple: bool) -> Definition {
    Definition::extension("auto-mod", move || AutoMod {
        started: started.clone(),
    })
    .requires_connector("discord")
    .allow_multiple_instances(allow_multiple)
    .field(
        ConfigField::new("level", FieldType::String)
            .with_default(serde_json::json!("low"))
            .with_options(vec![
                serde_json::json!("low"),
                serde_json::json!("high"),
            ]),
    )
}

pub struct Harness {
    pub coordinator: Arc<LifecycleCoordinator>,
    pub automod_started: Arc<AtomicUsize>,
}

pub fn harness(store: Arc<dyn Store>, allow_multiple: bool) -> Harness {
    let started = Arc::new(AtomicUsize::new(0));
    let mut defs = DefinitionRegistry::new();
    defs.register_all(vec![
        discord_definition(),
        automod_definition(started.clone(), allow_multiple),
    ])
    .unwrap();

    let mut servers = vec![
        ServerMetadata::new("server-x", "minecraft-main", "minecraft"),
        ServerMetadata::new("server-y", "minecraft-creative", "minecraft"),
    ];
    servers.extend((0..8).map(|i| {
        ServerMetadata::new(&format!("server-{}", i), &format!("shard-{}", i), "minecraft")
    }));
    let services = SharedServices::new(Arc::new(StaticServerDirectory::new(servers)));
    let coordinator = LifecycleCoordinator::new(
        Arc::new(defs),
        Arc::new(InstanceRegistry::new(LifecycleTimeouts {
            initialize: Duration::from_secs(2),
            shutdown: Duration::from_secs(2),
        })),
        services,
        store,
        Arc::new(TracingAuditSink),
    );
    Harness {
        coordinator: Arc::new(coordinator),
        automod_started: started,
    }
}

pub fn obj(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}
