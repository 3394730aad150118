//! 데몬에 기본 등록되는 플러그인 정의

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::sync::RwLock;

use crate::plugin::{ConfigField, Definition, Dependencies, FieldType, PluginInstance, Scope};

pub const CONSOLE_TYPE_ID: &str = "console";

/// 메시지를 tracing 로그로 내보내는 글로벌 커넥터.
/// 익스텐션은 `deps.connector_as::<ConsoleConnector>("console")`로 접근한다.
#[derive(Debug, Default)]
pub struct ConsoleConnector {
    prefix: RwLock<Option<String>>,
}

impl ConsoleConnector {
    pub fn send(&self, message: &str) {
        let prefix = self.prefix.read().unwrap_or_else(|e| e.into_inner());
        match prefix.as_deref() {
            Some(p) => tracing::info!(target: "console", "{} {}", p, message),
            None => tracing::warn!("Console connector used before initialize: {}", message),
        }
    }

    pub fn prefix(&self) -> Option<String> {
        self.prefix.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl PluginInstance for ConsoleConnector {
    async fn initialize(&self, config: &Map<String, Value>, _deps: Dependencies) -> anyhow::Result<()> {
        let prefix = config
            .get("prefix")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("prefix is not set"))?;
        *self.prefix.write().unwrap_or_else(|e| e.into_inner()) = Some(prefix.to_string());
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.prefix.write().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn console_definition() -> Definition {
    Definition::connector(CONSOLE_TYPE_ID, Scope::Global, ConsoleConnector::default)
        .display_name("Console")
        .description("Writes messages to the daemon log")
        .author("saba-chan")
        .field(
            ConfigField::new("prefix", FieldType::String)
                .with_default(json!("[saba]"))
                .describe("Prefix prepended to every message"),
        )
}

/// 데몬이 시작 시 등록하는 정의 목록
pub fn definitions() -> Vec<Definition> {
    vec![console_definition()]
}
