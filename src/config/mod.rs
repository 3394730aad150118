use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::host::ServerMetadata;
use crate::instance::LifecycleTimeouts;

const DEFAULT_CONFIG_PATH: &str = "config/plugins.toml";
const CONFIG_PATH_ENV: &str = "SABA_PLUGIN_CONFIG";

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
    pub listen_addr: String,
    pub store_path: PathBuf,
    pub lifecycle: LifecycleConfig,
    pub servers: Vec<ServerMetadata>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LifecycleConfig {
    pub initialize_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:57475".to_string(),
            store_path: PathBuf::from("./plugin_records.json"),
            lifecycle: LifecycleConfig::default(),
            servers: Vec::new(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            initialize_timeout_secs: 30,
            shutdown_timeout_secs: 10,
        }
    }
}

impl LifecycleConfig {
    pub fn timeouts(&self) -> LifecycleTimeouts {
        LifecycleTimeouts {
            initialize: Duration::from_secs(self.initialize_timeout_secs),
            shutdown: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

impl RuntimeConfig {
    /// `$SABA_PLUGIN_CONFIG` 또는 `config/plugins.toml`에서 로드
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    /// 파일이 없으면 기본값. 파싱 실패는 에러.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!("Config file not found, using defaults: {}", path.display());
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&s)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        Ok(cfg)
    }

    pub fn get_server(&self, id: &str) -> Option<&ServerMetadata> {
        self.servers.iter().find(|s| s.id == id)
    }
}
