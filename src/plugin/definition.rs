//! 플러그인 타입 정의: 메타데이터, 설정 스키마, 의존성 선언, 생성자

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::PluginInstance;

/// 플러그인 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Connector,
    Extension,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::Connector => write!(f, "connector"),
            PluginKind::Extension => write!(f, "extension"),
        }
    }
}

/// 커넥터 스코프. 익스텐션은 항상 `Server`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Global,
    Server,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Server => write!(f, "server"),
        }
    }
}

/// 익스텐션이 요구할 수 있는 공유 의존성 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Database,
    Server,
    RconManager,
    Connectors,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKind::Database => write!(f, "database"),
            DependencyKind::Server => write!(f, "server"),
            DependencyKind::RconManager => write!(f, "rcon_manager"),
            DependencyKind::Connectors => write!(f, "connectors"),
        }
    }
}

/// 설정 필드 타입. 값은 절대 변환(coerce)하지 않는다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
        };
        write!(f, "{}", s)
    }
}

/// 설정 스키마의 단일 필드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// 비어있지 않으면 값은 이 목록 중 하나여야 함
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Value>,
    /// `object` 타입의 하위 필드
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<ConfigField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ConfigField {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
            default: None,
            options: Vec::new(),
            fields: Vec::new(),
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_options(mut self, options: Vec<Value>) -> Self {
        self.options = options;
        self
    }

    pub fn with_fields(mut self, fields: Vec<ConfigField>) -> Self {
        self.fields = fields;
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// 인스턴스 생성자. 호출할 때마다 초기화되지 않은 새 인스턴스를 만든다.
pub type InstanceFactory = Arc<dyn Fn() -> Arc<dyn PluginInstance> + Send + Sync>;

/// 플러그인 타입 정의: 시작 시 한 번 등록되고 이후 불변
#[derive(Clone, Serialize)]
pub struct Definition {
    pub kind: PluginKind,
    pub type_id: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub scope: Scope,
    /// 익스텐션 전용. false면 (server, type) 당 레코드 하나
    pub allow_multiple_instances: bool,
    pub config_schema: Vec<ConfigField>,
    pub required_connector_types: Vec<String>,
    pub optional_connector_types: Vec<String>,
    pub required_dependencies: Vec<DependencyKind>,
    #[serde(skip)]
    factory: InstanceFactory,
}

impl Definition {
    /// 커넥터 정의 생성
    pub fn connector<F, P>(type_id: &str, scope: Scope, factory: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: PluginInstance,
    {
        Self::base(PluginKind::Connector, type_id, scope, factory)
    }

    /// 익스텐션 정의 생성 (항상 서버 스코프)
    pub fn extension<F, P>(type_id: &str, factory: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: PluginInstance,
    {
        Self::base(PluginKind::Extension, type_id, Scope::Server, factory)
    }

    fn base<F, P>(kind: PluginKind, type_id: &str, scope: Scope, factory: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: PluginInstance,
    {
        Self {
            kind,
            type_id: type_id.to_string(),
            display_name: type_id.to_string(),
            description: String::new(),
            version: "0.1.0".to_string(),
            author: String::new(),
            scope,
            allow_multiple_instances: false,
            config_schema: Vec::new(),
            required_connector_types: Vec::new(),
            optional_connector_types: Vec::new(),
            required_dependencies: Vec::new(),
            factory: Arc::new(move || Arc::new(factory()) as Arc<dyn PluginInstance>),
        }
    }

    pub fn display_name(mut self, name: &str) -> Self {
        self.display_name = name.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn author(mut self, author: &str) -> Self {
        self.author = author.to_string();
        self
    }

    pub fn allow_multiple_instances(mut self, allow: bool) -> Self {
        self.allow_multiple_instances = allow;
        self
    }

    pub fn field(mut self, field: ConfigField) -> Self {
        self.config_schema.push(field);
        self
    }

    pub fn requires_connector(mut self, type_id: &str) -> Self {
        self.required_connector_types.push(type_id.to_string());
        self
    }

    pub fn optional_connector(mut self, type_id: &str) -> Self {
        self.optional_connector_types.push(type_id.to_string());
        self
    }

    pub fn requires(mut self, kind: DependencyKind) -> Self {
        if !self.required_dependencies.contains(&kind) {
            self.required_dependencies.push(kind);
        }
        self
    }

    /// 새 인스턴스 생성 (초기화는 호출자 책임)
    pub fn instantiate(&self) -> Arc<dyn PluginInstance> {
        (self.factory)()
    }

    /// 이 정의가 참조하는 모든 커넥터 TypeID (required + optional, 중복 제거, 정렬)
    pub fn connector_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .required_connector_types
            .iter()
            .chain(self.optional_connector_types.iter())
            .cloned()
            .collect();
        types.sort();
        types.dedup();
        types
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("kind", &self.kind)
            .field("type_id", &self.type_id)
            .field("scope", &self.scope)
            .field("version", &self.version)
            .field("allow_multiple_instances", &self.allow_multiple_instances)
            .field("required_connector_types", &self.required_connector_types)
            .field("optional_connector_types", &self.optional_connector_types)
            .field("required_dependencies", &self.required_dependencies)
            .finish_non_exhaustive()
    }
}
