//! Definition Registry: 프로세스 시작 시 한 번 채우고 이후 읽기 전용으로 공유.
//!
//! `register`는 `&mut self`를 요구하므로 `Arc`로 감싼 뒤에는 변경할 수 없다.
//! 중복 등록은 런타임 에러가 아니라 시작 단계의 설정 오류다.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Definition, PluginKind, Scope};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind} type '{type_id}' is already registered")]
    Duplicate { kind: PluginKind, type_id: String },

    #[error("invalid {kind} definition '{type_id}': {reason}")]
    InvalidDefinition {
        kind: PluginKind,
        type_id: String,
        reason: String,
    },
}

#[derive(Default)]
pub struct DefinitionRegistry {
    definitions: BTreeMap<(PluginKind, String), Arc<Definition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 정의 등록. (kind, TypeID)가 이미 있으면 실패.
    pub fn register(&mut self, def: Definition) -> Result<(), RegistryError> {
        Self::check(&def)?;

        let key = (def.kind, def.type_id.clone());
        if self.definitions.contains_key(&key) {
            return Err(RegistryError::Duplicate {
                kind: def.kind,
                type_id: def.type_id.clone(),
            });
        }

        tracing::info!(
            "Registered {} definition: {} v{} ({})",
            def.kind,
            def.display_name,
            def.version,
            def.type_id
        );
        self.definitions.insert(key, Arc::new(def));
        Ok(())
    }

    /// 여러 정의를 한꺼번에 등록 (첫 실패에서 중단)
    pub fn register_all(
        &mut self,
        defs: impl IntoIterator<Item = Definition>,
    ) -> Result<(), RegistryError> {
        for def in defs {
            self.register(def)?;
        }
        Ok(())
    }

    fn check(def: &Definition) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidDefinition {
            kind: def.kind,
            type_id: def.type_id.clone(),
            reason: reason.to_string(),
        };

        if def.type_id.trim().is_empty() {
            return Err(invalid("type id must not be empty"));
        }
        match def.kind {
            PluginKind::Connector => {
                if !def.required_connector_types.is_empty()
                    || !def.optional_connector_types.is_empty()
                {
                    return Err(invalid("connectors cannot depend on other connectors"));
                }
            }
            PluginKind::Extension => {
                if def.scope != Scope::Server {
                    return Err(invalid("extensions are always server scoped"));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, kind: PluginKind, type_id: &str) -> Option<Arc<Definition>> {
        self.definitions.get(&(kind, type_id.to_string())).cloned()
    }

    /// 종류별 정의 목록 (TypeID 순)
    pub fn list(&self, kind: PluginKind) -> Vec<Arc<Definition>> {
        self.definitions
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, def)| def.clone())
            .collect()
    }

    /// 스코프 필터 적용 목록
    pub fn list_scoped(&self, kind: PluginKind, scope: Option<Scope>) -> Vec<Arc<Definition>> {
        self.list(kind)
            .into_iter()
            .filter(|def| scope.map_or(true, |s| def.scope == s))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Dependencies, PluginInstance};
    use serde_json::{Map, Value};

    struct Noop;

    #[async_trait::async_trait]
    impl PluginInstance for Noop {
        async fn initialize(&self, _config: &Map<String, Value>, _deps: Dependencies) -> anyhow::Result<()> {
            Ok(())
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut reg = DefinitionRegistry::new();
        reg.register(Definition::connector("discord", Scope::Global, || Noop))
            .unwrap();
        reg.register(Definition::extension("auto-mod", || Noop)).unwrap();

        assert!(reg.get(PluginKind::Connector, "discord").is_some());
        assert!(reg.get(PluginKind::Extension, "discord").is_none());
        assert_eq!(reg.list(PluginKind::Extension).len(), 1);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut reg = DefinitionRegistry::new();
        reg.register(Definition::connector("discord", Scope::Global, || Noop))
            .unwrap();
        let err = reg
            .register(Definition::connector("discord", Scope::Server, || Noop))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Duplicate {
                kind: PluginKind::Connector,
                type_id: "discord".to_string()
            }
        );
    }

    #[test]
    fn test_same_type_id_different_kind_allowed() {
        let mut reg = DefinitionRegistry::new();
        reg.register(Definition::connector("discord", Scope::Global, || Noop))
            .unwrap();
        assert!(reg.register(Definition::extension("discord", || Noop)).is_ok());
    }

    #[test]
    fn test_connector_cannot_require_connectors() {
        let mut reg = DefinitionRegistry::new();
        let def = Definition::connector("bridge", Scope::Global, || Noop).requires_connector("discord");
        assert!(matches!(
            reg.register(def),
            Err(RegistryError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn test_list_scoped() {
        let mut reg = DefinitionRegistry::new();
        reg.register_all(vec![
            Definition::connector("discord", Scope::Global, || Noop),
            Definition::connector("rcon-relay", Scope::Server, || Noop),
        ])
        .unwrap();

        let global = reg.list_scoped(PluginKind::Connector, Some(Scope::Global));
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].type_id, "discord");
        assert_eq!(reg.list_scoped(PluginKind::Connector, None).len(), 2);
    }
}
