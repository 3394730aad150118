//! Dependency Resolver: 익스텐션 정의와 서버 ID로 Dependencies 묶음을 조립한다.
//!
//! 해석은 전부 아니면 전무: 필수 커넥터가 하나라도 없으면 부분 묶음을 돌려주지 않는다.
//! 같은 TypeID라면 서버 스코프 커넥터가 글로벌 커넥터보다 우선한다.

use std::sync::Arc;

use crate::error::LifecycleError;
use crate::host::SharedServices;
use crate::instance::InstanceRegistry;
use crate::plugin::{ConnectorHandle, Definition, Dependencies, DependencyKind};

pub struct DependencyResolver {
    instances: Arc<InstanceRegistry>,
    services: SharedServices,
}

impl DependencyResolver {
    pub fn new(instances: Arc<InstanceRegistry>, services: SharedServices) -> Self {
        Self {
            instances,
            services,
        }
    }

    pub fn services(&self) -> &SharedServices {
        &self.services
    }

    /// 서버 스코프 우선, 없으면 글로벌. 같은 스코프 안에서는 생성 순서상 첫 번째.
    pub fn lookup_connector(&self, type_id: &str, server_id: Option<&str>) -> Option<ConnectorHandle> {
        if let Some(server_id) = server_id {
            if let Some(found) = self
                .instances
                .get_connectors_by_server_and_type(Some(server_id), type_id)
                .into_iter()
                .next()
            {
                return Some(found);
            }
        }
        self.instances
            .get_connectors_by_server_and_type(None, type_id)
            .into_iter()
            .next()
    }

    pub async fn resolve(
        &self,
        def: &Definition,
        server_id: Option<&str>,
    ) -> Result<Dependencies, LifecycleError> {
        let mut deps = Dependencies::default();

        for kind in &def.required_dependencies {
            match kind {
                DependencyKind::Database => {
                    deps.database = Some(
                        self.services
                            .database
                            .clone()
                            .ok_or(LifecycleError::MissingDependency(*kind))?,
                    );
                }
                DependencyKind::RconManager => {
                    deps.rcon = Some(
                        self.services
                            .rcon
                            .clone()
                            .ok_or(LifecycleError::MissingDependency(*kind))?,
                    );
                }
                DependencyKind::Server => {
                    let server = match server_id {
                        Some(id) => self.services.servers.get_server(id).await,
                        None => None,
                    };
                    deps.server = Some(server.ok_or(LifecycleError::MissingDependency(*kind))?);
                }
                // 커넥터 묶음은 아래에서 TypeID 목록으로 채운다
                DependencyKind::Connectors => {}
            }
        }

        for type_id in &def.required_connector_types {
            match self.lookup_connector(type_id, server_id) {
                Some(handle) => {
                    deps.connectors.insert(type_id.clone(), handle);
                }
                None => {
                    tracing::debug!(
                        "Cannot resolve '{}': required connector '{}' is not running",
                        def.type_id,
                        type_id
                    );
                    return Err(LifecycleError::MissingConnector(type_id.clone()));
                }
            }
        }

        for type_id in &def.optional_connector_types {
            if deps.connectors.contains_key(type_id) {
                continue;
            }
            if let Some(handle) = self.lookup_connector(type_id, server_id) {
                deps.connectors.insert(type_id.clone(), handle);
            }
        }

        Ok(deps)
    }
}
