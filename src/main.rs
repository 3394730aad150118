use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use saba_plugins::builtin;
use saba_plugins::config::RuntimeConfig;
use saba_plugins::host::{SharedServices, StaticServerDirectory, TracingAuditSink};
use saba_plugins::instance::InstanceRegistry;
use saba_plugins::ipc::IPCServer;
use saba_plugins::plugin::DefinitionRegistry;
use saba_plugins::store::JsonFileStore;
use saba_plugins::LifecycleCoordinator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("Plugin daemon starting");

    let cfg = RuntimeConfig::load()?;

    // 정의 등록은 시작 시 한 번. 중복은 설정 오류로 즉시 종료.
    let mut definitions = DefinitionRegistry::new();
    definitions.register_all(builtin::definitions())?;
    tracing::info!("{} plugin definition(s) registered", definitions.len());

    let store = JsonFileStore::open(&cfg.store_path).await?;
    let servers = StaticServerDirectory::new(cfg.servers.clone());
    tracing::info!("{} server(s) in directory", servers.len());

    let coordinator = Arc::new(LifecycleCoordinator::new(
        Arc::new(definitions),
        Arc::new(InstanceRegistry::new(cfg.lifecycle.timeouts())),
        SharedServices::new(Arc::new(servers)),
        Arc::new(store),
        Arc::new(TracingAuditSink),
    ));

    let shutdown = CancellationToken::new();
    let report = coordinator.restore_enabled(&shutdown.child_token()).await?;
    for (id, reason) in &report.disabled {
        tracing::warn!("Record '{}' disabled during restore: {}", id, reason);
    }

    // Graceful shutdown: Ctrl+C 시 진행 중인 요청 취소 후 IPC 종료
    let signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received, cleaning up...");
        signal.cancel();
    });

    let ipc_server = IPCServer::new(coordinator.clone(), &cfg.listen_addr, shutdown);
    if let Err(e) = ipc_server.start().await {
        tracing::error!("IPC server error: {}", e);
    }

    // 취소되지 않은 토큰으로 종료해야 shutdown이 실제로 호출된다
    coordinator.shutdown_all(&CancellationToken::new()).await;
    tracing::info!("Plugin daemon shutting down");
    Ok(())
}
