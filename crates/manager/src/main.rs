use std::sync::Arc;
use std::time::Duration;

use brokkctl_common::TokenService;
use brokkctl_manager::{build_router, pool::ExecutorPool, registry::InstanceRegistry, state::ManagerState, ManagerArgs};
use brokkctl_worktree::WorktreeProvisioner;
use clap::Parser;
use tokio::sync::RwLock;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ManagerArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log))
        .init();

    let token_service = TokenService::new(args.auth_token.clone())?;
    let provisioner = Arc::new(WorktreeProvisioner::new(args.worktree_base_dir.clone()));
    let pool = ExecutorPool::new(provisioner.clone(), args.executor_path.clone(), args.pool_size);
    let registry = InstanceRegistry::new(args.instances_dir.clone(), args.manager_id.clone(), args.listen_addr);

    let state = Arc::new(ManagerState {
        manager_id: args.manager_id.clone(),
        master_token: args.auth_token.clone(),
        token_service,
        pool: pool.clone(),
        provisioner,
        registry,
        sessions: RwLock::new(std::collections::HashMap::new()),
        session_idempotency: RwLock::new(std::collections::HashMap::new()),
        started_at: std::time::Instant::now(),
    });

    spawn_idle_eviction(state.clone(), Duration::from_secs(args.idle_timeout_secs), Duration::from_secs(args.eviction_interval_secs));
    spawn_heartbeat(state.clone());

    let router = build_router(state.clone());

    info!(manager_id = %args.manager_id, addr = %args.listen_addr, pool_size = args.pool_size, "manager listening");
    let listener = tokio::net::TcpListener::bind(args.listen_addr).await?;

    let shutdown_state = state.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received — tearing down executor pool");
            shutdown_state.pool.shutdown_all().await;
            shutdown_state.registry.remove().await;
        })
        .await?;

    Ok(())
}

fn spawn_idle_eviction(state: Arc<ManagerState>, idle_timeout: Duration, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            state.pool.evict_idle(idle_timeout).await;
        }
    });
}

fn spawn_heartbeat(state: Arc<ManagerState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(InstanceRegistry::heartbeat_interval());
        loop {
            ticker.tick().await;
            let size = state.pool.size().await;
            state.registry.heartbeat(size).await;
        }
    });
}
