use brokkctl_executor::{build_router, ExecutorArgs, ExecutorState};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ExecutorArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log))
        .init();

    let state = ExecutorState::new(args.exec_id.clone(), args.auth_token.clone(), args.workspace_dir.clone());
    let router = build_router(state);

    info!(exec_id = %args.exec_id, addr = %args.listen_addr, "executor listening");
    let listener = tokio::net::TcpListener::bind(args.listen_addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
