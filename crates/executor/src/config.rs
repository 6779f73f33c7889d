use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// `brokkctl-exec` — per-session executor child process.
///
/// Spawned by the manager with one invocation per session; serves exactly
/// one session's job traffic for its lifetime.
#[derive(Parser, Debug, Clone)]
#[command(name = "brokkctl-exec", version)]
pub struct ExecutorArgs {
    #[arg(long, env = "BROKKCTL_EXEC_ID")]
    pub exec_id: String,

    #[arg(long, env = "BROKKCTL_LISTEN_ADDR")]
    pub listen_addr: SocketAddr,

    #[arg(long, env = "BROKKCTL_AUTH_TOKEN")]
    pub auth_token: String,

    #[arg(long, env = "BROKKCTL_WORKSPACE_DIR")]
    pub workspace_dir: PathBuf,

    #[arg(long, env = "BROKKCTL_LOG", default_value = "info")]
    pub log: String,
}
