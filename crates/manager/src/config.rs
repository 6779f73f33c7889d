use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// `brokkctld` — the session manager control plane.
///
/// Owns the executor pool and fronts it with the authenticated HTTP surface
/// clients talk to.
#[derive(Parser, Debug, Clone)]
#[command(name = "brokkctld", version)]
pub struct ManagerArgs {
    #[arg(long, env = "BROKKCTL_MANAGER_ID")]
    pub manager_id: String,

    #[arg(long, env = "BROKKCTL_LISTEN_ADDR", default_value = "127.0.0.1:7420")]
    pub listen_addr: SocketAddr,

    /// Bearer secret for operator-facing requests; also used as the HMAC key
    /// for minted session tokens.
    #[arg(long, env = "BROKKCTL_AUTH_TOKEN")]
    pub auth_token: String,

    #[arg(long, env = "BROKKCTL_POOL_SIZE", default_value_t = 4)]
    pub pool_size: usize,

    #[arg(long, env = "BROKKCTL_WORKTREE_BASE_DIR")]
    pub worktree_base_dir: PathBuf,

    /// Path to the `brokkctl-exec` binary to spawn per session.
    #[arg(long, env = "BROKKCTL_EXECUTOR_PATH")]
    pub executor_path: PathBuf,

    #[arg(long, env = "BROKKCTL_IDLE_TIMEOUT_SECS", default_value_t = 1800)]
    pub idle_timeout_secs: u64,

    #[arg(long, env = "BROKKCTL_EVICTION_INTERVAL_SECS", default_value_t = 60)]
    pub eviction_interval_secs: u64,

    /// Directory a heartbeat file is written to for other instances/tooling
    /// to discover this manager. Disabled when unset.
    #[arg(long, env = "BROKKCTL_INSTANCES_DIR")]
    pub instances_dir: Option<PathBuf>,

    #[arg(long, env = "BROKKCTL_LOG", default_value = "info")]
    pub log: String,
}
