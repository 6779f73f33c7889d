//! Per-session Git worktree provisioning.
//!
//! Every session gets an isolated working tree rooted at a host Git
//! repository, checked out under `{base_dir}/{session_id}` on a branch named
//! `brokkctl/{session_id}`. Creation is idempotent by session id: a directory
//! already on disk is adopted (crash recovery) rather than recreated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to open repository at {path}: {source}")]
    OpenRepo {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },
    #[error("failed to resolve ref {ref_}: {source}")]
    ResolveRef {
        ref_: String,
        #[source]
        source: git2::Error,
    },
    #[error("repository has no HEAD: {0}")]
    NoHead(git2::Error),
    #[error("failed to create branch {branch}: {source}")]
    CreateBranch {
        branch: String,
        #[source]
        source: git2::Error,
    },
    #[error("failed to add worktree at {path}: {source}")]
    AddWorktree {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("blocking task panicked: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

/// A provisioned worktree's bookkeeping.
#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    pub session_id: String,
    pub path: PathBuf,
    pub branch: String,
    pub repo_path: PathBuf,
}

/// Owns creation and teardown of per-session worktrees.
pub struct WorktreeProvisioner {
    base_dir: PathBuf,
    worktrees: RwLock<HashMap<String, WorktreeInfo>>,
}

pub type SharedWorktreeProvisioner = Arc<WorktreeProvisioner>;

impl WorktreeProvisioner {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            worktrees: RwLock::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Idempotent by session id. Adopts an on-disk directory left over from
    /// a crashed process instead of re-running `git worktree add`.
    pub async fn provision(
        &self,
        session_id: &str,
        repo_path: &Path,
        git_ref: Option<&str>,
    ) -> Result<PathBuf, ProvisionError> {
        if let Some(existing) = self.worktrees.read().await.get(session_id) {
            return Ok(existing.path.clone());
        }

        let wt_path = self.base_dir.join(session_id);
        tokio::fs::create_dir_all(&self.base_dir).await?;

        let branch = format!("brokkctl/{session_id}");

        if wt_path.exists() {
            info!(session_id, path = %wt_path.display(), "adopting existing worktree directory");
        } else {
            let repo_path_owned = repo_path.to_path_buf();
            let branch_owned = branch.clone();
            let wt_path_owned = wt_path.clone();
            let git_ref_owned = git_ref.map(str::to_string);
            tokio::task::spawn_blocking(move || {
                create_worktree_blocking(&repo_path_owned, &branch_owned, git_ref_owned.as_deref(), &wt_path_owned)
            })
            .await??;
            info!(session_id, branch = %branch, "worktree created");
        }

        let info = WorktreeInfo {
            session_id: session_id.to_string(),
            path: wt_path.clone(),
            branch,
            repo_path: repo_path.to_path_buf(),
        };
        self.worktrees.write().await.insert(session_id.to_string(), info);
        Ok(wt_path)
    }

    /// Idempotent: tearing down an unknown or already-removed session
    /// succeeds silently. Best-effort cleanup failures are logged, not
    /// propagated.
    pub async fn teardown(&self, session_id: &str) {
        let info = self.worktrees.write().await.remove(session_id);
        let (repo_path, wt_path) = match info {
            Some(i) => (i.repo_path, i.path),
            None => (PathBuf::new(), self.base_dir.join(session_id)),
        };

        if !wt_path.exists() {
            return;
        }

        let repo_path_owned = repo_path.clone();
        let wt_path_owned = wt_path.clone();
        let result = tokio::task::spawn_blocking(move || remove_worktree_blocking(&repo_path_owned, &wt_path_owned)).await;

        let needs_manual_cleanup = match result {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                warn!(session_id, err = %e, "git worktree removal failed — cleaning directory manually");
                true
            }
            Err(e) => {
                warn!(session_id, err = %e, "worktree removal task panicked — cleaning directory manually");
                true
            }
        };

        if needs_manual_cleanup && wt_path.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&wt_path).await {
                warn!(session_id, err = %e, "manual worktree directory cleanup failed");
            }
        }

        debug!(session_id, "worktree torn down");
    }

    /// True iff the base directory exists, is a directory, and is writable.
    pub async fn healthcheck(&self) -> bool {
        let base = self.base_dir.clone();
        if tokio::fs::create_dir_all(&base).await.is_err() {
            return false;
        }
        let meta = match tokio::fs::metadata(&base).await {
            Ok(m) => m,
            Err(_) => return false,
        };
        if !meta.is_dir() {
            return false;
        }
        let probe = base.join(format!(".healthcheck-{}", uuid_like()));
        match tokio::fs::write(&probe, b"").await {
            Ok(()) => {
                let _ = tokio::fs::remove_file(&probe).await;
                true
            }
            Err(_) => false,
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<WorktreeInfo> {
        self.worktrees.read().await.get(session_id).cloned()
    }
}

/// Cheap non-cryptographic suffix for probe-file names; avoids pulling in
/// `uuid` for a detail this local.
fn uuid_like() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

// ─── Blocking git2 helpers ──────────────────────────────────────────────────

fn create_worktree_blocking(
    repo_path: &Path,
    branch_name: &str,
    git_ref: Option<&str>,
    wt_path: &Path,
) -> Result<(), ProvisionError> {
    let repo = git2::Repository::open(repo_path).map_err(|source| ProvisionError::OpenRepo {
        path: repo_path.to_path_buf(),
        source,
    })?;

    let target_commit = match git_ref {
        Some(r) => repo
            .revparse_single(r)
            .and_then(|obj| obj.peel_to_commit())
            .map_err(|source| ProvisionError::ResolveRef {
                ref_: r.to_string(),
                source,
            })?,
        None => repo
            .head()
            .map_err(ProvisionError::NoHead)?
            .peel_to_commit()
            .map_err(ProvisionError::NoHead)?,
    };

    let branch = match repo.branch(branch_name, &target_commit, false) {
        Ok(b) => b,
        Err(e) if e.code() == git2::ErrorCode::Exists => repo
            .find_branch(branch_name, git2::BranchType::Local)
            .map_err(|source| ProvisionError::CreateBranch {
                branch: branch_name.to_string(),
                source,
            })?,
        Err(source) => {
            return Err(ProvisionError::CreateBranch {
                branch: branch_name.to_string(),
                source,
            })
        }
    };

    let mut wt_opts = git2::WorktreeAddOptions::new();
    let branch_ref = branch.get();
    wt_opts.reference(Some(branch_ref));
    let wt_name = branch_name.replace('/', "--");
    repo.worktree(&wt_name, wt_path, Some(&wt_opts))
        .map_err(|source| ProvisionError::AddWorktree {
            path: wt_path.to_path_buf(),
            source,
        })?;

    Ok(())
}

fn remove_worktree_blocking(repo_path: &Path, wt_path: &Path) -> Result<(), ProvisionError> {
    if repo_path.as_os_str().is_empty() {
        if wt_path.exists() {
            std::fs::remove_dir_all(wt_path)?;
        }
        return Ok(());
    }

    let repo = git2::Repository::open(repo_path).map_err(|source| ProvisionError::OpenRepo {
        path: repo_path.to_path_buf(),
        source,
    })?;

    let names = repo
        .worktrees()
        .map_err(|source| ProvisionError::OpenRepo { path: repo_path.to_path_buf(), source })?;
    for name in names.iter().flatten() {
        if let Ok(wt) = repo.find_worktree(name) {
            if wt.path() == wt_path {
                let _ = wt.prune(None);
                if wt_path.exists() {
                    std::fs::remove_dir_all(wt_path)?;
                }
                return Ok(());
            }
        }
    }

    if wt_path.exists() {
        std::fs::remove_dir_all(wt_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_repo(dir: &Path) {
        let repo = git2::Repository::init(dir).unwrap();
        let sig = git2::Signature::now("Test", "test@example.com").unwrap();
        let tree_id = {
            let blob = repo.blob(b"initial").unwrap();
            let mut tb = repo.treebuilder(None).unwrap();
            tb.insert("README", blob, 0o100644).unwrap();
            tb.write().unwrap()
        };
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
    }

    #[tokio::test]
    async fn provision_creates_isolated_directory() {
        let tmp = TempDir::new().unwrap();
        let repo_dir = tmp.path().join("repo");
        std::fs::create_dir_all(&repo_dir).unwrap();
        init_repo(&repo_dir);

        let provisioner = WorktreeProvisioner::new(tmp.path().join("worktrees"));
        let path = provisioner.provision("sess-1", &repo_dir, None).await.unwrap();
        assert!(path.exists());
        assert_eq!(path, tmp.path().join("worktrees").join("sess-1"));
    }

    #[tokio::test]
    async fn provision_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let repo_dir = tmp.path().join("repo");
        std::fs::create_dir_all(&repo_dir).unwrap();
        init_repo(&repo_dir);

        let provisioner = WorktreeProvisioner::new(tmp.path().join("worktrees"));
        let p1 = provisioner.provision("sess-1", &repo_dir, None).await.unwrap();
        let p2 = provisioner.provision("sess-1", &repo_dir, None).await.unwrap();
        assert_eq!(p1, p2);
    }

    #[tokio::test]
    async fn teardown_removes_all_traces() {
        let tmp = TempDir::new().unwrap();
        let repo_dir = tmp.path().join("repo");
        std::fs::create_dir_all(&repo_dir).unwrap();
        init_repo(&repo_dir);

        let provisioner = WorktreeProvisioner::new(tmp.path().join("worktrees"));
        let path = provisioner.provision("sess-1", &repo_dir, None).await.unwrap();
        assert!(path.exists());

        provisioner.teardown("sess-1").await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn teardown_of_unknown_session_is_silent_success() {
        let tmp = TempDir::new().unwrap();
        let provisioner = WorktreeProvisioner::new(tmp.path().join("worktrees"));
        provisioner.teardown("never-existed").await;
    }

    #[tokio::test]
    async fn healthcheck_true_for_writable_base_dir() {
        let tmp = TempDir::new().unwrap();
        let provisioner = WorktreeProvisioner::new(tmp.path().join("worktrees"));
        assert!(provisioner.healthcheck().await);
    }
}
