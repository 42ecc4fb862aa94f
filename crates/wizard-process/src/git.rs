//! Synchronous git helpers for the worktree guard: status probes,
//! staging, commits, pushes with upstream fallback, and stashes.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::debug;

/// The working tree as the guard sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct WorktreeStatus {
    pub clean: bool,
    /// `git status --porcelain` lines for the dirty entries.
    pub entries: Vec<String>,
    pub branch: Option<String>,
}

fn git(dir: &Path, args: &[&str]) -> Result<std::process::Output> {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("Failed to run git {}", args.join(" ")))
}

fn git_ok(dir: &Path, args: &[&str]) -> Result<String> {
    let output = git(dir, args)?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Probe the worktree. Fails when `dir` is not inside a git repository.
pub fn worktree_status(dir: &Path) -> Result<WorktreeStatus> {
    let stdout = git_ok(dir, &["status", "--porcelain"])?;
    let entries: Vec<String> = stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    Ok(WorktreeStatus {
        clean: entries.is_empty(),
        entries,
        branch: current_branch(dir).ok(),
    })
}

pub fn current_branch(dir: &Path) -> Result<String> {
    let stdout = git_ok(dir, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    Ok(stdout.trim().to_string())
}

/// Whether the current branch tracks an upstream.
pub fn has_upstream(dir: &Path) -> bool {
    git(dir, &["rev-parse", "--abbrev-ref", "@{upstream}"])
        .map(|output| output.status.success())
        .unwrap_or(false)
}

pub fn remotes(dir: &Path) -> Result<Vec<String>> {
    let stdout = git_ok(dir, &["remote"])?;
    Ok(stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// The remote configured for a branch (`branch.<name>.remote`), if any.
pub fn branch_remote(dir: &Path, branch: &str) -> Option<String> {
    let output = git(dir, &["config", &format!("branch.{branch}.remote")]).ok()?;
    if !output.status.success() {
        return None;
    }
    let remote = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!remote.is_empty()).then_some(remote)
}

pub fn create_branch(dir: &Path, name: &str) -> Result<()> {
    git_ok(dir, &["checkout", "-b", name])?;
    debug!(branch = name, "created branch");
    Ok(())
}

pub fn stage_all(dir: &Path) -> Result<()> {
    git_ok(dir, &["add", "-A"])?;
    Ok(())
}

pub fn commit_all(dir: &Path, message: &str) -> Result<()> {
    git_ok(dir, &["commit", "-m", message])?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    Pushed,
    /// `git push` failed for lack of an upstream; the caller should retry
    /// with `push_set_upstream`.
    NoUpstream,
}

pub fn push(dir: &Path) -> Result<PushResult> {
    let output = git(dir, &["push"])?;
    if output.status.success() {
        return Ok(PushResult::Pushed);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("no upstream") || stderr.contains("--set-upstream") {
        return Ok(PushResult::NoUpstream);
    }
    bail!("git push failed: {}", stderr.trim());
}

pub fn push_set_upstream(dir: &Path, remote: &str, branch: &str) -> Result<()> {
    git_ok(dir, &["push", "--set-upstream", remote, branch])?;
    Ok(())
}

/// Stash everything, untracked files included.
pub fn stash_all(dir: &Path, message: &str) -> Result<()> {
    git_ok(dir, &["stash", "push", "--include-untracked", "-m", message])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            let output = Command::new("git")
                .args(args)
                .current_dir(dir)
                .output()
                .unwrap();
            assert!(
                output.status.success(),
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr)
            );
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test"]);
    }

    #[test]
    fn test_status_outside_repo_errors() {
        let tmp = tempdir().unwrap();
        assert!(worktree_status(tmp.path()).is_err());
    }

    #[test]
    fn test_clean_and_dirty_status() {
        let tmp = tempdir().unwrap();
        init_repo(tmp.path());

        let clean = worktree_status(tmp.path()).unwrap();
        assert!(clean.clean);
        assert!(clean.entries.is_empty());

        std::fs::write(tmp.path().join("new-file.txt"), "content").unwrap();
        let dirty = worktree_status(tmp.path()).unwrap();
        assert!(!dirty.clean);
        assert_eq!(dirty.entries.len(), 1);
        assert!(dirty.entries[0].contains("new-file.txt"));
    }

    #[test]
    fn test_stage_and_commit() {
        let tmp = tempdir().unwrap();
        init_repo(tmp.path());
        std::fs::write(tmp.path().join("a.txt"), "a").unwrap();

        stage_all(tmp.path()).unwrap();
        commit_all(tmp.path(), "chore: add a").unwrap();

        let status = worktree_status(tmp.path()).unwrap();
        assert!(status.clean);
    }

    #[test]
    fn test_stash_all_includes_untracked() {
        let tmp = tempdir().unwrap();
        init_repo(tmp.path());
        // Stash needs at least one commit.
        std::fs::write(tmp.path().join("base.txt"), "base").unwrap();
        stage_all(tmp.path()).unwrap();
        commit_all(tmp.path(), "init").unwrap();

        std::fs::write(tmp.path().join("untracked.txt"), "x").unwrap();
        stash_all(tmp.path(), "wizard: stashed before run").unwrap();

        let status = worktree_status(tmp.path()).unwrap();
        assert!(status.clean);
    }

    #[test]
    fn test_create_branch_and_current_branch() {
        let tmp = tempdir().unwrap();
        init_repo(tmp.path());
        std::fs::write(tmp.path().join("base.txt"), "base").unwrap();
        stage_all(tmp.path()).unwrap();
        commit_all(tmp.path(), "init").unwrap();

        create_branch(tmp.path(), "wizard/guard-test").unwrap();
        assert_eq!(current_branch(tmp.path()).unwrap(), "wizard/guard-test");
    }

    #[test]
    fn test_no_upstream_detected() {
        let tmp = tempdir().unwrap();
        init_repo(tmp.path());
        std::fs::write(tmp.path().join("base.txt"), "base").unwrap();
        stage_all(tmp.path()).unwrap();
        commit_all(tmp.path(), "init").unwrap();
        assert!(!has_upstream(tmp.path()));
    }

    #[test]
    fn test_remotes_empty_by_default() {
        let tmp = tempdir().unwrap();
        init_repo(tmp.path());
        assert!(remotes(tmp.path()).unwrap().is_empty());
    }
}
