//! Subprocess plumbing: the default shell command runner and the git
//! helpers used by the worktree guard.

pub mod git;
pub mod runner;

pub use git::{
    PushResult, WorktreeStatus, branch_remote, commit_all, create_branch, current_branch,
    has_upstream, push, push_set_upstream, remotes, stage_all, stash_all, worktree_status,
};
pub use runner::ShellCommandRunner;
