//! VCS interface (spec §6, Validator-only): `add`, `diff_index`, `commit`,
//! `checkout`. No other git semantics are required. Shells out to the
//! `git` CLI via `std::process::Command`, matching the teacher's own
//! `harness/git_manager.rs` — no example repo in the retrieval pack pulls
//! in `git2`.

use std::path::PathBuf;
use std::process::Command;

use crate::error::AgentError;

/// Minimal git surface the Validator needs to commit or revert a single
/// file. A trait so tests can substitute a no-op/fake implementation.
pub trait Vcs {
    fn add(&self, file_key: &str) -> Result<(), AgentError>;
    fn diff_index(&self, rev: &str) -> Result<bool, AgentError>;
    fn commit(&self, message: &str) -> Result<(), AgentError>;
    fn checkout(&self, rev: &str, file_key: &str) -> Result<(), AgentError>;
}

pub struct GitVcs {
    repo_root: PathBuf,
}

impl GitVcs {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<std::process::Output, AgentError> {
        Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .map_err(|e| AgentError::Vcs {
                operation: args.join(" "),
                message: e.to_string(),
            })
    }
}

impl Vcs for GitVcs {
    fn add(&self, file_key: &str) -> Result<(), AgentError> {
        let output = self.run(&["add", "--", file_key])?;
        if !output.status.success() {
            return Err(AgentError::Vcs {
                operation: "add".to_string(),
                message: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }

    /// True when `git diff-index --quiet <rev>` reports a difference
    /// (nonzero exit), i.e. there is something staged to commit.
    fn diff_index(&self, rev: &str) -> Result<bool, AgentError> {
        let output = self.run(&["diff-index", "--quiet", rev, "--"])?;
        Ok(!output.status.success())
    }

    fn commit(&self, message: &str) -> Result<(), AgentError> {
        let output = self.run(&["commit", "-m", message])?;
        if !output.status.success() {
            return Err(AgentError::Vcs {
                operation: "commit".to_string(),
                message: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }

    fn checkout(&self, rev: &str, file_key: &str) -> Result<(), AgentError> {
        let output = self.run(&["checkout", rev, "--", file_key])?;
        if !output.status.success() {
            return Err(AgentError::Vcs {
                operation: "checkout".to_string(),
                message: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }
}

/// No-op VCS used under `--dry-run` (spec §4.5.4: "suppresses VCS side
/// effects but still emits traces").
pub struct NullVcs;

impl Vcs for NullVcs {
    fn add(&self, _file_key: &str) -> Result<(), AgentError> {
        Ok(())
    }
    fn diff_index(&self, _rev: &str) -> Result<bool, AgentError> {
        Ok(true)
    }
    fn commit(&self, _message: &str) -> Result<(), AgentError> {
        Ok(())
    }
    fn checkout(&self, _rev: &str, _file_key: &str) -> Result<(), AgentError> {
        Ok(())
    }
}

pub fn commit_message(file_key: &str, confidence: f64) -> String {
    format!("swarm: migrate {file_key} (confidence {confidence:.2})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_message_contains_file_and_confidence() {
        let msg = commit_message("pkg/a.py", 0.93);
        assert!(msg.contains("pkg/a.py"));
        assert!(msg.contains("0.93"));
    }

    #[test]
    fn null_vcs_is_a_no_op() {
        let vcs = NullVcs;
        assert!(vcs.add("a.py").is_ok());
        assert!(vcs.commit("msg").is_ok());
        assert!(vcs.checkout("HEAD", "a.py").is_ok());
    }
}
