//! Subprocess interface (spec §6, Tester-only): a per-module test runner
//! with coverage scoping, a bytecode compiler, an interpreter import
//! probe, and a global test runner. Each call owns its own environment
//! map and working directory (SPEC_FULL §9: "never share mutable env
//! across invocations"); all four point `PYTHONPATH` at the repo root.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::AgentError;

const MAX_ISSUE_CHARS: usize = 300;

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Compact stdout+stderr into a single-line issue string capped at
    /// `MAX_ISSUE_CHARS` (spec §9).
    pub fn compact_issue(&self) -> String {
        let combined = format!("{} {}", self.stdout, self.stderr);
        let single_line: String = combined.split_whitespace().collect::<Vec<_>>().join(" ");
        if single_line.chars().count() > MAX_ISSUE_CHARS {
            single_line.chars().take(MAX_ISSUE_CHARS).collect::<String>() + "..."
        } else {
            single_line
        }
    }
}

/// The subprocess surface the Tester needs. A trait so capability tests
/// can substitute a fake runner instead of spawning a real interpreter.
pub trait SubprocessRunner {
    fn run_module_tests(
        &self,
        repo_root: &Path,
        test_file: &str,
        coverage_target: &str,
    ) -> Result<RunOutput, AgentError>;

    fn byte_compile(&self, repo_root: &Path, file_key: &str) -> Result<RunOutput, AgentError>;

    fn import_module(&self, repo_root: &Path, module_name: &str) -> Result<RunOutput, AgentError>;

    fn run_global_suite(&self, repo_root: &Path) -> Result<RunOutput, AgentError>;
}

pub struct PythonSubprocessRunner {
    pub python_bin: String,
    pub timeout: Duration,
}

impl Default for PythonSubprocessRunner {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl PythonSubprocessRunner {
    /// Spawns `python_bin args...` and waits on a helper thread so a run
    /// that hangs past `self.timeout` can be killed instead of blocking
    /// the tick forever (spec §5: timeouts are optional, but once a
    /// deadline is configured it must actually be enforced).
    fn run(&self, repo_root: &Path, args: &[&str]) -> Result<RunOutput, AgentError> {
        let command_label = args.join(" ");
        let child = Command::new(&self.python_bin)
            .args(args)
            .current_dir(repo_root)
            .env("PYTHONPATH", repo_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AgentError::Subprocess {
                command: command_label.clone(),
                message: e.to_string(),
            })?;
        let pid = child.id();

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(child.wait_with_output());
        });

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(output)) => Ok(RunOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
            Ok(Err(e)) => Err(AgentError::Subprocess {
                command: command_label,
                message: e.to_string(),
            }),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                kill_pid(pid);
                Err(AgentError::Subprocess {
                    command: command_label,
                    message: format!("timed out after {:?}", self.timeout),
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(AgentError::Subprocess {
                command: command_label,
                message: "process monitoring thread terminated unexpectedly".to_string(),
            }),
        }
    }
}

/// Best-effort kill of a timed-out child. Shells out to `kill` rather
/// than an FFI binding so a missed termination (e.g. no `kill` on the
/// PATH) degrades to an orphaned process, not a build-breaking platform
/// dependency.
fn kill_pid(pid: u32) {
    let _ = Command::new("kill").arg("-9").arg(pid.to_string()).status();
}

impl SubprocessRunner for PythonSubprocessRunner {
    fn run_module_tests(
        &self,
        repo_root: &Path,
        test_file: &str,
        coverage_target: &str,
    ) -> Result<RunOutput, AgentError> {
        self.run(
            repo_root,
            &[
                "-m",
                "pytest",
                test_file,
                "-q",
                &format!("--cov={coverage_target}"),
                "--cov-report=term-missing",
            ],
        )
    }

    fn byte_compile(&self, repo_root: &Path, file_key: &str) -> Result<RunOutput, AgentError> {
        self.run(repo_root, &["-m", "py_compile", file_key])
    }

    fn import_module(&self, repo_root: &Path, module_name: &str) -> Result<RunOutput, AgentError> {
        self.run(repo_root, &["-c", &format!("import {module_name}")])
    }

    fn run_global_suite(&self, repo_root: &Path) -> Result<RunOutput, AgentError> {
        self.run(repo_root, &["-m", "pytest", "-q"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_issue_collapses_whitespace_and_caps_length() {
        let out = RunOutput {
            exit_code: 1,
            stdout: "line one\nline two\n".to_string(),
            stderr: "x".repeat(400),
        };
        let issue = out.compact_issue();
        assert!(!issue.contains('\n'));
        assert!(issue.chars().count() <= MAX_ISSUE_CHARS + 3);
    }

    #[test]
    fn success_reflects_zero_exit_code() {
        let out = RunOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(out.success());
    }

    #[test]
    fn run_kills_and_errors_a_process_past_its_deadline() {
        let runner = PythonSubprocessRunner {
            python_bin: "sleep".to_string(),
            timeout: Duration::from_millis(100),
        };
        let repo_root = std::env::temp_dir();
        let result = runner.run(&repo_root, &["5"]);
        let err = result.expect_err("should time out");
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn run_returns_output_for_a_process_within_deadline() {
        let runner = PythonSubprocessRunner {
            python_bin: "true".to_string(),
            timeout: Duration::from_secs(5),
        };
        let repo_root = std::env::temp_dir();
        let out = runner.run(&repo_root, &[]).expect("should complete");
        assert!(out.success());
    }
}
