//! Verification pass.
//!
//! Runs each declared version query independently and records the outcome
//! as data. A tool that is missing or exits non-zero produces a failed
//! [`CheckResult`]; nothing here aborts the caller.
//!
//! # Example
//!
//! ```rust
//! use toolchain_provisioner::runner::SystemRunner;
//! use toolchain_provisioner::verify::{run_checks, VersionCheck};
//! use toolchain_provisioner::ToolchainEnv;
//!
//! let checks = vec![
//!     VersionCheck::new("Shell", ["sh", "-c", "echo sh 1.0"]),
//!     VersionCheck::new("Nope", ["definitely_not_a_real_command_12345", "--version"]),
//! ];
//! let report = run_checks(&checks, &ToolchainEnv::new(), &SystemRunner::default());
//! assert_eq!(report.passed().count(), 1);
//! assert!(report.render().contains("Nope check failed"));
//! ```

pub mod invariants;

use crate::environment::ToolchainEnv;
use crate::runner::{CommandRunner, Invocation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One version query: a display name and the argv to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionCheck {
    pub tool: String,
    pub command: Vec<String>,
}

impl VersionCheck {
    pub fn new(tool: impl Into<String>, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tool: tool.into(),
            command: command.into_iter().map(Into::into).collect(),
        }
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckStatus {
    /// First line of the tool's version output.
    Passed { version: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub tool: String,
    #[serde(flatten)]
    pub status: CheckStatus,
}

impl CheckResult {
    pub fn passed(tool: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            status: CheckStatus::Passed {
                version: version.into(),
            },
        }
    }

    pub fn failed(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            status: CheckStatus::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self.status, CheckStatus::Passed { .. })
    }

    pub fn version(&self) -> Option<&str> {
        match &self.status {
            CheckStatus::Passed { version } => Some(version),
            CheckStatus::Failed { .. } => None,
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            CheckStatus::Passed { version } => write!(f, "{}: {}", self.tool, version),
            CheckStatus::Failed { reason } => write!(f, "{} check failed ({})", self.tool, reason),
        }
    }
}

/// Aggregated verification results, in check order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub results: Vec<CheckResult>,
}

impl VerificationReport {
    pub fn push(&mut self, result: CheckResult) {
        self.results.push(result);
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = CheckResult>) {
        self.results.extend(results);
    }

    pub fn passed(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| r.is_passed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| !r.is_passed())
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(CheckResult::is_passed)
    }

    pub fn get(&self, tool: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.tool == tool)
    }

    /// Version line per passing tool.
    pub fn versions(&self) -> BTreeMap<String, String> {
        self.results
            .iter()
            .filter_map(|r| r.version().map(|v| (r.tool.clone(), v.to_string())))
            .collect()
    }

    /// One status line per check plus a summary line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for result in &self.results {
            out.push_str(&result.to_string());
            out.push('\n');
        }
        out.push_str(&format!(
            "{}/{} checks passed\n",
            self.passed().count(),
            self.results.len()
        ));
        out
    }
}

/// Run every check with the toolchain environment applied.
///
/// Never fails: each check is independent and its failure is recorded.
pub fn run_checks(
    checks: &[VersionCheck],
    env: &ToolchainEnv,
    runner: &dyn CommandRunner,
) -> VerificationReport {
    let mut report = VerificationReport::default();
    for check in checks {
        report.push(run_check(check, env, runner));
    }
    report
}

pub fn run_check(check: &VersionCheck, env: &ToolchainEnv, runner: &dyn CommandRunner) -> CheckResult {
    let Some(invocation) = Invocation::from_argv(&check.command) else {
        return CheckResult::failed(&check.tool, "no command declared");
    };
    let mut invocation = invocation.captured();
    env.apply(&mut invocation);

    match runner.run(&invocation) {
        Ok(output) if output.success() => {
            let version = first_line(&output.stdout)
                .or_else(|| first_line(&output.stderr))
                .unwrap_or("(no version output)");
            CheckResult::passed(&check.tool, version)
        }
        Ok(output) => {
            let detail = first_line(&output.stderr)
                .map(|line| format!(": {line}"))
                .unwrap_or_default();
            let code = output
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            CheckResult::failed(&check.tool, format!("exit {code}{detail}"))
        }
        Err(e) => CheckResult::failed(&check.tool, format!("{}: {e}", invocation.program)),
    }
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::FakeRunner;
    use crate::runner::CommandOutput;

    fn checks() -> Vec<VersionCheck> {
        vec![
            VersionCheck::new("Git", ["git", "--version"]),
            VersionCheck::new("West", ["west", "--version"]),
            VersionCheck::new("Python", ["python3", "--version"]),
        ]
    }

    #[test]
    fn missing_tool_is_reported_not_propagated() {
        let runner = FakeRunner::new()
            .answer("git", CommandOutput::ok("git version 2.34.1\n"))
            .answer("python3", CommandOutput::ok("Python 3.10.12\n"))
            .missing("west");

        let report = run_checks(&checks(), &ToolchainEnv::new(), &runner);

        assert_eq!(report.results.len(), 3);
        assert!(!report.all_passed());
        assert_eq!(report.get("Git").unwrap().version(), Some("git version 2.34.1"));
        assert!(!report.get("West").unwrap().is_passed());
        assert!(report.render().contains("West check failed"));
        assert!(report.render().ends_with("2/3 checks passed\n"));
    }

    #[test]
    fn nonzero_exit_fails_check() {
        let runner = FakeRunner::new().answer("git", CommandOutput::failed(127, "bad\n"));

        let result = run_check(&checks()[0], &ToolchainEnv::new(), &runner);

        assert_eq!(result.to_string(), "Git check failed (exit 127: bad)");
    }

    #[test]
    fn version_may_come_from_stderr() {
        let runner = FakeRunner::new().answer(
            "python3",
            CommandOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: "Python 2.7.18\n".into(),
            },
        );

        let result = run_check(&checks()[2], &ToolchainEnv::new(), &runner);

        assert_eq!(result.version(), Some("Python 2.7.18"));
    }

    #[test]
    fn checks_run_with_toolchain_env() {
        let runner = FakeRunner::new();
        let env = ToolchainEnv::new().with_path_prefix("/opt/tc/bin");

        run_checks(&checks(), &env, &runner);

        let calls = runner.calls.borrow();
        assert!(calls.iter().all(|c| c.capture));
        assert!(calls
            .iter()
            .all(|c| c.env.get("PATH").is_some_and(|p| p.starts_with("/opt/tc/bin"))));
    }

    #[test]
    fn empty_command_fails_check() {
        let check = VersionCheck::new("Nothing", Vec::<String>::new());
        let result = run_check(&check, &ToolchainEnv::new(), &FakeRunner::new());
        assert!(!result.is_passed());
    }

    #[test]
    fn versions_only_include_passing_tools() {
        let mut report = VerificationReport::default();
        report.push(CheckResult::passed("CMake", "cmake version 3.27.9"));
        report.push(CheckResult::failed("Ruby", "missing"));

        let versions = report.versions();

        assert_eq!(versions.len(), 1);
        assert_eq!(versions["CMake"], "cmake version 3.27.9");
    }
}
