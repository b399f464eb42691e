//! Provisioning sequencer.
//!
//! Runs steps strictly one after another in the order given, stops at the
//! first failure, and threads the accumulated [`ToolchainEnv`] through every
//! step. Arranging steps (for example by phase) is the caller's job; see
//! [`crate::step::StepOrder`].

use crate::environment::ToolchainEnv;
use crate::error::{ProvisioningError, Result};
use crate::executor::execute_step;
use crate::runner::CommandRunner;
use crate::step::Step;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Result of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionOutcome {
    /// Names of the steps applied, in execution order.
    pub applied: Vec<String>,
    /// Final environment record produced by all exports.
    pub env: ToolchainEnv,
}

/// Applies an ordered list of steps through a [`CommandRunner`].
pub struct Provisioner<R> {
    runner: R,
    base_env: ToolchainEnv,
    check_existing_paths: bool,
}

impl<R: CommandRunner> Provisioner<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            base_env: ToolchainEnv::new(),
            check_existing_paths: true,
        }
    }

    /// Start from an existing environment record instead of an empty one.
    pub fn with_base_env(mut self, env: ToolchainEnv) -> Self {
        self.base_env = env;
        self
    }

    /// Only accept paths provided by earlier steps during ordering
    /// validation, ignoring what already exists on disk. Used for dry runs
    /// and plans, where nothing is created.
    pub fn declared_paths_only(mut self) -> Self {
        self.check_existing_paths = false;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Apply every step in the order given. The order is validated first
    /// and never rewritten; the first failing step aborts the run.
    pub fn run<'a>(&self, steps: impl IntoIterator<Item = &'a Step>) -> Result<ProvisionOutcome> {
        let plan: Vec<&Step> = steps.into_iter().collect();
        validate_order(&plan, self.check_existing_paths)?;

        let total = plan.len();
        let mut env = self.base_env.clone();
        let mut applied = Vec::with_capacity(total);

        for (index, step) in plan.into_iter().enumerate() {
            println!(
                "[provision] ({}/{}) {} [{}]",
                index + 1,
                total,
                step.name(),
                step.phase()
            );
            let outcome = execute_step(step, &env, &self.runner).inspect_err(|e| {
                eprintln!("[provision] aborted at step '{}': {e}", step.name());
            })?;
            env = env.merged(&outcome.env);
            applied.push(step.name().to_string());
        }

        println!("[provision] {} step(s) applied", applied.len());
        Ok(ProvisionOutcome { applied, env })
    }
}

/// Check that every path a step requires is provided by an earlier step
/// (or, when `accept_existing`, already exists).
///
/// A required path is satisfied by an earlier provided path that equals it
/// or contains it. Search-path entries must be joinable into PATH.
pub fn validate_order(plan: &[&Step], accept_existing: bool) -> Result<()> {
    let mut names = BTreeSet::new();
    let mut provided: Vec<PathBuf> = Vec::new();

    for step in plan {
        if step.name().trim().is_empty() {
            return Err(ProvisioningError::InvalidStep {
                step: String::new(),
                message: "step name must not be empty".to_string(),
            });
        }
        if !names.insert(step.name()) {
            return Err(ProvisioningError::InvalidStep {
                step: step.name().to_string(),
                message: "duplicate step name".to_string(),
            });
        }

        if let Step::EnvironmentExport { path_prefix, .. } = step {
            if let Some(bad) = path_prefix
                .iter()
                .find(|dir| std::env::join_paths([dir]).is_err())
            {
                return Err(ProvisioningError::InvalidStep {
                    step: step.name().to_string(),
                    message: format!(
                        "search-path entry '{}' contains a path separator",
                        bad.display()
                    ),
                });
            }
        }

        for required in step.requires() {
            let satisfied = is_provided(&provided, required)
                || (accept_existing && required.exists());
            if !satisfied {
                return Err(ProvisioningError::Ordering {
                    step: step.name().to_string(),
                    path: required.to_path_buf(),
                });
            }
        }
        provided.extend(step.provides().into_iter().map(Path::to_path_buf));
    }
    Ok(())
}

fn is_provided(provided: &[PathBuf], required: &Path) -> bool {
    provided.iter().any(|p| required.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::FakeRunner;
    use crate::runner::CommandOutput;
    use crate::step::{self, ordered, PackageManager};
    use tempfile::TempDir;

    fn steps(root: &Path) -> Vec<Step> {
        let tc = root.join("toolchains/gcc-arm-none-eabi");
        vec![
            step::export(
                "toolchain-env",
                [tc.join("bin")],
                [("ARMGCC_DIR", tc.display().to_string())],
            ),
            step::directory("workspace", root.join("workspace")),
            step::packages("python-packages", PackageManager::Pip, ["west>=1.2.0"]).unwrap(),
            step::archive("arm-gnu-toolchain", "https://example.invalid/tc.tar.xz", &tc),
            step::packages("system-packages", PackageManager::Apt, ["git"]).unwrap(),
        ]
    }

    #[test]
    fn runs_in_phase_order_and_collects_env() {
        let temp = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        let provisioner = Provisioner::new(&runner);

        let steps = steps(temp.path());
        let outcome = provisioner.run(ordered(&steps)).unwrap();

        assert_eq!(
            outcome.applied,
            vec![
                "workspace",
                "system-packages",
                "python-packages",
                "arm-gnu-toolchain",
                "toolchain-env"
            ]
        );
        assert_eq!(
            runner.programs(),
            vec!["apt-get", "apt-get", "apt-get", "pip3", "curl", "tar"]
        );
        let tc = temp.path().join("toolchains/gcc-arm-none-eabi");
        assert_eq!(outcome.env.path_prefix(), &[tc.join("bin")]);
        assert_eq!(
            outcome.env.var("ARMGCC_DIR"),
            Some(tc.display().to_string().as_str())
        );
    }

    #[test]
    fn stops_on_first_failure() {
        let temp = TempDir::new().unwrap();
        let runner = FakeRunner::new().answer("pip3", CommandOutput::failed(1, "no network"));
        let provisioner = Provisioner::new(&runner);

        let steps = steps(temp.path());
        let err = provisioner.run(ordered(&steps)).unwrap_err();

        assert_eq!(err.step(), "python-packages");
        assert_eq!(err.exit_code(), Some(1));
        assert!(!runner.programs().contains(&"curl".to_string()));
    }

    #[test]
    fn export_without_provider_is_rejected_before_running() {
        let runner = FakeRunner::new();
        let provisioner = Provisioner::new(&runner);
        let steps = vec![
            step::packages("system-packages", PackageManager::Apt, ["git"]).unwrap(),
            step::export(
                "toolchain-env",
                ["/nonexistent/provisioner-test/bin"],
                [("ARMGCC_DIR", "/nonexistent/provisioner-test")],
            ),
        ];

        let err = provisioner.run(&steps).unwrap_err();

        assert!(matches!(err, ProvisioningError::Ordering { .. }));
        assert!(runner.programs().is_empty());
    }

    #[test]
    fn existing_paths_satisfy_requirements_unless_declared_only() {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let steps = vec![step::export("env", [bin.clone()], Vec::<(String, String)>::new())];

        assert!(Provisioner::new(FakeRunner::new()).run(&steps).is_ok());
        assert!(Provisioner::new(FakeRunner::new())
            .declared_paths_only()
            .run(&steps)
            .is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let plan_steps = vec![
            step::directory("dir", "/tmp/a"),
            step::directory("dir", "/tmp/b"),
        ];
        let plan = ordered(&plan_steps);

        let err = validate_order(&plan, true).unwrap_err();

        assert!(err.to_string().contains("duplicate step name"));
    }

    #[test]
    fn base_env_is_visible_to_first_step() {
        let runner = FakeRunner::new();
        let provisioner = Provisioner::new(&runner)
            .with_base_env(ToolchainEnv::new().with_var("PIP_INDEX_URL", "https://mirror"));

        provisioner
            .run(&[step::packages("pip", PackageManager::Pip, ["gcovr"]).unwrap()])
            .unwrap();

        let calls = runner.calls.borrow();
        assert_eq!(
            calls[0].env.get("PIP_INDEX_URL").map(String::as_str),
            Some("https://mirror")
        );
    }

    #[test]
    fn given_order_is_kept_so_builds_see_earlier_exports() {
        let temp = TempDir::new().unwrap();
        let tc = temp.path().join("toolchain");
        let steps = vec![
            step::archive("toolchain", "https://example.invalid/tc.tar.xz", &tc),
            step::export(
                "toolchain-env",
                [tc.join("bin")],
                [("ARMGCC_DIR", tc.display().to_string())],
            ),
            Step::SourceBuildAndInstall {
                name: "firmware".into(),
                repo: "https://example.invalid/firmware.git".into(),
                revision: None,
                checkout: temp.path().join("firmware"),
                build: vec![vec!["arm-none-eabi-gcc".into(), "--version".into()]],
                install_root: None,
            },
        ];
        let runner = FakeRunner::new();

        let outcome = Provisioner::new(&runner).run(&steps).unwrap();

        assert_eq!(outcome.applied, vec!["toolchain", "toolchain-env", "firmware"]);
        let calls = runner.calls.borrow();
        let build = calls
            .iter()
            .find(|c| c.program == "arm-none-eabi-gcc")
            .unwrap();
        assert_eq!(
            build.env.get("ARMGCC_DIR").map(String::as_str),
            Some(tc.display().to_string().as_str())
        );
        assert!(build
            .env
            .get("PATH")
            .is_some_and(|p| p.starts_with(&tc.join("bin").display().to_string())));
    }

    #[test]
    fn export_before_its_provider_is_rejected_not_reordered() {
        let temp = TempDir::new().unwrap();
        let tc = temp.path().join("toolchain");
        let steps = vec![
            step::export("toolchain-env", [tc.join("bin")], Vec::<(String, String)>::new()),
            step::archive("toolchain", "https://example.invalid/tc.tar.xz", &tc),
        ];
        let runner = FakeRunner::new();

        let err = Provisioner::new(&runner).run(&steps).unwrap_err();

        assert!(matches!(err, ProvisioningError::Ordering { ref step, .. } if step == "toolchain-env"));
        assert!(runner.programs().is_empty());
    }

    #[test]
    fn search_path_entry_with_separator_is_rejected() {
        let steps = vec![step::export(
            "env",
            ["/opt/a:/opt/b"],
            Vec::<(String, String)>::new(),
        )];

        let err = Provisioner::new(FakeRunner::new()).run(&steps).unwrap_err();

        assert!(matches!(err, ProvisioningError::InvalidStep { .. }));
        assert!(err.to_string().contains("path separator"));
    }

    #[test]
    fn rerunning_builtin_manifest_is_stable() {
        use crate::manifest::{parse_manifest, BUILTIN_MANIFEST};
        use crate::receipt::compare_versions;
        use crate::verify::run_checks;

        let temp = TempDir::new().unwrap();
        let root = temp.path().display().to_string();
        let text = BUILTIN_MANIFEST.replace("\"/", &format!("\"{root}/"));
        let manifest = parse_manifest(&text, "rebased", temp.path()).unwrap();
        let runner = FakeRunner::new()
            .with_clones()
            .answer("git", CommandOutput::ok("git version 2.34.1\n"))
            .answer("west", CommandOutput::ok("v1.2.0\n"))
            .answer("cmake", CommandOutput::ok("cmake version 3.27.9\n"));
        let provisioner = Provisioner::new(&runner);

        let first = provisioner.run(manifest.plan()).unwrap();
        let first_report = run_checks(manifest.checks(), &first.env, &runner);
        let clones_after_first = runner
            .command_lines()
            .iter()
            .filter(|line| line.starts_with("git clone"))
            .count();

        let second = provisioner.run(manifest.plan()).unwrap();
        let second_report = run_checks(manifest.checks(), &second.env, &runner);
        let clones_after_second = runner
            .command_lines()
            .iter()
            .filter(|line| line.starts_with("git clone"))
            .count();

        assert_eq!(clones_after_first, 1);
        assert_eq!(clones_after_second, 1);
        assert_eq!(first.applied, second.applied);
        assert_eq!(first.env, second.env);
        assert_eq!(
            first.env.var("CPPUTEST_HOME"),
            Some(format!("{root}/opt/cpputest").as_str())
        );
        assert!(temp.path().join("etc/profile.d/embedded-toolchain.sh").is_file());
        assert!(compare_versions(&first_report, &second_report).is_empty());
    }
}
