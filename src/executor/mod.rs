//! Step executor - interprets [`Step`] variants and performs the actual work.
//!
//! Each handler turns a step into one or more external tool invocations
//! through a [`CommandRunner`], or into a filesystem operation performed
//! directly. Handlers never retry: every external call is attempted once.
//!
//! # Usage
//!
//! ```rust,ignore
//! use toolchain_provisioner::executor::execute_step;
//! use toolchain_provisioner::runner::SystemRunner;
//! use toolchain_provisioner::{step, ToolchainEnv};
//!
//! let env = ToolchainEnv::new();
//! let outcome = execute_step(&step::directory("workspace", "/workspace"), &env, &SystemRunner::new())?;
//! ```

pub mod archive;
pub mod directories;
pub mod environment;
pub mod packages;
pub mod source;

use crate::environment::ToolchainEnv;
use crate::error::{ProvisioningError, Result};
use crate::runner::{CommandOutput, CommandRunner, Invocation};
use crate::step::Step;

/// What a successfully applied step contributes to later steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Environment contribution (only environment exports produce one).
    pub env: ToolchainEnv,
}

/// Execute one step.
///
/// # Arguments
/// * `step` - The step to apply
/// * `env` - Environment accumulated from earlier steps, applied to every
///   external command this step runs
/// * `runner` - External tool collaborator
pub fn execute_step(
    step: &Step,
    env: &ToolchainEnv,
    runner: &dyn CommandRunner,
) -> Result<StepOutcome> {
    let tool = Tool {
        step: step.name(),
        env,
        runner,
    };

    match step {
        Step::Directory { name, path } => {
            if runner.dry_run() {
                println!("[dry-run] mkdir -p {}", path.display());
            } else {
                directories::handle_directory(name, path)?
            }
        }
        Step::PackageInstall {
            manager, packages, ..
        } => packages::handle_packages(&tool, *manager, packages)?,
        Step::ArchiveFetchAndExtract {
            url,
            dest,
            strip_components,
            sha256,
            ..
        } => archive::handle_archive(&tool, url, dest, *strip_components, sha256.as_deref())?,
        Step::SourceBuildAndInstall {
            repo,
            revision,
            checkout,
            build,
            ..
        } => source::handle_source(&tool, repo, revision.as_deref(), checkout, build)?,
        Step::EnvironmentExport {
            name,
            path_prefix,
            vars,
            profile,
        } => {
            let profile = profile.as_deref();
            if let (true, Some(profile)) = (runner.dry_run(), profile) {
                println!("[dry-run] write profile {}", profile.display());
            }
            let contribution = environment::handle_export(
                name,
                path_prefix,
                vars,
                profile.filter(|_| !runner.dry_run()),
            )?;
            return Ok(StepOutcome { env: contribution });
        }
    }

    Ok(StepOutcome::default())
}

/// Runs external tools on behalf of one step.
pub(crate) struct Tool<'a> {
    pub(crate) step: &'a str,
    pub(crate) env: &'a ToolchainEnv,
    pub(crate) runner: &'a dyn CommandRunner,
}

impl Tool<'_> {
    /// Run an invocation with the accumulated environment applied; any
    /// non-zero exit is fatal.
    pub(crate) fn run(&self, mut invocation: Invocation) -> Result<CommandOutput> {
        self.env.apply(&mut invocation);
        let output = self
            .runner
            .run(&invocation)
            .map_err(|source| ProvisioningError::Spawn {
                step: self.step.to_string(),
                program: invocation.program.clone(),
                source,
            })?;

        if !output.success() {
            if !output.stderr.trim().is_empty() {
                eprintln!("[provision:{}] {}", self.step, output.stderr.trim_end());
            }
            return Err(ProvisioningError::CommandFailed {
                step: self.step.to_string(),
                program: invocation.program,
                code: output.code,
            });
        }
        Ok(output)
    }

    pub(crate) fn dry_run(&self) -> bool {
        self.runner.dry_run()
    }

    pub(crate) fn io_error(
        &self,
        action: &'static str,
        path: &std::path::Path,
        source: std::io::Error,
    ) -> ProvisioningError {
        ProvisioningError::Io {
            step: self.step.to_string(),
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}
