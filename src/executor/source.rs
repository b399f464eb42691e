//! Source build handler: Step::SourceBuildAndInstall

use super::Tool;
use crate::error::{ProvisioningError, Result};
use crate::runner::Invocation;
use std::fs;
use std::path::Path;

/// Handle Step::SourceBuildAndInstall.
///
/// Clones `repo` into `checkout` (shallow, at `revision` when given) and runs
/// each build command inside the checkout. An existing git checkout is reused
/// so a rerun only repeats the build commands.
pub(crate) fn handle_source(
    tool: &Tool<'_>,
    repo: &str,
    revision: Option<&str>,
    checkout: &Path,
    build: &[Vec<String>],
) -> Result<()> {
    if checkout.join(".git").is_dir() {
        println!(
            "[provision:{}] reusing checkout {}",
            tool.step,
            checkout.display()
        );
    } else {
        if let Some(parent) = checkout.parent().filter(|_| !tool.dry_run()) {
            fs::create_dir_all(parent)
                .map_err(|e| tool.io_error("creating directory", parent, e))?;
        }
        println!("[provision:{}] cloning {repo}", tool.step);
        let mut clone = Invocation::new("git").args(["clone", "--depth", "1"]);
        if let Some(rev) = revision {
            clone = clone.args(["--branch", rev]);
        }
        tool.run(clone.arg(repo).arg(checkout.display().to_string()))?;
    }

    for (index, argv) in build.iter().enumerate() {
        let invocation =
            Invocation::from_argv(argv).ok_or_else(|| ProvisioningError::InvalidStep {
                step: tool.step.to_string(),
                message: format!("build command #{} is empty", index + 1),
            })?;
        println!("[provision:{}] {}", tool.step, argv.join(" "));
        tool.run(invocation.cwd(checkout))?;
    }
    Ok(())
}
