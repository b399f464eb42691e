//! Package install handler: Step::PackageInstall
//!
//! apt runs non-interactively (`update`, `install`, `clean`); pip runs a
//! single `pip3 install --no-cache-dir`.

use super::Tool;
use crate::error::{ProvisioningError, Result};
use crate::runner::Invocation;
use crate::step::{PackageManager, PackageSpec};

/// Handle Step::PackageInstall.
pub(crate) fn handle_packages(
    tool: &Tool<'_>,
    manager: PackageManager,
    packages: &[PackageSpec],
) -> Result<()> {
    if packages.is_empty() {
        println!("[provision:{}] no packages declared", tool.step);
        return Ok(());
    }

    let rendered = packages
        .iter()
        .map(|p| p.render_for(manager))
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(|e| ProvisioningError::InvalidStep {
            step: tool.step.to_string(),
            message: e.to_string(),
        })?;

    println!(
        "[provision:{}] {manager} install {} package(s)",
        tool.step,
        rendered.len()
    );

    for invocation in invocations(manager, &rendered) {
        tool.run(invocation)?;
    }
    Ok(())
}

/// The commands one package step runs, in order.
pub(crate) fn invocations(manager: PackageManager, rendered: &[String]) -> Vec<Invocation> {
    match manager {
        PackageManager::Apt => {
            let apt = |args: &[&str]| {
                Invocation::new("apt-get")
                    .args(args.iter().copied())
                    .env("DEBIAN_FRONTEND", "noninteractive")
            };
            vec![
                apt(&["update"]),
                apt(&["install", "-y", "--no-install-recommends"]).args(rendered.iter().cloned()),
                apt(&["clean"]),
            ]
        }
        PackageManager::Pip => vec![Invocation::new("pip3")
            .args(["install", "--no-cache-dir"])
            .args(rendered.iter().cloned())],
    }
}
