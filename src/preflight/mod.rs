//! Preflight checks before provisioning.
//!
//! Validates that the host is the declared base system and that the tools
//! the first steps need are already present. This prevents cryptic errors
//! halfway through a run.
//!
//! # Example
//!
//! ```rust
//! use toolchain_provisioner::preflight::{check_required_tools, command_exists};
//!
//! // Check a single command
//! if !command_exists("apt-get") {
//!     println!("not a Debian-family host");
//! }
//!
//! // Check multiple tools
//! let tools = &[("curl", "curl"), ("tar", "tar")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use crate::manifest::BaseSpec;
use crate::step::{PackageManager, Step};
use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// # Arguments
///
/// * `tools` - Slice of (command, package) tuples
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<(&str, &str)> = tools
        .iter()
        .copied()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Tools each step kind drives, as (command, package) pairs.
fn tools_for(step: &Step) -> &'static [(&'static str, &'static str)] {
    match step {
        Step::Directory { .. } | Step::EnvironmentExport { .. } => &[],
        Step::PackageInstall {
            manager: PackageManager::Apt,
            ..
        } => &[("apt-get", "apt")],
        Step::PackageInstall {
            manager: PackageManager::Pip,
            ..
        } => &[("pip3", "python3-pip")],
        Step::ArchiveFetchAndExtract { .. } => &[("curl", "curl"), ("tar", "tar")],
        Step::SourceBuildAndInstall { .. } => &[("git", "git")],
    }
}

/// Host tools the plan needs that no earlier apt step installs.
///
/// `plan` must already be in execution order.
pub fn bootstrap_tools(plan: &[&Step]) -> Vec<(&'static str, &'static str)> {
    let mut installed: BTreeSet<&str> = BTreeSet::new();
    let mut needed = Vec::new();

    for step in plan {
        for &(tool, package) in tools_for(step) {
            if !installed.contains(package) && !needed.contains(&(tool, package)) {
                needed.push((tool, package));
            }
        }
        if let Step::PackageInstall {
            manager: PackageManager::Apt,
            packages,
            ..
        } = step
        {
            installed.extend(packages.iter().map(|p| p.name.as_str()));
        }
    }
    needed
}

/// Check the bootstrap tools of a plan.
pub fn check_bootstrap_tools(plan: &[&Step]) -> Result<()> {
    check_required_tools(&bootstrap_tools(plan))
}

/// Map a Rust target architecture to its Debian name.
pub fn debian_arch(rust_arch: &str) -> &str {
    match rust_arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "armhf",
        "x86" => "i386",
        other => other,
    }
}

/// Compare the host against the declared base system.
///
/// `os_release` is the content of `/etc/os-release`; `arch` is the Rust
/// target architecture of the running binary.
pub fn check_base(base: &BaseSpec, os_release: &str, arch: &str) -> Result<()> {
    let id = os_release_field(os_release, "ID").unwrap_or_default();
    let version = os_release_field(os_release, "VERSION_ID").unwrap_or_default();
    let host_arch = debian_arch(arch);

    let mut mismatches = Vec::new();
    if !id.eq_ignore_ascii_case(&base.distribution) {
        mismatches.push(format!(
            "  distribution: expected {}, host is {}",
            base.distribution,
            if id.is_empty() { "unknown" } else { id.as_str() }
        ));
    }
    if version != base.version {
        mismatches.push(format!(
            "  version: expected {}, host is {}",
            base.version,
            if version.is_empty() { "unknown" } else { version.as_str() }
        ));
    }
    if host_arch != base.architecture {
        mismatches.push(format!(
            "  architecture: expected {}, host is {}",
            base.architecture, host_arch
        ));
    }

    if !mismatches.is_empty() {
        bail!(
            "Host does not match the declared base system:\n{}",
            mismatches.join("\n")
        );
    }
    Ok(())
}

/// Check the running host against the declared base system.
pub fn check_host_base(base: &BaseSpec) -> Result<()> {
    let path = Path::new("/etc/os-release");
    let os_release =
        fs::read_to_string(path).with_context(|| format!("reading '{}'", path.display()))?;
    check_base(base, &os_release, std::env::consts::ARCH)
}

fn os_release_field(text: &str, key: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim().trim_matches('"').trim_matches('\'').to_string())
    })
}
