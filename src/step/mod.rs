//! Declarative provisioning steps.
//!
//! Steps are data describing WHAT needs to happen to the environment, not
//! HOW. The [`crate::executor`] interprets them against a
//! [`crate::runner::CommandRunner`], which keeps the package managers and
//! downloaders behind a seam that tests can replace.
//!
//! # Example
//!
//! ```rust
//! use toolchain_provisioner::step::{archive, packages, PackageManager, Phase};
//!
//! let steps = vec![
//!     packages("system-packages", PackageManager::Apt, ["git", "ninja-build"]).unwrap(),
//!     archive(
//!         "arm-gnu-toolchain",
//!         "https://example.invalid/arm-gnu-toolchain.tar.xz",
//!         "/opt/toolchains/gcc-arm-none-eabi",
//!     ),
//! ];
//! assert_eq!(steps[0].phase(), Phase::SystemPackages);
//! assert_eq!(steps[1].phase(), Phase::Fetch);
//! ```

mod package;

pub use package::{PackageSpec, VersionConstraint};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Provisioning phases determine step ordering.
///
/// Steps are stably sorted by phase before execution so that, for example,
/// a toolchain archive is unpacked before the environment export that puts
/// its `bin` directory on the search path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Phase {
    /// Working directories.
    Filesystem = 1,
    /// OS package manager installs.
    SystemPackages = 2,
    /// Python package installs.
    LanguagePackages = 3,
    /// Versioned binary archives.
    Fetch = 4,
    /// Frameworks built from source.
    Build = 5,
    /// Search path and variable exports.
    Environment = 6,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Filesystem => write!(f, "Filesystem"),
            Phase::SystemPackages => write!(f, "SystemPackages"),
            Phase::LanguagePackages => write!(f, "LanguagePackages"),
            Phase::Fetch => write!(f, "Fetch"),
            Phase::Build => write!(f, "Build"),
            Phase::Environment => write!(f, "Environment"),
        }
    }
}

/// Which package manager a [`Step::PackageInstall`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageManager {
    /// `apt-get`, non-interactive.
    Apt,
    /// `pip3`.
    Pip,
}

impl PackageManager {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "apt" | "apt-get" => Some(Self::Apt),
            "pip" | "pip3" => Some(Self::Pip),
            _ => None,
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageManager::Apt => write!(f, "apt"),
            PackageManager::Pip => write!(f, "pip"),
        }
    }
}

/// One provisioning step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Establish a working directory.
    Directory { name: String, path: PathBuf },

    /// Install named packages through a package manager.
    PackageInstall {
        name: String,
        manager: PackageManager,
        packages: Vec<PackageSpec>,
    },

    /// Download an archive, optionally verify it, unpack it, discard it.
    ArchiveFetchAndExtract {
        name: String,
        url: String,
        dest: PathBuf,
        strip_components: u32,
        sha256: Option<String>,
    },

    /// Clone a repository and run its bootstrap/configure/build commands.
    SourceBuildAndInstall {
        name: String,
        repo: String,
        revision: Option<String>,
        checkout: PathBuf,
        build: Vec<Vec<String>>,
        install_root: Option<PathBuf>,
    },

    /// Contribute search-path entries and variables to the toolchain environment.
    EnvironmentExport {
        name: String,
        path_prefix: Vec<PathBuf>,
        vars: BTreeMap<String, String>,
        profile: Option<PathBuf>,
    },
}

impl Step {
    /// Name for logging and identification.
    pub fn name(&self) -> &str {
        match self {
            Step::Directory { name, .. }
            | Step::PackageInstall { name, .. }
            | Step::ArchiveFetchAndExtract { name, .. }
            | Step::SourceBuildAndInstall { name, .. }
            | Step::EnvironmentExport { name, .. } => name,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Step::Directory { .. } => Phase::Filesystem,
            Step::PackageInstall {
                manager: PackageManager::Apt,
                ..
            } => Phase::SystemPackages,
            Step::PackageInstall {
                manager: PackageManager::Pip,
                ..
            } => Phase::LanguagePackages,
            Step::ArchiveFetchAndExtract { .. } => Phase::Fetch,
            Step::SourceBuildAndInstall { .. } => Phase::Build,
            Step::EnvironmentExport { .. } => Phase::Environment,
        }
    }

    /// Short kind label used in plans and receipts.
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Directory { .. } => "directory",
            Step::PackageInstall { .. } => "packages",
            Step::ArchiveFetchAndExtract { .. } => "archive",
            Step::SourceBuildAndInstall { .. } => "source",
            Step::EnvironmentExport { .. } => "environment",
        }
    }

    /// Paths this step leaves behind for later steps.
    pub fn provides(&self) -> Vec<&Path> {
        match self {
            Step::Directory { path, .. } => vec![path.as_path()],
            Step::PackageInstall { .. } => Vec::new(),
            Step::ArchiveFetchAndExtract { dest, .. } => vec![dest.as_path()],
            Step::SourceBuildAndInstall {
                checkout,
                install_root,
                ..
            } => {
                let mut out = vec![checkout.as_path()];
                if let Some(root) = install_root {
                    out.push(root.as_path());
                }
                out
            }
            Step::EnvironmentExport { profile, .. } => profile.iter().map(|p| p.as_path()).collect(),
        }
    }

    /// Paths that must exist (or be provided earlier) before this step runs.
    ///
    /// Only environment exports consume paths: every search-path entry and
    /// every variable whose value is an absolute path.
    pub fn requires(&self) -> Vec<&Path> {
        match self {
            Step::EnvironmentExport {
                path_prefix, vars, ..
            } => {
                let mut out: Vec<&Path> = path_prefix.iter().map(|p| p.as_path()).collect();
                out.extend(
                    vars.values()
                        .map(Path::new)
                        .filter(|value| value.is_absolute()),
                );
                out
            }
            _ => Vec::new(),
        }
    }

    /// One-line human description for `provision plan`.
    pub fn describe(&self) -> String {
        match self {
            Step::Directory { path, .. } => format!("create {}", path.display()),
            Step::PackageInstall {
                manager, packages, ..
            } => {
                let rendered = packages
                    .iter()
                    .map(|p| p.render_for(*manager).unwrap_or_else(|_| p.to_string()))
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("{manager} install {rendered}")
            }
            Step::ArchiveFetchAndExtract { url, dest, .. } => {
                format!("fetch {url} -> {}", dest.display())
            }
            Step::SourceBuildAndInstall {
                repo,
                revision,
                checkout,
                build,
                ..
            } => format!(
                "clone {repo}{} -> {} ({} build commands)",
                revision
                    .as_deref()
                    .map(|r| format!("@{r}"))
                    .unwrap_or_default(),
                checkout.display(),
                build.len()
            ),
            Step::EnvironmentExport {
                path_prefix, vars, ..
            } => {
                let names = vars.keys().cloned().collect::<Vec<_>>().join(", ");
                format!("export {} PATH entries; {names}", path_prefix.len())
            }
        }
    }
}

/// Sort steps into execution order: by phase, declaration order within a phase.
pub fn ordered(steps: &[Step]) -> Vec<&Step> {
    let mut out: Vec<&Step> = steps.iter().collect();
    out.sort_by_key(|step| step.phase());
    out
}

/// How a manifest turns its declared steps into an execution plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StepOrder {
    /// Stable sort by [`Phase`].
    #[default]
    Phase,
    /// Exactly as declared.
    Declared,
}

impl fmt::Display for StepOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOrder::Phase => write!(f, "phase"),
            StepOrder::Declared => write!(f, "declared"),
        }
    }
}

impl StepOrder {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "phase" => Some(Self::Phase),
            "declared" => Some(Self::Declared),
            _ => None,
        }
    }

    /// Arrange steps for execution.
    pub fn arrange(self, steps: &[Step]) -> Vec<&Step> {
        match self {
            StepOrder::Phase => ordered(steps),
            StepOrder::Declared => steps.iter().collect(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper functions for readable step tables
// ─────────────────────────────────────────────────────────────────────────────

/// Establish a working directory.
pub fn directory(name: impl Into<String>, path: impl Into<PathBuf>) -> Step {
    Step::Directory {
        name: name.into(),
        path: path.into(),
    }
}

/// Install packages. Fails if a package spec does not parse or the
/// constraint is not expressible by the manager.
pub fn packages(
    name: impl Into<String>,
    manager: PackageManager,
    specs: impl IntoIterator<Item = impl AsRef<str>>,
) -> anyhow::Result<Step> {
    let packages = specs
        .into_iter()
        .map(|raw| PackageSpec::parse(raw.as_ref()))
        .collect::<anyhow::Result<Vec<_>>>()?;
    for package in &packages {
        package.render_for(manager)?;
    }
    Ok(Step::PackageInstall {
        name: name.into(),
        manager,
        packages,
    })
}

/// Fetch and unpack an archive without stripping or checksum.
pub fn archive(name: impl Into<String>, url: impl Into<String>, dest: impl Into<PathBuf>) -> Step {
    Step::ArchiveFetchAndExtract {
        name: name.into(),
        url: url.into(),
        dest: dest.into(),
        strip_components: 0,
        sha256: None,
    }
}

/// Export environment variables and search-path entries.
pub fn export(
    name: impl Into<String>,
    path_prefix: impl IntoIterator<Item = impl Into<PathBuf>>,
    vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
) -> Step {
    Step::EnvironmentExport {
        name: name.into(),
        path_prefix: path_prefix.into_iter().map(Into::into).collect(),
        vars: vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
        profile: None,
    }
}
