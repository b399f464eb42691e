//! Tool specification manifests.
//!
//! A manifest is a TOML file declaring the base system, the provisioning
//! steps, the environment invariants and the version checks of one
//! development environment. The crate ships one built-in manifest for the
//! embedded ARM environment; a different file can be selected with
//! `--manifest` or `PROVISION_MANIFEST`.

mod schema;

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::environment::ToolchainEnv;
use crate::step::{Step, StepOrder};
use crate::verify::VersionCheck;
use schema::{ManifestToml, StepParser};

/// The built-in embedded ARM manifest.
pub const BUILTIN_MANIFEST: &str = include_str!("../../manifests/embedded-arm.toml");

/// Origin label used for the built-in manifest in messages and receipts.
pub const BUILTIN_ORIGIN: &str = "builtin:embedded-arm";

pub const DEFAULT_STATE_DIR: &str = "/var/lib/toolchain-provisioner";
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Expected base system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseSpec {
    pub distribution: String,
    pub version: String,
    /// Debian-style architecture name (`amd64`, `arm64`).
    pub architecture: String,
}

/// Final working directory and interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceSpec {
    pub dir: PathBuf,
    pub shell: String,
}

/// The cross-compiler and the variable naming its install root.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolchainSpec {
    pub compiler: String,
    pub root_var: String,
}

/// Expected contents of a framework install root.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutSpec {
    pub name: String,
    pub var: String,
    #[serde(default)]
    pub libraries: Vec<String>,
    #[serde(default)]
    pub headers: Vec<String>,
}

/// A parsed, validated manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub origin: String,
    pub base: BaseSpec,
    pub workspace: Option<WorkspaceSpec>,
    pub state_dir: PathBuf,
    /// How `steps` become the execution plan.
    pub order: StepOrder,
    pub toolchain: Option<ToolchainSpec>,
    pub layouts: Vec<LayoutSpec>,
    pub steps: Vec<Step>,
    pub checks: Vec<VersionCheck>,
    digest: String,
}

impl Manifest {
    /// sha256 of the manifest text.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// State directory, honoring `PROVISION_STATE_DIR`.
    pub fn effective_state_dir(&self) -> PathBuf {
        env::var_os("PROVISION_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.state_dir.clone())
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn checks(&self) -> &[VersionCheck] {
        &self.checks
    }

    /// Steps in execution order.
    pub fn plan(&self) -> Vec<&Step> {
        self.order.arrange(&self.steps)
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name() == name)
    }

    /// Environment the manifest's export steps declare, with the workspace
    /// as working directory. Nothing is checked against the host.
    pub fn declared_env(&self) -> ToolchainEnv {
        let mut env = ToolchainEnv::new();
        for step in self.plan() {
            if let Step::EnvironmentExport {
                path_prefix, vars, ..
            } = step
            {
                for dir in path_prefix {
                    env = env.with_path_prefix(dir.clone());
                }
                for (k, v) in vars {
                    env = env.with_var(k.clone(), v.clone());
                }
            }
        }
        match &self.workspace {
            Some(ws) => env.with_workdir(ws.dir.clone()),
            None => env,
        }
    }
}

/// Parse the built-in manifest.
pub fn builtin_manifest() -> Result<Manifest> {
    parse_manifest(BUILTIN_MANIFEST, BUILTIN_ORIGIN, Path::new("/"))
}

/// Pick the manifest file: explicit path, then `PROVISION_MANIFEST`.
/// `None` means the built-in manifest.
pub fn resolve_manifest_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| env::var_os("PROVISION_MANIFEST").map(PathBuf::from))
}

/// Load the manifest selected by [`resolve_manifest_path`].
pub fn load(explicit: Option<&Path>) -> Result<Manifest> {
    match resolve_manifest_path(explicit) {
        Some(path) => load_manifest(&path),
        None => builtin_manifest(),
    }
}

/// Load a manifest file. Relative paths inside it resolve against its directory.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading manifest '{}'", path.display()))?;
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let base_dir = fs::canonicalize(&base_dir).unwrap_or(base_dir);
    parse_manifest(&text, &path.display().to_string(), &base_dir)
}

/// Parse and validate manifest text.
pub fn parse_manifest(text: &str, origin: &str, base_dir: &Path) -> Result<Manifest> {
    let parsed: ManifestToml =
        toml::from_str(text).with_context(|| format!("parsing manifest '{origin}'"))?;

    let parser = StepParser { origin, base_dir };

    let mut names = BTreeSet::new();
    let mut steps = Vec::with_capacity(parsed.step.len());
    for raw in parsed.step {
        let step = parser.parse(raw)?;
        if !names.insert(step.name().to_string()) {
            anyhow::bail!(
                "invalid manifest '{}': duplicate step name '{}'",
                origin,
                step.name()
            );
        }
        steps.push(step);
    }

    for check in &parsed.check {
        if check.tool.trim().is_empty() || check.command.is_empty() {
            anyhow::bail!(
                "invalid manifest '{}': every check needs a tool name and a command",
                origin
            );
        }
    }

    let workspace = parsed.workspace.map(|ws| WorkspaceSpec {
        dir: parser.resolve(ws.dir.trim()),
        shell: ws.shell.unwrap_or_else(|| DEFAULT_SHELL.to_string()),
    });
    let order = match parsed.plan.and_then(|plan| plan.order) {
        Some(raw) => StepOrder::parse(&raw).ok_or_else(|| {
            anyhow::anyhow!(
                "invalid manifest '{}': unsupported plan order '{}' (expected 'phase' or 'declared')",
                origin,
                raw
            )
        })?,
        None => StepOrder::default(),
    };
    let state_dir = parsed
        .state
        .map(|state| parser.resolve(state.dir.trim()))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));

    Ok(Manifest {
        origin: origin.to_string(),
        base: BaseSpec {
            distribution: parsed.base.distribution.trim().to_ascii_lowercase(),
            version: parsed.base.version.trim().to_string(),
            architecture: parsed.base.architecture.trim().to_ascii_lowercase(),
        },
        workspace,
        state_dir,
        order,
        toolchain: parsed.toolchain,
        layouts: parsed.layout,
        steps,
        checks: parsed.check,
        digest: format!("{:x}", Sha256::digest(text.as_bytes())),
    })
}
