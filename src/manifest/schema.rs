use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{LayoutSpec, ToolchainSpec};
use crate::step::{PackageManager, PackageSpec, Step};
use crate::verify::VersionCheck;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct ManifestToml {
    pub(super) base: BaseToml,
    pub(super) workspace: Option<WorkspaceToml>,
    pub(super) state: Option<StateToml>,
    pub(super) plan: Option<PlanToml>,
    pub(super) toolchain: Option<ToolchainSpec>,
    #[serde(default)]
    pub(super) layout: Vec<LayoutSpec>,
    #[serde(default)]
    pub(super) step: Vec<StepToml>,
    #[serde(default)]
    pub(super) check: Vec<VersionCheck>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct BaseToml {
    pub(super) distribution: String,
    pub(super) version: String,
    pub(super) architecture: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct WorkspaceToml {
    pub(super) dir: String,
    pub(super) shell: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct StateToml {
    pub(super) dir: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct PlanToml {
    /// `phase` (default) or `declared`.
    pub(super) order: Option<String>,
}

/// Flat step table; which fields are required depends on `kind`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct StepToml {
    pub(super) kind: String,
    pub(super) name: String,
    // directory
    pub(super) path: Option<String>,
    // packages
    pub(super) manager: Option<String>,
    pub(super) packages: Option<Vec<String>>,
    // archive
    pub(super) url: Option<String>,
    pub(super) dest: Option<String>,
    pub(super) strip_components: Option<u32>,
    pub(super) sha256: Option<String>,
    // source
    pub(super) repo: Option<String>,
    pub(super) revision: Option<String>,
    pub(super) checkout: Option<String>,
    pub(super) build: Option<Vec<Vec<String>>>,
    pub(super) install_root: Option<String>,
    // environment
    pub(super) path_prefix: Option<Vec<String>>,
    pub(super) vars: Option<BTreeMap<String, String>>,
    pub(super) profile: Option<String>,
}

/// Resolves manifest paths and reports errors against one manifest.
pub(super) struct StepParser<'a> {
    pub(super) origin: &'a str,
    /// Relative paths are resolved against this directory.
    pub(super) base_dir: &'a Path,
}

impl StepParser<'_> {
    pub(super) fn parse(&self, raw: StepToml) -> Result<Step> {
        let name = raw.name.trim().to_string();
        if name.is_empty() {
            bail!(
                "invalid manifest '{}': a step of kind '{}' has an empty name",
                self.origin,
                raw.kind
            );
        }
        let kind = raw.kind.trim().to_ascii_lowercase();

        let step = match kind.as_str() {
            "directory" => Step::Directory {
                path: self.path(&name, &kind, "path", raw.path)?,
                name,
            },
            "packages" => {
                let manager_raw = self.required(&name, &kind, "manager", raw.manager)?;
                let manager = PackageManager::parse(&manager_raw).ok_or_else(|| {
                    anyhow::anyhow!(
                        "invalid manifest '{}': step '{}': unsupported manager '{}' (expected 'apt' or 'pip')",
                        self.origin,
                        name,
                        manager_raw
                    )
                })?;
                let packages = self
                    .required(&name, &kind, "packages", raw.packages)?
                    .iter()
                    .map(|spec| -> Result<PackageSpec> {
                        let parsed = PackageSpec::parse(spec)?;
                        parsed.render_for(manager)?;
                        Ok(parsed)
                    })
                    .collect::<Result<Vec<_>>>()
                    .with_context(|| {
                        format!("invalid manifest '{}': step '{}'", self.origin, name)
                    })?;
                Step::PackageInstall {
                    name,
                    manager,
                    packages,
                }
            }
            "archive" => {
                let url = self.required(&name, &kind, "url", raw.url)?;
                if !(url.starts_with("https://") || url.starts_with("http://")) {
                    bail!(
                        "invalid manifest '{}': step '{}': url must be http(s), got '{}'",
                        self.origin,
                        name,
                        url
                    );
                }
                let sha256 = raw
                    .sha256
                    .map(|digest| self.digest(&name, &digest))
                    .transpose()?;
                Step::ArchiveFetchAndExtract {
                    dest: self.path(&name, &kind, "dest", raw.dest)?,
                    url,
                    strip_components: raw.strip_components.unwrap_or(0),
                    sha256,
                    name,
                }
            }
            "source" => {
                let build = raw.build.unwrap_or_default();
                if let Some(index) = build.iter().position(|argv| argv.is_empty()) {
                    bail!(
                        "invalid manifest '{}': step '{}': build command #{} is empty",
                        self.origin,
                        name,
                        index + 1
                    );
                }
                let install_root = raw.install_root.map(|root| self.resolve(&root));
                Step::SourceBuildAndInstall {
                    repo: self.required(&name, &kind, "repo", raw.repo)?,
                    revision: raw.revision.map(|r| r.trim().to_string()),
                    checkout: self.path(&name, &kind, "checkout", raw.checkout)?,
                    build,
                    install_root,
                    name,
                }
            }
            "environment" => {
                let path_prefix = raw
                    .path_prefix
                    .unwrap_or_default()
                    .iter()
                    .map(|entry| -> Result<PathBuf> {
                        if entry.contains(':') {
                            bail!(
                                "invalid manifest '{}': step '{}': path_prefix entry '{}' contains ':'",
                                self.origin,
                                name,
                                entry
                            );
                        }
                        Ok(self.resolve(entry))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let vars = raw.vars.unwrap_or_default();
                if let Some(bad) = vars.keys().find(|k| !is_env_name(k)) {
                    bail!(
                        "invalid manifest '{}': step '{}': '{}' is not a valid variable name",
                        self.origin,
                        name,
                        bad
                    );
                }
                if vars.contains_key("PATH") {
                    bail!(
                        "invalid manifest '{}': step '{}': set PATH through path_prefix, not vars",
                        self.origin,
                        name
                    );
                }
                let profile = raw.profile.map(|p| self.resolve(&p));
                Step::EnvironmentExport {
                    name,
                    path_prefix,
                    vars,
                    profile,
                }
            }
            other => bail!(
                "invalid manifest '{}': step '{}': unsupported kind '{}' (expected directory, packages, archive, source or environment)",
                self.origin,
                name,
                other
            ),
        };
        Ok(step)
    }

    fn required<T>(&self, name: &str, kind: &str, field: &str, value: Option<T>) -> Result<T> {
        value.ok_or_else(|| {
            anyhow::anyhow!(
                "invalid manifest '{}': step '{}': {} is required for kind='{}'",
                self.origin,
                name,
                field,
                kind
            )
        })
    }

    fn path(&self, name: &str, kind: &str, field: &str, value: Option<String>) -> Result<PathBuf> {
        let raw = self.required(name, kind, field, value)?;
        if raw.trim().is_empty() {
            bail!(
                "invalid manifest '{}': step '{}': {} must not be empty",
                self.origin,
                name,
                field
            );
        }
        Ok(self.resolve(raw.trim()))
    }

    pub(super) fn resolve(&self, raw: &str) -> PathBuf {
        let candidate = Path::new(raw);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.base_dir.join(candidate)
        }
    }

    fn digest(&self, name: &str, raw: &str) -> Result<String> {
        let digest = raw.trim().to_ascii_lowercase();
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!(
                "invalid manifest '{}': step '{}': sha256 must be 64 hex characters",
                self.origin,
                name
            );
        }
        Ok(digest)
    }
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
