//! The toolchain environment record.
//!
//! Search-path entries and variables produced by provisioning are collected
//! into an immutable [`ToolchainEnv`] that is applied explicitly to every
//! child process, instead of mutating the provisioner's own environment.

use crate::runner::Invocation;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Immutable environment contribution of a provisioned toolchain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolchainEnv {
    path_prefix: Vec<PathBuf>,
    vars: BTreeMap<String, String>,
    workdir: Option<PathBuf>,
}

impl ToolchainEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a search-path entry. Entries added earlier take precedence.
    /// Duplicates are ignored.
    pub fn with_path_prefix(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if !self.path_prefix.contains(&dir) {
            self.path_prefix.push(dir);
        }
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Combine two records; `other` wins on variable conflicts and its
    /// search-path entries follow ours.
    pub fn merged(self, other: &ToolchainEnv) -> Self {
        let mut out = self;
        for dir in &other.path_prefix {
            out = out.with_path_prefix(dir.clone());
        }
        for (k, v) in &other.vars {
            out.vars.insert(k.clone(), v.clone());
        }
        if other.workdir.is_some() {
            out.workdir = other.workdir.clone();
        }
        out
    }

    pub fn path_prefix(&self) -> &[PathBuf] {
        &self.path_prefix
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.path_prefix.is_empty() && self.vars.is_empty()
    }

    /// Resolved search path: our prefix entries, then `base`.
    ///
    /// A prefix entry that cannot be part of PATH (it contains the separator)
    /// is skipped with a warning; the rest of the path is kept.
    pub fn search_path(&self, base: Option<&OsString>) -> OsString {
        let mut dirs: Vec<PathBuf> = Vec::with_capacity(self.path_prefix.len());
        for dir in &self.path_prefix {
            if std::env::join_paths([dir]).is_ok() {
                dirs.push(dir.clone());
            } else {
                eprintln!(
                    "[env] warning: skipping search-path entry '{}': contains a path separator",
                    dir.display()
                );
            }
        }
        if let Some(base) = base {
            dirs.extend(std::env::split_paths(base));
        }
        std::env::join_paths(dirs).unwrap_or_else(|_| base.cloned().unwrap_or_default())
    }

    /// Apply PATH and variables to an invocation.
    ///
    /// PATH is built from the invocation's own PATH if set, otherwise from
    /// the current process environment.
    pub fn apply(&self, invocation: &mut Invocation) {
        if !self.path_prefix.is_empty() {
            let base = invocation
                .env
                .get("PATH")
                .map(OsString::from)
                .or_else(|| std::env::var_os("PATH"));
            let path = self.search_path(base.as_ref());
            invocation
                .env
                .insert("PATH".to_string(), path.to_string_lossy().into_owned());
        }
        for (k, v) in &self.vars {
            invocation.env.insert(k.clone(), v.clone());
        }
    }

    /// POSIX shell exports, one per line.
    pub fn render_exports(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.vars {
            out.push_str(&format!("export {}={}\n", k, shell_quote(v)));
        }
        if !self.path_prefix.is_empty() {
            let prefix = self
                .path_prefix
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(":");
            out.push_str(&format!("export PATH={}:\"$PATH\"\n", shell_quote(&prefix)));
        }
        out
    }

    /// Contents of a profile script that makes the toolchain visible to
    /// login shells.
    pub fn render_profile(&self) -> String {
        format!(
            "# Generated by toolchain-provisioner. Do not edit.\n{}",
            self.render_exports()
        )
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
