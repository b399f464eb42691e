//! Environment invariants checked after provisioning.
//!
//! - the cross-compiler resolves from the toolchain's own `bin` directory
//!   before any other copy on the search path
//! - the toolchain root variable contains the `bin` directory on the path
//! - framework root variables point at a tree with the declared libraries
//!   and headers
//!
//! Like version checks, these produce [`CheckResult`]s and never fail.

use super::CheckResult;
use crate::environment::ToolchainEnv;
use crate::manifest::{LayoutSpec, ToolchainSpec};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Run every environment invariant declared in the manifest.
///
/// `base_path` is the PATH the toolchain prefix is prepended to.
pub fn check_environment(
    toolchain: Option<&ToolchainSpec>,
    layouts: &[LayoutSpec],
    env: &ToolchainEnv,
    base_path: Option<&OsString>,
) -> Vec<CheckResult> {
    let mut out = Vec::new();
    if let Some(toolchain) = toolchain {
        out.push(check_root_contains_path_entry(toolchain, env));
        out.push(check_compiler_precedence(toolchain, env, base_path));
    }
    for layout in layouts {
        out.push(check_layout(layout, env));
    }
    out
}

/// The toolchain root variable must name a directory that contains a
/// search-path entry.
pub fn check_root_contains_path_entry(toolchain: &ToolchainSpec, env: &ToolchainEnv) -> CheckResult {
    let label = format!("{} layout", toolchain.root_var);
    let Some(root) = env.var(&toolchain.root_var) else {
        return CheckResult::failed(label, format!("{} is not exported", toolchain.root_var));
    };
    let root = Path::new(root);

    let Some(bin) = toolchain_bin_dir(root, env) else {
        return CheckResult::failed(
            label,
            format!("no search-path entry lies under {}", root.display()),
        );
    };
    if !bin.is_dir() {
        return CheckResult::failed(label, format!("{} does not exist", bin.display()));
    }
    CheckResult::passed(label, format!("{} contains {}", root.display(), bin.display()))
}

/// The compiler must resolve from the toolchain's `bin` directory first.
pub fn check_compiler_precedence(
    toolchain: &ToolchainSpec,
    env: &ToolchainEnv,
    base_path: Option<&OsString>,
) -> CheckResult {
    let label = format!("{} precedence", toolchain.compiler);
    let root = env.var(&toolchain.root_var).map(Path::new);
    let Some(bin) = root.and_then(|root| toolchain_bin_dir(root, env)) else {
        return CheckResult::failed(label, "toolchain bin directory is not on the search path");
    };

    let search_path = env.search_path(base_path);
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    let first = which::which_in_all(&toolchain.compiler, Some(&search_path), cwd)
        .ok()
        .and_then(|mut found| found.next());

    match first {
        Some(path) if path.parent() == Some(bin.as_path()) => {
            CheckResult::passed(label, format!("resolves to {}", path.display()))
        }
        Some(path) => CheckResult::failed(
            label,
            format!(
                "resolves to {} before {}",
                path.display(),
                bin.join(&toolchain.compiler).display()
            ),
        ),
        None => CheckResult::failed(label, format!("{} not found on PATH", toolchain.compiler)),
    }
}

/// The framework root must contain each declared header under `include/`
/// and a `lib<name>.*` file somewhere below it for each declared library.
pub fn check_layout(layout: &LayoutSpec, env: &ToolchainEnv) -> CheckResult {
    let label = format!("{} layout", layout.name);
    let Some(root) = env.var(&layout.var) else {
        return CheckResult::failed(label, format!("{} is not exported", layout.var));
    };
    let root = Path::new(root);
    if !root.is_dir() {
        return CheckResult::failed(label, format!("{} is not a directory", root.display()));
    }

    let mut missing = Vec::new();
    for header in &layout.headers {
        if !root.join("include").join(header).is_file() {
            missing.push(format!("include/{header}"));
        }
    }
    for library in &layout.libraries {
        if find_library(root, library).is_none() {
            missing.push(format!("lib{library}"));
        }
    }

    if missing.is_empty() {
        CheckResult::passed(
            label,
            format!(
                "{} has {} header(s), {} librar{}",
                root.display(),
                layout.headers.len(),
                layout.libraries.len(),
                if layout.libraries.len() == 1 { "y" } else { "ies" }
            ),
        )
    } else {
        CheckResult::failed(label, format!("missing {}", missing.join(", ")))
    }
}

/// Locate `lib<name>.a` / `lib<name>.so*` below `root`.
pub fn find_library(root: &Path, name: &str) -> Option<PathBuf> {
    let stem = format!("lib{name}.");
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() || entry.file_type().is_symlink())
        .find(|entry| {
            entry.file_name().to_str().is_some_and(|file| {
                file.strip_prefix(&stem)
                    .is_some_and(|ext| ext == "a" || ext.starts_with("so"))
            })
        })
        .map(|entry| entry.into_path())
}

fn toolchain_bin_dir(root: &Path, env: &ToolchainEnv) -> Option<PathBuf> {
    env.path_prefix()
        .iter()
        .find(|dir| dir.starts_with(root))
        .cloned()
}
