//! Provisioning receipts.
//!
//! A receipt records what a run applied and which tool versions the
//! verification pass saw. Comparing the versions of two receipts shows
//! whether re-provisioning from the same manifest was reproducible.
//!
//! Runs against one state directory are serialized with an advisory lock.

use crate::environment::ToolchainEnv;
use crate::verify::VerificationReport;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const RECEIPT_FILENAME: &str = "receipt.json";
const LOCK_FILENAME: &str = "provision.lock";

/// Record of one successful provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Manifest path or built-in label.
    pub manifest: String,
    pub manifest_sha256: String,
    pub provisioned_at_unix: u64,
    pub applied_steps: Vec<String>,
    #[serde(default)]
    pub path_prefix: Vec<PathBuf>,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub verification: VerificationReport,
}

impl Receipt {
    pub fn new(
        manifest: &str,
        manifest_sha256: &str,
        applied_steps: Vec<String>,
        env: &ToolchainEnv,
        verification: VerificationReport,
    ) -> Self {
        Self {
            manifest: manifest.to_string(),
            manifest_sha256: manifest_sha256.to_string(),
            provisioned_at_unix: now_unix(),
            applied_steps,
            path_prefix: env.path_prefix().to_vec(),
            vars: env.vars().clone(),
            verification,
        }
    }

    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(RECEIPT_FILENAME)
    }

    /// Load the receipt from a state directory, if one exists.
    pub fn load(state_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(state_dir);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes =
            fs::read(&path).with_context(|| format!("reading receipt '{}'", path.display()))?;
        let receipt = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing receipt '{}'", path.display()))?;
        Ok(Some(receipt))
    }

    /// Write the receipt atomically (temp file + rename).
    pub fn save(&self, state_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("creating state directory '{}'", state_dir.display()))?;
        let path = Self::path(state_dir);
        let tmp = state_dir.join(format!(".{RECEIPT_FILENAME}.tmp"));
        let json = serde_json::to_vec_pretty(self).context("serializing receipt")?;
        fs::write(&tmp, json).with_context(|| format!("writing '{}'", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("renaming '{}' to '{}'", tmp.display(), path.display()))?;
        Ok(path)
    }

    /// Environment record as it was at the end of the run.
    pub fn env(&self) -> ToolchainEnv {
        let mut env = ToolchainEnv::new();
        for dir in &self.path_prefix {
            env = env.with_path_prefix(dir.clone());
        }
        for (k, v) in &self.vars {
            env = env.with_var(k.clone(), v.clone());
        }
        env
    }
}

/// Exclusive lock on a state directory, released on drop.
#[derive(Debug)]
pub struct ProvisionLock {
    _file: File,
    path: PathBuf,
}

impl ProvisionLock {
    /// Take the lock without waiting. Fails if another run holds it.
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("creating state directory '{}'", state_dir.display()))?;
        let path = state_dir.join(LOCK_FILENAME);

        // The lock file is never unlinked; removing a held lock file would
        // let a second process lock a fresh inode at the same path.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to create lock file: {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            drop(file);
            anyhow::bail!(
                "Another provisioning run holds the lock: {}",
                path.display()
            );
        }

        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A tool whose version changed between two verification passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDrift {
    pub tool: String,
    pub previous: Option<String>,
    pub current: Option<String>,
}

impl std::fmt::Display for VersionDrift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.tool,
            self.previous.as_deref().unwrap_or("(unavailable)"),
            self.current.as_deref().unwrap_or("(unavailable)")
        )
    }
}

/// Tools whose version line differs, or that appear in only one report.
pub fn compare_versions(
    previous: &VerificationReport,
    current: &VerificationReport,
) -> Vec<VersionDrift> {
    let before = previous.versions();
    let after = current.versions();
    let tools: BTreeSet<&String> = before.keys().chain(after.keys()).collect();

    tools
        .into_iter()
        .filter_map(|tool| {
            let prev = before.get(tool);
            let cur = after.get(tool);
            (prev != cur).then(|| VersionDrift {
                tool: tool.clone(),
                previous: prev.cloned(),
                current: cur.cloned(),
            })
        })
        .collect()
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::CheckResult;
    use tempfile::TempDir;

    fn report(entries: &[(&str, Option<&str>)]) -> VerificationReport {
        let mut report = VerificationReport::default();
        for (tool, version) in entries {
            report.push(match version {
                Some(v) => CheckResult::passed(*tool, *v),
                None => CheckResult::failed(*tool, "missing"),
            });
        }
        report
    }

    #[test]
    fn save_then_load() {
        let temp = TempDir::new().unwrap();
        let env = ToolchainEnv::new()
            .with_path_prefix("/opt/toolchains/gcc-arm-none-eabi/bin")
            .with_var("ARMGCC_DIR", "/opt/toolchains/gcc-arm-none-eabi");
        let receipt = Receipt::new(
            "builtin:embedded-arm",
            &"a".repeat(64),
            vec!["workspace".into(), "toolchain-env".into()],
            &env,
            report(&[("Git", Some("git version 2.34.1")), ("Ruby", None)]),
        );

        let path = receipt.save(temp.path()).unwrap();
        assert!(path.ends_with("receipt.json"));

        let loaded = Receipt::load(temp.path()).unwrap().unwrap();
        assert_eq!(loaded, receipt);
        assert_eq!(loaded.env(), env);
    }

    #[test]
    fn load_missing_receipt_is_none() {
        let temp = TempDir::new().unwrap();
        assert!(Receipt::load(temp.path()).unwrap().is_none());
    }

    #[test]
    fn lock_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let held = ProvisionLock::acquire(temp.path()).unwrap();
        assert!(held.path().exists());

        let second = ProvisionLock::acquire(temp.path());
        assert!(second.is_err());

        drop(held);
        assert!(ProvisionLock::acquire(temp.path()).is_ok());
    }

    #[test]
    fn identical_reports_have_no_drift() {
        let a = report(&[("CMake", Some("cmake version 3.27.9"))]);
        assert!(compare_versions(&a, &a.clone()).is_empty());
    }

    #[test]
    fn drift_reports_changed_and_lost_tools() {
        let before = report(&[
            ("West", Some("v1.2.0")),
            ("Ruby", Some("ruby 3.0.2")),
            ("Git", Some("git version 2.34.1")),
        ]);
        let after = report(&[
            ("West", Some("v1.3.0")),
            ("Ruby", None),
            ("Git", Some("git version 2.34.1")),
        ]);

        let drift = compare_versions(&before, &after);

        assert_eq!(drift.len(), 2);
        assert_eq!(drift[0].to_string(), "Ruby: ruby 3.0.2 -> (unavailable)");
        assert_eq!(drift[1].to_string(), "West: v1.2.0 -> v1.3.0");
    }
}
