//! Environment export handler: Step::EnvironmentExport
//!
//! The export itself only produces a [`ToolchainEnv`] contribution. When a
//! profile path is declared, the contribution is also written as a shell
//! script so interactive shells pick it up.

use crate::environment::ToolchainEnv;
use crate::error::{ProvisioningError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Handle Step::EnvironmentExport.
pub fn handle_export(
    step: &str,
    path_prefix: &[PathBuf],
    vars: &BTreeMap<String, String>,
    profile: Option<&Path>,
) -> Result<ToolchainEnv> {
    let mut env = ToolchainEnv::new();
    for dir in path_prefix {
        env = env.with_path_prefix(dir.clone());
    }
    for (k, v) in vars {
        env = env.with_var(k.clone(), v.clone());
    }

    for dir in path_prefix {
        if !dir.is_dir() {
            eprintln!(
                "[provision:{step}] warning: search-path entry '{}' is not a directory",
                dir.display()
            );
        }
    }

    if let Some(profile) = profile {
        write_profile(step, profile, &env)?;
        println!("[provision:{step}] wrote profile {}", profile.display());
    }

    println!(
        "[provision:{step}] exported {} variable(s), {} search-path entr{}",
        vars.len(),
        path_prefix.len(),
        if path_prefix.len() == 1 { "y" } else { "ies" }
    );
    Ok(env)
}

/// Write the profile script with mode 0644.
fn write_profile(step: &str, profile: &Path, env: &ToolchainEnv) -> Result<()> {
    let io_err = |action: &'static str, path: &Path, source| ProvisioningError::Io {
        step: step.to_string(),
        action,
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = profile.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("creating directory", parent, e))?;
    }
    fs::write(profile, env.render_profile()).map_err(|e| io_err("writing profile", profile, e))?;
    fs::set_permissions(profile, fs::Permissions::from_mode(0o644))
        .map_err(|e| io_err("setting permissions on", profile, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_handle_export_builds_record() {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("gcc-arm-none-eabi/bin");
        fs::create_dir_all(&bin).unwrap();
        let vars = BTreeMap::from([(
            "ARMGCC_DIR".to_string(),
            temp.path().join("gcc-arm-none-eabi").display().to_string(),
        )]);

        let env = handle_export("toolchain-env", &[bin.clone()], &vars, None).unwrap();

        assert_eq!(env.path_prefix(), &[bin]);
        assert_eq!(env.vars(), &vars);
    }

    #[test]
    fn test_handle_export_writes_profile() {
        let temp = TempDir::new().unwrap();
        let profile = temp.path().join("etc/profile.d/embedded-toolchain.sh");
        let vars = BTreeMap::from([("CPPUTEST_HOME".to_string(), "/opt/cpputest".to_string())]);

        handle_export("toolchain-env", &[], &vars, Some(&profile)).unwrap();

        let content = fs::read_to_string(&profile).unwrap();
        assert!(content.starts_with("# Generated by toolchain-provisioner"));
        assert!(content.contains("export CPPUTEST_HOME='/opt/cpputest'"));
        let mode = fs::metadata(&profile).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
