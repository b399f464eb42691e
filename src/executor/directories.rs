//! Working directory handler: Step::Directory

use crate::error::{ProvisioningError, Result};
use std::fs;
use std::path::Path;

/// Handle Step::Directory: create the directory and any missing parents.
pub fn handle_directory(step: &str, path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| ProvisioningError::Io {
        step: step.to_string(),
        action: "creating directory",
        path: path.to_path_buf(),
        source,
    })?;
    println!("[provision:{step}] directory {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_handle_directory_creates_nested_structure() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("opt/toolchains/downloads");

        handle_directory("downloads", &dir).unwrap();

        assert!(dir.is_dir(), "Directory should be created");
    }

    #[test]
    fn test_handle_directory_idempotent() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("workspace");

        handle_directory("workspace", &dir).unwrap();
        handle_directory("workspace", &dir).unwrap();

        assert!(dir.is_dir());
    }

    #[test]
    fn test_handle_directory_over_file_fails() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("workspace");
        fs::write(&file, "not a dir").unwrap();

        let err = handle_directory("workspace", &file).unwrap_err();

        assert_eq!(err.step(), "workspace");
        assert!(err.to_string().contains("creating directory"));
    }
}
