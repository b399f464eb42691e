//! Archive handler: Step::ArchiveFetchAndExtract
//!
//! Download with `curl`, verify the sha256 when one is declared, unpack with
//! `tar`, then delete the archive. The archive is deleted on failure too.

use super::Tool;
use crate::error::{ProvisioningError, Result};
use crate::runner::Invocation;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Handle Step::ArchiveFetchAndExtract.
pub(crate) fn handle_archive(
    tool: &Tool<'_>,
    url: &str,
    dest: &Path,
    strip_components: u32,
    sha256: Option<&str>,
) -> Result<()> {
    if !tool.dry_run() {
        fs::create_dir_all(dest).map_err(|e| tool.io_error("creating directory", dest, e))?;
    }

    let archive = download_path(dest, url);
    println!("[provision:{}] fetching {url}", tool.step);

    let result = fetch_verify_extract(tool, url, &archive, dest, strip_components, sha256);

    if archive.exists() {
        if let Err(e) = fs::remove_file(&archive) {
            eprintln!(
                "[provision:{}] warning: could not remove '{}': {e}",
                tool.step,
                archive.display()
            );
        }
    }

    result?;
    println!("[provision:{}] unpacked into {}", tool.step, dest.display());
    Ok(())
}

fn fetch_verify_extract(
    tool: &Tool<'_>,
    url: &str,
    archive: &Path,
    dest: &Path,
    strip_components: u32,
    sha256: Option<&str>,
) -> Result<()> {
    tool.run(
        Invocation::new("curl")
            .args(["-fsSL", "-o"])
            .arg(archive.display().to_string())
            .arg(url),
    )?;

    if let Some(expected) = sha256.filter(|_| !tool.dry_run()) {
        let actual = sha256_file(archive).map_err(|e| tool.io_error("hashing", archive, e))?;
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(ProvisioningError::ChecksumMismatch {
                step: tool.step.to_string(),
                path: archive.to_path_buf(),
                expected: expected.trim().to_ascii_lowercase(),
                actual,
            });
        }
    }

    let mut extract = Invocation::new("tar")
        .arg("-xf")
        .arg(archive.display().to_string())
        .arg("-C")
        .arg(dest.display().to_string());
    if strip_components > 0 {
        extract = extract.arg(format!("--strip-components={strip_components}"));
    }
    tool.run(extract)?;
    Ok(())
}

/// Temporary download location: a hidden file next to `dest`, named after
/// the last URL segment.
pub(crate) fn download_path(dest: &Path, url: &str) -> PathBuf {
    let file_name = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("archive");
    let parent = dest.parent().unwrap_or(dest);
    parent.join(format!(".{file_name}.download"))
}

pub(crate) fn sha256_file(path: &Path) -> std::io::Result<String> {
    let f = File::open(path)?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::ToolchainEnv;
    use crate::runner::fake::FakeRunner;
    use crate::runner::CommandOutput;
    use tempfile::TempDir;

    const BODY: &[u8] = b"fake toolchain archive";

    fn body_sha() -> String {
        format!("{:x}", Sha256::digest(BODY))
    }

    #[test]
    fn download_path_uses_last_segment() {
        let path = download_path(
            Path::new("/opt/toolchains/gcc-arm-none-eabi"),
            "https://developer.arm.com/-/media/files/arm-gnu-toolchain.tar.xz?rev=1",
        );
        assert_eq!(
            path,
            PathBuf::from("/opt/toolchains/.arm-gnu-toolchain.tar.xz.download")
        );
    }

    #[test]
    fn fetch_extract_and_discard() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("gcc-arm-none-eabi");
        let runner = FakeRunner::new().with_download(BODY);
        let env = ToolchainEnv::new();
        let tool = Tool {
            step: "arm-gnu-toolchain",
            env: &env,
            runner: &runner,
        };

        handle_archive(
            &tool,
            "https://example.invalid/tc.tar.xz",
            &dest,
            1,
            Some(&body_sha()),
        )
        .unwrap();

        assert!(dest.is_dir());
        assert_eq!(runner.programs(), vec!["curl", "tar"]);
        let lines = runner.command_lines();
        assert!(lines[1].ends_with("--strip-components=1"));
        assert!(!download_path(&dest, "https://example.invalid/tc.tar.xz").exists());
    }

    #[test]
    fn checksum_mismatch_is_fatal_and_skips_extract() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("cmake");
        let runner = FakeRunner::new().with_download(BODY);
        let env = ToolchainEnv::new();
        let tool = Tool {
            step: "cmake",
            env: &env,
            runner: &runner,
        };

        let err = handle_archive(
            &tool,
            "https://example.invalid/cmake.tar.gz",
            &dest,
            0,
            Some(&"0".repeat(64)),
        )
        .unwrap_err();

        assert!(matches!(err, ProvisioningError::ChecksumMismatch { .. }));
        assert_eq!(runner.programs(), vec!["curl"]);
        assert!(!download_path(&dest, "https://example.invalid/cmake.tar.gz").exists());
    }

    #[test]
    fn failed_download_reports_curl_status() {
        let temp = TempDir::new().unwrap();
        let runner = FakeRunner::new().answer("curl", CommandOutput::failed(22, "404"));
        let env = ToolchainEnv::new();
        let tool = Tool {
            step: "cmake",
            env: &env,
            runner: &runner,
        };

        let err = handle_archive(
            &tool,
            "https://example.invalid/cmake.tar.gz",
            &temp.path().join("cmake"),
            0,
            None,
        )
        .unwrap_err();

        assert_eq!(err.exit_code(), Some(22));
        assert!(err.to_string().contains("curl"));
    }

    #[test]
    fn sha256_file_matches_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("blob");
        fs::write(&path, BODY).unwrap();
        assert_eq!(sha256_file(&path).unwrap(), body_sha());
    }
}
