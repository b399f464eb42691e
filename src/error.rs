//! Fatal provisioning errors.
//!
//! Verification failures are not errors; they are reported as
//! [`crate::verify::CheckResult`] values.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for step execution.
pub type Result<T> = std::result::Result<T, ProvisioningError>;

/// Errors that abort a provisioning run.
#[derive(Error, Debug)]
pub enum ProvisioningError {
    /// An external tool ran and exited unsuccessfully.
    #[error("step '{step}': `{program}` exited with {}", describe_code(.code))]
    CommandFailed {
        step: String,
        program: String,
        /// `None` when the process was terminated by a signal.
        code: Option<i32>,
    },

    /// An external tool could not be started at all.
    #[error("step '{step}': failed to start `{program}`: {source}")]
    Spawn {
        step: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem operation performed by the provisioner itself failed.
    #[error("step '{step}': {action} '{}': {source}", .path.display())]
    Io {
        step: String,
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A downloaded archive did not match its declared digest.
    #[error("step '{step}': sha256 mismatch for '{}': expected {expected}, got {actual}", .path.display())]
    ChecksumMismatch {
        step: String,
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// A step consumes a path that no earlier step produces.
    #[error("step '{step}' requires '{}' but no earlier step provides it and it does not exist", .path.display())]
    Ordering { step: String, path: PathBuf },

    /// A step descriptor is malformed.
    #[error("step '{step}': {message}")]
    InvalidStep { step: String, message: String },
}

impl ProvisioningError {
    /// Name of the step that failed.
    pub fn step(&self) -> &str {
        match self {
            Self::CommandFailed { step, .. }
            | Self::Spawn { step, .. }
            | Self::Io { step, .. }
            | Self::ChecksumMismatch { step, .. }
            | Self::Ordering { step, .. }
            | Self::InvalidStep { step, .. } => step,
        }
    }

    /// Exit code of the underlying tool, if the failure came from one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { code, .. } => *code,
            _ => None,
        }
    }
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "termination by signal".to_string(),
    }
}
