//! Reproducible provisioning of an embedded ARM development environment.
//!
//! A manifest of tool specifications is turned into an ordered list of
//! [`Step`]s, applied one at a time through a [`runner::CommandRunner`],
//! and then checked by a verification pass that records each tool's version.
//!
//! - **Steps** - Declarative step kinds with phases (directories, packages,
//!   archives, source builds, environment exports)
//! - **Manifest** - TOML tool specifications, with a built-in default
//! - **Sequencer** - Strict in-order execution that stops at the first failure
//! - **Verification** - Per-tool version checks and environment invariants
//! - **Receipts** - Run records used to detect version drift
//!
//! # Architecture
//!
//! ```text
//! manifest ──> [Step] ──> sequencer ──> executor ──> CommandRunner
//!                              │                        (system, dry-run, fake)
//!                              └── ToolchainEnv ──> verify ──> receipt
//! ```
//!
//! # Example
//!
//! ```rust
//! use toolchain_provisioner::step::{self, Phase};
//!
//! let steps = vec![
//!     step::export("toolchain-env", ["/opt/tc/bin"], [("ARMGCC_DIR", "/opt/tc")]),
//!     step::archive("toolchain", "https://example.invalid/tc.tar.xz", "/opt/tc"),
//!     step::directory("workspace", "/workspace"),
//! ];
//! let plan = step::ordered(&steps);
//! assert_eq!(plan[0].phase(), Phase::Filesystem);
//! assert_eq!(plan[2].name(), "toolchain-env");
//! ```

pub mod environment;
pub mod error;
pub mod executor;
pub mod manifest;
pub mod preflight;
pub mod receipt;
pub mod runner;
pub mod sequencer;
pub mod step;
pub mod verify;

pub use environment::ToolchainEnv;
pub use error::ProvisioningError;
pub use manifest::Manifest;
pub use sequencer::{ProvisionOutcome, Provisioner};
pub use step::{Phase, Step};
