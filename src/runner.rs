//! External tool invocation.
//!
//! Every package manager, downloader and build tool is reached through
//! [`CommandRunner`]. [`SystemRunner`] spawns real processes; [`DryRunRunner`]
//! only prints what would run.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Capture stdout/stderr instead of passing them through.
    pub capture: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            capture: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn captured(mut self) -> Self {
        self.capture = true;
        self
    }

    /// Build an invocation from an argv vector. Returns `None` for an empty vector.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, rest) = argv.split_first()?;
        Some(Self::new(program.clone()).args(rest.iter().cloned()))
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        if let Some(cwd) = &self.cwd {
            write!(f, "  (in {})", cwd.display())?;
        }
        Ok(())
    }
}

/// Result of running an [`Invocation`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code 0 with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Non-zero exit with the given stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Collaborator that executes external tools.
pub trait CommandRunner {
    /// Run the invocation to completion.
    ///
    /// `Err` means the process could not be started; a process that ran and
    /// failed is `Ok` with a non-zero [`CommandOutput::code`].
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;

    /// True when commands are only printed. Handlers then skip their direct
    /// filesystem writes as well.
    fn dry_run(&self) -> bool {
        false
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        (**self).run(invocation)
    }

    fn dry_run(&self) -> bool {
        (**self).dry_run()
    }
}

/// Runs real processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    /// Echo every command line before running it.
    pub verbose: bool,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self {
            verbose: std::env::var("PROVISION_VERBOSE").is_ok_and(|v| v == "1"),
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        if self.verbose {
            eprintln!("[run] {invocation}");
        }

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args).envs(&invocation.env);
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }

        if invocation.capture {
            let output = cmd.stdin(Stdio::null()).output()?;
            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        } else {
            let status = cmd.status()?;
            Ok(CommandOutput {
                code: status.code(),
                ..CommandOutput::default()
            })
        }
    }
}

/// Prints each invocation and pretends it succeeded.
#[derive(Debug, Clone, Default)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        println!("[dry-run] {invocation}");
        Ok(CommandOutput::ok(""))
    }

    fn dry_run(&self) -> bool {
        true
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let inv = Invocation::new("sh").args(["-c", "echo hi"]).cwd("/tmp");
        assert_eq!(inv.to_string(), "sh -c 'echo hi'  (in /tmp)");
    }

    #[test]
    fn from_argv_splits_program() {
        let argv = vec!["make".to_string(), "install".to_string()];
        let inv = Invocation::from_argv(&argv).unwrap();
        assert_eq!(inv.program, "make");
        assert_eq!(inv.args, vec!["install"]);
        assert!(Invocation::from_argv(&[]).is_none());
    }

    #[test]
    fn system_runner_captures_output() {
        let runner = SystemRunner { verbose: false };
        let out = runner
            .run(&Invocation::new("sh").args(["-c", "echo hello"]).captured())
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn system_runner_reports_exit_code() {
        let runner = SystemRunner { verbose: false };
        let out = runner
            .run(&Invocation::new("sh").args(["-c", "exit 3"]).captured())
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
    }

    #[test]
    fn system_runner_spawn_failure_is_err() {
        let runner = SystemRunner { verbose: false };
        let result = runner.run(&Invocation::new("definitely_not_a_real_command_12345").captured());
        assert!(result.is_err());
    }

    #[test]
    fn output_path_arg_finds_dash_o() {
        use super::fake::output_path_arg;
        use std::path::Path;

        let args: Vec<String> = ["-fsSL", "-o", "/tmp/a.tar", "https://x"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(output_path_arg(&args), Some(Path::new("/tmp/a.tar")));
    }
}
