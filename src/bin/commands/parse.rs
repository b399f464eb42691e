use anyhow::{bail, Result};
use std::path::PathBuf;

/// Flags shared by the subcommands. Each subcommand accepts a subset.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Options {
    pub(crate) manifest: Option<PathBuf>,
    pub(crate) dry_run: bool,
    pub(crate) skip_base_check: bool,
    pub(crate) compare: bool,
}

pub(crate) const MANIFEST: &str = "--manifest";
pub(crate) const DRY_RUN: &str = "--dry-run";
pub(crate) const SKIP_BASE_CHECK: &str = "--skip-base-check";
pub(crate) const COMPARE: &str = "--compare";

pub(crate) fn parse_options(command: &str, args: &[String], allowed: &[&str]) -> Result<Options> {
    let mut opts = Options::default();
    let mut rest = args.iter();

    while let Some(arg) = rest.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value)),
            _ => (arg.as_str(), None),
        };
        if !allowed.contains(&flag) {
            bail!(
                "unsupported argument '{}' for `provision {}`; expected: {}",
                arg,
                command,
                if allowed.is_empty() {
                    "no arguments".to_string()
                } else {
                    allowed.join(", ")
                }
            );
        }

        match flag {
            MANIFEST => {
                let value = match inline {
                    Some(value) => value.to_string(),
                    None => match rest.next() {
                        Some(value) => value.clone(),
                        None => bail!("{} requires a path", MANIFEST),
                    },
                };
                if value.trim().is_empty() {
                    bail!("{} requires a path", MANIFEST);
                }
                opts.manifest = Some(PathBuf::from(value));
            }
            _ if inline.is_some() => bail!("{} does not take a value", flag),
            DRY_RUN => opts.dry_run = true,
            SKIP_BASE_CHECK => opts.skip_base_check = true,
            COMPARE => opts.compare = true,
            other => bail!("unhandled argument '{}'", other),
        }
    }

    Ok(opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_arguments_gives_defaults() {
        let opts = parse_options("plan", &[], &[MANIFEST]).unwrap();
        assert_eq!(opts, Options::default());
    }

    #[test]
    fn manifest_separate_and_inline() {
        let opts = parse_options("run", &args(&["--manifest", "env.toml"]), &[MANIFEST]).unwrap();
        assert_eq!(opts.manifest, Some(PathBuf::from("env.toml")));

        let opts = parse_options("run", &args(&["--manifest=/etc/env.toml"]), &[MANIFEST]).unwrap();
        assert_eq!(opts.manifest, Some(PathBuf::from("/etc/env.toml")));
    }

    #[test]
    fn manifest_without_value_is_rejected() {
        let err = parse_options("run", &args(&["--manifest"]), &[MANIFEST]).unwrap_err();
        assert!(err.to_string().contains("requires a path"));
    }

    #[test]
    fn flags_are_scoped_to_subcommand() {
        let opts = parse_options(
            "run",
            &args(&["--dry-run", "--skip-base-check"]),
            &[MANIFEST, DRY_RUN, SKIP_BASE_CHECK],
        )
        .unwrap();
        assert!(opts.dry_run);
        assert!(opts.skip_base_check);

        let err = parse_options("verify", &args(&["--dry-run"]), &[MANIFEST, COMPARE]).unwrap_err();
        assert!(err.to_string().contains("unsupported argument '--dry-run'"));
    }

    #[test]
    fn boolean_flags_reject_values() {
        let err = parse_options("verify", &args(&["--compare=yes"]), &[COMPARE]).unwrap_err();
        assert!(err.to_string().contains("does not take a value"));
    }
}
