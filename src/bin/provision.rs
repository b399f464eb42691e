use anyhow::{bail, Result};

mod commands;

use commands::{parse_options, COMPARE, DRY_RUN, MANIFEST, SKIP_BASE_CHECK};

fn usage() -> &'static str {
    "Usage:\n  provision plan [--manifest <path>]\n  provision run [--manifest <path>] [--dry-run] [--skip-base-check]\n  provision verify [--manifest <path>] [--compare]\n  provision env [--manifest <path>]\n  provision shell [--manifest <path>]\n  provision preflight [--manifest <path>] [--skip-base-check]\n\nEnvironment:\n  PROVISION_MANIFEST   manifest path when --manifest is not given (default: built-in embedded ARM manifest)\n  PROVISION_STATE_DIR  receipt and lock directory\n  PROVISION_VERBOSE=1  echo every command before running it"
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let Some((command, rest)) = args.split_first() else {
        bail!(usage());
    };

    match command.as_str() {
        "plan" => commands::plan(&parse_options(command, rest, &[MANIFEST])?),
        "run" => commands::run(&parse_options(
            command,
            rest,
            &[MANIFEST, DRY_RUN, SKIP_BASE_CHECK],
        )?),
        "verify" => commands::verify(&parse_options(command, rest, &[MANIFEST, COMPARE])?),
        "env" => commands::env(&parse_options(command, rest, &[MANIFEST])?),
        "shell" => {
            let code = commands::shell(&parse_options(command, rest, &[MANIFEST])?)?;
            std::process::exit(code);
        }
        "preflight" => {
            commands::preflight_cmd(&parse_options(command, rest, &[MANIFEST, SKIP_BASE_CHECK])?)
        }
        "help" | "--help" | "-h" => {
            println!("{}", usage());
            Ok(())
        }
        _ => bail!(usage()),
    }
}
