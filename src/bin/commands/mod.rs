mod parse;
mod provision;
mod shell;

pub(crate) use parse::{parse_options, COMPARE, DRY_RUN, MANIFEST, SKIP_BASE_CHECK};
pub(crate) use provision::{plan, preflight_cmd, run, verify};
pub(crate) use shell::{env, shell};
