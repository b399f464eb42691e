use anyhow::{bail, Context, Result};
use toolchain_provisioner::manifest::{self, DEFAULT_SHELL};
use toolchain_provisioner::runner::{CommandRunner, Invocation, SystemRunner};

use super::parse::Options;

/// Print the toolchain exports for `eval "$(provision env)"`.
pub(crate) fn env(opts: &Options) -> Result<()> {
    let manifest = manifest::load(opts.manifest.as_deref())?;
    print!("{}", manifest.declared_env().render_exports());
    Ok(())
}

/// Open the workspace shell with the toolchain environment applied.
/// Returns the shell's exit code.
pub(crate) fn shell(opts: &Options) -> Result<i32> {
    let manifest = manifest::load(opts.manifest.as_deref())?;
    let env = manifest.declared_env();
    let program = manifest
        .workspace
        .as_ref()
        .map(|ws| ws.shell.as_str())
        .unwrap_or(DEFAULT_SHELL);

    let mut invocation = Invocation::new(program);
    if let Some(dir) = env.workdir() {
        if !dir.is_dir() {
            bail!(
                "workspace '{}' does not exist; run `provision run` first",
                dir.display()
            );
        }
        invocation = invocation.cwd(dir);
    }
    env.apply(&mut invocation);

    let output = SystemRunner::default()
        .run(&invocation)
        .with_context(|| format!("starting shell '{program}'"))?;
    Ok(output.code.unwrap_or(1))
}
