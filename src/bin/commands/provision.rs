use anyhow::{Context, Result};
use time::OffsetDateTime;
use toolchain_provisioner::manifest::{self, Manifest};
use toolchain_provisioner::receipt::{compare_versions, ProvisionLock, Receipt};
use toolchain_provisioner::runner::{CommandRunner, DryRunRunner, SystemRunner};
use toolchain_provisioner::sequencer::validate_order;
use toolchain_provisioner::verify::{invariants, run_checks, VerificationReport};
use toolchain_provisioner::{preflight, Provisioner, Step, ToolchainEnv};

use super::parse::Options;

pub(crate) fn plan(opts: &Options) -> Result<()> {
    let manifest = manifest::load(opts.manifest.as_deref())?;
    let plan = manifest.plan();
    validate_order(&plan, false)
        .with_context(|| format!("validating step order of '{}'", manifest.origin))?;

    println!("[plan] manifest {} (sha256 {})", manifest.origin, manifest.digest());
    println!("[plan] step order: {}", manifest.order);
    for (index, step) in plan.iter().enumerate() {
        println!(
            "{:>3}. [{}] {} ({}): {}",
            index + 1,
            step.phase(),
            step.name(),
            step.kind(),
            step.describe()
        );
    }

    let bootstrap = preflight::bootstrap_tools(&plan);
    if !bootstrap.is_empty() {
        let tools = bootstrap
            .iter()
            .map(|(tool, _)| *tool)
            .collect::<Vec<_>>()
            .join(", ");
        println!("[plan] host tools needed before the first step: {tools}");
    }

    let floating = plan
        .iter()
        .filter_map(|step| match step {
            Step::PackageInstall { packages, .. } => Some(packages),
            _ => None,
        })
        .flatten()
        .filter(|package| package.is_floating())
        .map(|package| package.to_string())
        .collect::<Vec<_>>();
    if !floating.is_empty() {
        println!(
            "[plan] not pinned, may drift between runs: {}",
            floating.join(" ")
        );
    }
    println!("[plan] {} verification check(s)", manifest.checks().len());
    Ok(())
}

pub(crate) fn preflight_cmd(opts: &Options) -> Result<()> {
    let manifest = manifest::load(opts.manifest.as_deref())?;
    host_checks(&manifest, opts.skip_base_check)?;
    println!("[preflight] host is ready for '{}'", manifest.origin);
    Ok(())
}

pub(crate) fn run(opts: &Options) -> Result<()> {
    let manifest = manifest::load(opts.manifest.as_deref())?;

    if opts.dry_run {
        println!("[provision] dry run of '{}'; nothing is changed", manifest.origin);
        Provisioner::new(DryRunRunner)
            .declared_paths_only()
            .run(manifest.plan())?;
        return Ok(());
    }

    host_checks(&manifest, opts.skip_base_check)?;

    let state_dir = manifest.effective_state_dir();
    let _lock = ProvisionLock::acquire(&state_dir)?;

    let runner = SystemRunner::new();
    let outcome = Provisioner::new(&runner).run(manifest.plan())?;
    let env = match &manifest.workspace {
        Some(ws) => outcome.env.with_workdir(ws.dir.clone()),
        None => outcome.env,
    };

    let report = verification(&manifest, &env, &runner);
    print!("{}", report.render());

    let previous = Receipt::load(&state_dir)?;
    if let Some(previous) = &previous {
        report_drift(previous, &report);
    }

    let receipt = Receipt::new(
        &manifest.origin,
        manifest.digest(),
        outcome.applied,
        &env,
        report,
    );
    let path = receipt.save(&state_dir)?;
    println!("[provision] receipt written to {}", path.display());
    Ok(())
}

pub(crate) fn verify(opts: &Options) -> Result<()> {
    let manifest = manifest::load(opts.manifest.as_deref())?;
    let env = manifest.declared_env();
    let report = verification(&manifest, &env, &SystemRunner::new());
    print!("{}", report.render());

    if opts.compare {
        let state_dir = manifest.effective_state_dir();
        match Receipt::load(&state_dir)? {
            Some(receipt) => {
                if receipt.manifest_sha256 != manifest.digest() {
                    println!(
                        "[verify] note: receipt was written for a different manifest ({})",
                        receipt.manifest
                    );
                }
                report_drift(&receipt, &report);
            }
            None => println!(
                "[verify] no receipt in {}; nothing to compare",
                state_dir.display()
            ),
        }
    }
    Ok(())
}

/// Version checks followed by environment invariants.
fn verification(
    manifest: &Manifest,
    env: &ToolchainEnv,
    runner: &dyn CommandRunner,
) -> VerificationReport {
    println!("[verify] running {} check(s)", manifest.checks().len());
    let mut report = run_checks(manifest.checks(), env, runner);
    report.extend(invariants::check_environment(
        manifest.toolchain.as_ref(),
        &manifest.layouts,
        env,
        std::env::var_os("PATH").as_ref(),
    ));
    report
}

fn report_drift(previous: &Receipt, current: &VerificationReport) {
    println!(
        "[verify] comparing with the run of {}",
        format_unix(previous.provisioned_at_unix)
    );
    let drift = compare_versions(&previous.verification, current);
    if drift.is_empty() {
        println!("[verify] tool versions match the previous run");
        return;
    }
    println!("[verify] {} tool version(s) changed since the previous run:", drift.len());
    for entry in drift {
        println!("  {entry}");
    }
}

fn host_checks(manifest: &Manifest, skip_base_check: bool) -> Result<()> {
    if skip_base_check {
        println!("[preflight] skipping base system check");
    } else {
        preflight::check_host_base(&manifest.base)?;
    }
    preflight::check_bootstrap_tools(&manifest.plan())
}

fn format_unix(secs: u64) -> String {
    let Some(at) = i64::try_from(secs)
        .ok()
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
    else {
        return secs.to_string();
    };
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        at.year(),
        at.month() as u8,
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}
