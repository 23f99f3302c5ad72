// src/commands/build.rs
//! Build commands: cook and verify

use anyhow::{Context, Result};
use spec_kitchen::recipe::{Kitchen, KitchenConfig};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::Session;
use crate::cli::FeatureArgs;

/// Options of `spec-kitchen cook`
pub struct CookArgs {
    pub flags: FeatureArgs,
    pub topdir: Option<PathBuf>,
    pub buildroot: Option<PathBuf>,
    pub sourcedir: Option<PathBuf>,
    pub nocheck: bool,
    pub strict_files: bool,
    pub report: Option<PathBuf>,
    pub log: Option<PathBuf>,
}

/// Cook a descriptor into a populated build root
pub fn cmd_cook(session: &Session, spec: &Path, args: &CookArgs) -> Result<()> {
    let descriptor = session.load(spec)?;
    println!("Recipe: {} ({})", descriptor.package.name, descriptor.evr());

    let config = kitchen_config(session, args);
    let resolver = session
        .config
        .resolver()
        .context("Failed to set up the dependency resolver")?;
    let kitchen = Kitchen::with_resolver(config, resolver);

    println!("Cooking in {}", kitchen.config().builddir.display());
    if !kitchen.config().run_check {
        println!("  - %check disabled");
    }

    let overrides = session.overrides(&args.flags);
    let result = kitchen.cook(&descriptor, &overrides).with_context(|| match &args.log {
        Some(path) => format!(
            "Failed to cook {} (build log: {})",
            descriptor.package.name,
            path.display()
        ),
        None => format!("Failed to cook {}", descriptor.package.name),
    })?;

    if let Some(path) = &args.log {
        println!("Build log written to {}", path.display());
    }
    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&result)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    println!("\n[COMPLETE] Cooked: {}", result.package);
    println!("  Build root: {}", result.buildroot.display());
    for phase in &result.phases {
        println!(
            "  {}: {} command(s) in {} ms",
            phase.phase.section(),
            phase.commands_run,
            phase.duration_ms
        );
    }
    println!(
        "  Manifest: {} entries checked, {} paths matched",
        result.manifest.checked,
        result.manifest.matched.len()
    );

    if !result.checks_passed() {
        println!("\n[WARNING] {} %check command(s) failed:", result.check_failures.len());
        for failure in &result.check_failures {
            println!("  - `{}`: {}", failure.command, failure.status);
        }
    }
    if !result.warnings.is_empty() {
        println!("\nBuild warnings:");
        for warning in &result.warnings {
            println!("  - {}", warning);
        }
    }

    info!("Successfully cooked {} into {}", result.package, result.buildroot.display());
    Ok(())
}

/// Check an existing build root without running anything
pub fn cmd_verify(
    session: &Session,
    spec: &Path,
    flags: &FeatureArgs,
    buildroot: &Path,
    strict_files: bool,
) -> Result<()> {
    let descriptor = session.load(spec)?;

    let mut config = session.config.kitchen_config();
    config.buildroot = buildroot.to_path_buf();
    if strict_files {
        config.manifest.strict_unpackaged = true;
    }
    let kitchen = Kitchen::new(config);

    let report = kitchen
        .verify(&descriptor, &session.overrides(flags))
        .with_context(|| format!("{} does not match %files", buildroot.display()))?;

    for path in &report.unpackaged {
        println!("Warning: installed but unpackaged: {}", path);
    }
    for path in &report.skipped {
        println!("Skipped (build tree): {}", path);
    }
    println!(
        "[OK] {} entries checked, {} paths matched",
        report.checked,
        report.matched.len()
    );
    Ok(())
}

/// File config first, then command line flags
fn kitchen_config(session: &Session, args: &CookArgs) -> KitchenConfig {
    let mut config = session.config.kitchen_config();
    if let Some(topdir) = &args.topdir {
        let laid_out = KitchenConfig::with_topdir(topdir);
        config.builddir = laid_out.builddir;
        config.sourcedir = laid_out.sourcedir;
        config.buildroot = laid_out.buildroot;
    }
    if let Some(dir) = &args.sourcedir {
        config.sourcedir = dir.clone();
    }
    if let Some(dir) = &args.buildroot {
        config.buildroot = dir.clone();
    }
    if args.nocheck {
        config.run_check = false;
    }
    if args.strict_files {
        config.manifest.strict_unpackaged = true;
    }
    if args.log.is_some() {
        config.log_file = args.log.clone();
    }
    config
}
