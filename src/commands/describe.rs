// src/commands/describe.rs
//! Descriptor commands: inspect, lint, features, render

use anyhow::{Context, Result};
use spec_kitchen::features::Condition;
use spec_kitchen::recipe::{
    Descriptor, DependencyKind, validate_descriptor, write_descriptor, write_descriptor_file,
};
use std::path::Path;
use strum::IntoEnumIterator;

use super::Session;
use crate::cli::FeatureArgs;

/// Load a descriptor and print a summary (or the model as JSON)
pub fn cmd_inspect(session: &Session, spec: &Path, json: bool) -> Result<()> {
    let descriptor = session.load(spec)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptor)?);
        return Ok(());
    }

    let pkg = &descriptor.package;
    println!("Package: {}", descriptor.nevr());
    if let Some(channel) = &pkg.channel {
        println!("  Channel: {}", channel);
    }
    if !pkg.summary.is_empty() {
        println!("  Summary: {}", pkg.summary);
    }
    if !pkg.license.is_empty() {
        println!("  License: {}", pkg.license);
    }
    if let Some(url) = &pkg.url {
        println!("  URL: {}", url);
    }
    if let Some(arch) = &pkg.build_arch {
        println!("  BuildArch: {}", arch);
    }
    for source in &pkg.sources {
        println!("  Source{}: {}", source.index, source.location);
    }
    for patch in &pkg.patches {
        println!("  Patch{}: {}", patch.index, patch.location);
    }

    if !descriptor.features.is_empty() {
        println!("\nFeature flags:");
        for flag in descriptor.features.iter() {
            let default = if flag.default_enabled { "on" } else { "off" };
            println!("  {} (default {})", flag.name, default);
        }
    }

    for kind in DependencyKind::iter() {
        let refs: Vec<_> = descriptor.dependencies.of_kind(kind).collect();
        if refs.is_empty() {
            continue;
        }
        println!("\n{} ({}):", kind, refs.len());
        for dep in refs {
            println!("  {}{}", dep.to_entry_string(), gate(dep.condition.as_ref()));
        }
    }
    if !descriptor.dependencies.provides.is_empty() {
        println!("\nProvides ({}):", descriptor.dependencies.provides.len());
        for p in &descriptor.dependencies.provides {
            println!("  {}{}", p.to_entry_string(), gate(p.condition.as_ref()));
        }
    }

    println!("\nPhases:");
    for phase in descriptor.recipe.iter() {
        println!(
            "  {} ({} commands){}",
            phase.phase.section(),
            phase.commands.len(),
            gate(phase.condition.as_ref())
        );
    }

    println!("\nFiles: {} entries", descriptor.files.entries.len());
    match descriptor.changelog.latest() {
        Some(latest) => println!(
            "Changelog: {} entries, latest {} ({})",
            descriptor.changelog.len(),
            latest.version,
            latest.date
        ),
        None => println!("Changelog: empty"),
    }

    Ok(())
}

/// Print validation warnings
pub fn cmd_lint(session: &Session, spec: &Path, strict: bool) -> Result<()> {
    let descriptor = session.load(spec)?;
    let warnings = validate_descriptor(&descriptor)
        .with_context(|| format!("{} failed validation", spec.display()))?;

    for warning in &warnings {
        println!("Warning: {}", warning);
    }

    if warnings.is_empty() {
        println!("[OK] No issues found");
    } else {
        println!("[OK] {} warning(s)", warnings.len());
        if strict {
            anyhow::bail!("{} warning(s) in {}", warnings.len(), spec.display());
        }
    }
    Ok(())
}

/// Print every declared flag with its effective value
pub fn cmd_features(session: &Session, spec: &Path, flags: &FeatureArgs) -> Result<()> {
    let descriptor = session.load(spec)?;
    let overrides = session.overrides(flags);
    let enabled = descriptor.enabled_features(&overrides);

    if descriptor.features.is_empty() {
        println!("{} declares no feature flags", descriptor.package.name);
        return Ok(());
    }

    for flag in descriptor.features.iter() {
        let state = if enabled.is_enabled(&flag.name) { "on" } else { "off" };
        let source = match overrides.get(&flag.name) {
            Some(_) => "override",
            None => "default",
        };
        println!("{:<24} {:<4} ({})", flag.name, state, source);
    }

    for (name, _) in overrides.iter() {
        if descriptor.features.get(name).is_none() {
            println!("Warning: override for undeclared flag '{}' ignored", name);
        }
    }
    Ok(())
}

/// Print (or write) the canonical descriptor text
pub fn cmd_render(session: &Session, spec: &Path, output: Option<&Path>) -> Result<()> {
    let descriptor: Descriptor = session.load(spec)?;
    match output {
        Some(path) => {
            write_descriptor_file(&descriptor, path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => print!("{}", write_descriptor(&descriptor)),
    }
    Ok(())
}

fn gate(condition: Option<&Condition>) -> String {
    match condition {
        Some(c) => format!("  [if {}]", c),
        None => String::new(),
    }
}
