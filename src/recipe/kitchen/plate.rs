// src/recipe/kitchen/plate.rs

//! Plate: check the populated build root against the `%files` manifest
//!
//! Every enabled absolute entry must match something under the build root.
//! Anything installed that no entry covers is reported as unpackaged.

use crate::error::{Error, Result};
use crate::features::EnabledFeatures;
use crate::recipe::files::{EntryKind, InstallManifest, ManifestEntry};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPolicy {
    /// Fail instead of warn on installed files no entry covers
    pub strict_unpackaged: bool,
}

/// Outcome of a manifest check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestReport {
    /// Number of enabled entries checked against the build root
    pub checked: usize,
    /// Build root paths matched by an entry
    pub matched: Vec<String>,
    /// Entries that matched nothing
    pub missing: Vec<String>,
    /// Installed files no entry covers
    pub unpackaged: Vec<String>,
    /// Relative `%doc`/`%license` entries, taken from the build tree
    pub skipped: Vec<String>,
}

impl ManifestReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unpackaged.is_empty()
    }
}

/// Compare the enabled manifest entries with the contents of `buildroot`
pub fn validate_manifest(
    manifest: &InstallManifest,
    buildroot: &Path,
    enabled: &EnabledFeatures,
    policy: &ManifestPolicy,
) -> Result<ManifestReport> {
    let installed = installed_paths(buildroot)?;
    debug!(
        "Checking manifest against {} ({} paths installed)",
        buildroot.display(),
        installed.len()
    );

    let mut report = ManifestReport::default();
    let mut matched: BTreeSet<&str> = BTreeSet::new();
    // Paths covering everything below them, and paths covering only themselves
    let mut trees: BTreeSet<&str> = BTreeSet::new();
    let mut exact: BTreeSet<&str> = BTreeSet::new();

    for entry in manifest.enabled(enabled) {
        if !entry.path.starts_with('/') {
            if matches!(entry.kind, EntryKind::Doc | EntryKind::License) {
                report.skipped.push(entry.path.clone());
            } else {
                report.missing.push(entry.path.clone());
            }
            continue;
        }
        report.checked += 1;

        let hits = matching(entry, &installed)?;
        if hits.is_empty() && !matches!(entry.kind, EntryKind::Ghost | EntryKind::Exclude) {
            report.missing.push(entry.path.clone());
            continue;
        }
        for hit in hits {
            if entry.kind == EntryKind::Dir {
                exact.insert(hit);
            } else {
                trees.insert(hit);
            }
            if entry.kind != EntryKind::Exclude {
                matched.insert(hit);
            }
        }
    }

    report.matched = matched.into_iter().map(str::to_string).collect();
    report.unpackaged = installed
        .iter()
        .filter(|p| !p.is_dir)
        .map(|p| p.path.as_str())
        .filter(|p| !exact.contains(p) && !covered_by_tree(p, &trees))
        .map(str::to_string)
        .collect();

    if !report.missing.is_empty() {
        return Err(Error::ManifestMismatch {
            missing: report.missing,
            unpackaged: report.unpackaged,
        });
    }
    if !report.unpackaged.is_empty() {
        if policy.strict_unpackaged {
            return Err(Error::ManifestMismatch {
                missing: Vec::new(),
                unpackaged: report.unpackaged,
            });
        }
        for path in &report.unpackaged {
            warn!("Installed but unpackaged file: {}", path);
        }
    }

    Ok(report)
}

/// One path under the build root, written as it would be installed
#[derive(Debug)]
struct InstalledPath {
    path: String,
    is_dir: bool,
}

fn installed_paths(buildroot: &Path) -> Result<Vec<InstalledPath>> {
    if !buildroot.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in WalkDir::new(buildroot).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(buildroot)
            .map_err(|e| Error::Config(format!("path outside build root: {}", e)))?;
        paths.push(InstalledPath {
            path: format!("/{}", relative.to_string_lossy()),
            is_dir: entry.file_type().is_dir(),
        });
    }
    Ok(paths)
}

fn matching<'a>(entry: &ManifestEntry, installed: &'a [InstalledPath]) -> Result<Vec<&'a str>> {
    let wanted = entry.path.trim_end_matches('/');
    let wanted = if wanted.is_empty() { "/" } else { wanted };

    if !entry.is_glob() {
        return Ok(installed
            .iter()
            .filter(|p| p.path == wanted)
            .map(|p| p.path.as_str())
            .collect());
    }

    let pattern = Pattern::new(wanted)
        .map_err(|e| Error::Config(format!("invalid %files glob '{}': {}", entry.path, e)))?;
    Ok(installed
        .iter()
        .filter(|p| pattern.matches_with(&p.path, MATCH_OPTIONS))
        .map(|p| p.path.as_str())
        .collect())
}

fn covered_by_tree(path: &str, trees: &BTreeSet<&str>) -> bool {
    let mut current = path;
    loop {
        if trees.contains(current) {
            return true;
        }
        match current.rfind('/') {
            Some(0) | None => return trees.contains("/"),
            Some(idx) => current = &current[..idx],
        }
    }
}
