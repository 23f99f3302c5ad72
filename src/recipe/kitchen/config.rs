// src/recipe/kitchen/config.rs

//! Configuration and result types for the Kitchen

use super::plate::{ManifestPolicy, ManifestReport};
use crate::error::ExitStatus;
use crate::recipe::phases::Phase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum_macros::{Display, EnumString};

/// What a failing `%check` command does to the cook
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CheckPolicy {
    /// Record the failure and keep going
    #[default]
    Report,
    /// Fail the cook like any other phase
    Abort,
}

/// Configuration for the Kitchen
#[derive(Debug, Clone)]
pub struct KitchenConfig {
    /// Build directory (`%{_builddir}`, `$RPM_BUILD_DIR`)
    pub builddir: PathBuf,
    /// Where sources and patches are found (`$RPM_SOURCE_DIR`)
    pub sourcedir: PathBuf,
    /// Install destination (`%{buildroot}`, `$RPM_BUILD_ROOT`)
    pub buildroot: PathBuf,
    /// Shell used for every command
    pub shell: PathBuf,
    /// Script sourced before each command when it exists
    pub env_setup: Option<PathBuf>,
    /// `PATH` inside the build environment
    pub path: String,
    pub home: PathBuf,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Kill a command that runs longer than this
    pub timeout: Option<Duration>,
    pub check_policy: CheckPolicy,
    /// Run `%check` at all (`--nocheck` turns it off)
    pub run_check: bool,
    /// Empty the build root before the first phase
    pub clean_buildroot: bool,
    pub manifest: ManifestPolicy,
    /// Write the build log here as it is produced, so a failed cook
    /// still leaves one behind
    pub log_file: Option<PathBuf>,
}

impl Default for KitchenConfig {
    fn default() -> Self {
        let topdir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rpmbuild");
        Self::with_topdir(&topdir)
    }
}

impl KitchenConfig {
    /// Lay the build, source and buildroot directories out under `topdir`
    /// the way `rpmbuild` does (`BUILD`, `SOURCES`, `BUILDROOT`)
    pub fn with_topdir(topdir: &Path) -> Self {
        Self {
            builddir: topdir.join("BUILD"),
            sourcedir: topdir.join("SOURCES"),
            buildroot: topdir.join("BUILDROOT"),
            shell: PathBuf::from("/bin/sh"),
            env_setup: None,
            path: "/usr/local/bin:/usr/bin:/bin:/usr/local/sbin:/usr/sbin:/sbin".to_string(),
            home: dirs::home_dir().unwrap_or_else(|| topdir.to_path_buf()),
            env: BTreeMap::new(),
            timeout: None,
            check_policy: CheckPolicy::Report,
            run_check: true,
            clean_buildroot: true,
            manifest: ManifestPolicy::default(),
            log_file: None,
        }
    }
}

/// A `%check` command that failed under [`CheckPolicy::Report`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckFailure {
    pub command: String,
    pub status: ExitStatus,
}

/// What ran for one phase
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub commands_run: usize,
    /// Working directory the phase ended in
    pub workdir: PathBuf,
    pub duration_ms: u128,
}

/// Result of cooking a descriptor
#[derive(Debug, Serialize)]
pub struct CookResult {
    /// `name-[epoch:]version-release`
    pub package: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub buildroot: PathBuf,
    /// Enabled feature flags the cook ran with
    pub features: Vec<String>,
    /// Build requirements that were checked and found
    pub resolved: Vec<String>,
    pub phases: Vec<PhaseReport>,
    pub check_failures: Vec<CheckFailure>,
    pub manifest: ManifestReport,
    /// Warnings generated during the cook
    pub warnings: Vec<String>,
    /// Build log
    #[serde(skip)]
    pub log: String,
}

impl CookResult {
    /// Whether every check command passed (or none ran)
    pub fn checks_passed(&self) -> bool {
        self.check_failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_kitchen_config_with_topdir() {
        let config = KitchenConfig::with_topdir(Path::new("/tmp/rpmbuild"));
        assert_eq!(config.builddir, PathBuf::from("/tmp/rpmbuild/BUILD"));
        assert_eq!(config.sourcedir, PathBuf::from("/tmp/rpmbuild/SOURCES"));
        assert_eq!(config.buildroot, PathBuf::from("/tmp/rpmbuild/BUILDROOT"));
        assert!(config.timeout.is_none());
        assert!(config.run_check);
        assert_eq!(config.check_policy, CheckPolicy::Report);
        assert!(!config.manifest.strict_unpackaged);
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_check_policy_names() {
        assert_eq!(CheckPolicy::from_str("abort").unwrap(), CheckPolicy::Abort);
        assert_eq!(CheckPolicy::Report.to_string(), "report");
    }
}
