// src/recipe/kitchen/resolver.rs

//! Build requirement resolution before cooking

use crate::error::{Error, Result};
use crate::recipe::deps::DependencyReference;
use crate::version::{RpmVersion, VersionConstraint};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

/// Trait for checking that build requirements are available
///
/// This keeps the Kitchen decoupled from whatever package database the
/// host uses.
pub trait DependencyResolver: Send + Sync {
    /// Check which requirements are missing
    ///
    /// Returns the unsatisfied entries rendered as `name [op version]`.
    fn check_missing(&self, deps: &[&DependencyReference]) -> Result<Vec<String>>;
}

/// A resolver that assumes all requirements are satisfied
///
/// Use this in a pre-provisioned build container.
pub struct NoopResolver;

impl DependencyResolver for NoopResolver {
    fn check_missing(&self, _deps: &[&DependencyReference]) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// A fixed list of available capabilities, with optional versions
///
/// A capability listed without a version satisfies any constraint, like an
/// unversioned `Provides:` does in rpm.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    available: HashMap<String, Option<RpmVersion>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a capability
    pub fn provide(mut self, name: impl Into<String>, version: Option<RpmVersion>) -> Self {
        self.available.insert(name.into(), version);
        self
    }

    /// Build from entries like `cmake` or `python3 = 3.10.4`
    pub fn from_entries<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut resolver = Self::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            let (name, version) = match entry.split_once('=') {
                Some((name, version)) => (name.trim(), Some(RpmVersion::parse(version)?)),
                None => (entry, None),
            };
            if name.is_empty() {
                return Err(Error::Config(format!("empty capability in '{}'", entry)));
            }
            resolver.available.insert(name.to_string(), version);
        }
        Ok(resolver)
    }

    fn satisfies(&self, dep: &DependencyReference) -> bool {
        match self.available.get(&dep.name) {
            None => false,
            Some(version) => constraint_met(dep.constraint.as_ref(), version.as_ref()),
        }
    }
}

impl DependencyResolver for StaticResolver {
    fn check_missing(&self, deps: &[&DependencyReference]) -> Result<Vec<String>> {
        Ok(deps
            .iter()
            .filter(|d| !self.satisfies(d))
            .map(|d| d.to_entry_string())
            .collect())
    }
}

/// Ask the host rpm database (`rpm -q --whatprovides`)
#[derive(Debug, Clone)]
pub struct RpmQueryResolver {
    rpm: PathBuf,
}

impl RpmQueryResolver {
    pub fn new(rpm: PathBuf) -> Self {
        Self { rpm }
    }

    /// Locate `rpm` on `PATH`
    pub fn detect() -> Result<Self> {
        let rpm = which::which("rpm")
            .map_err(|e| Error::Config(format!("rpm resolver needs the rpm binary: {}", e)))?;
        Ok(Self::new(rpm))
    }

    fn query(&self, capability: &str) -> Result<bool> {
        let status = Command::new(&self.rpm)
            .args(["-q", "--quiet", "--whatprovides", capability])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        debug!("rpm -q --whatprovides '{}': {}", capability, status);
        Ok(status.success())
    }
}

impl DependencyResolver for RpmQueryResolver {
    fn check_missing(&self, deps: &[&DependencyReference]) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for dep in deps {
            let entry = dep.to_entry_string();
            if !self.query(&entry)? {
                missing.push(entry);
            }
        }
        Ok(missing)
    }
}

/// An unknown installed version satisfies any constraint
fn constraint_met(constraint: Option<&VersionConstraint>, installed: Option<&RpmVersion>) -> bool {
    match (constraint, installed) {
        (None, _) | (Some(_), None) => true,
        (Some(c), Some(v)) => c.satisfies(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::deps::DependencyKind;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// A resolver that records what it was asked
    pub struct MockResolver {
        installed: HashSet<String>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl MockResolver {
        pub fn new(installed: &[&str]) -> Self {
            Self {
                installed: installed.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl DependencyResolver for MockResolver {
        fn check_missing(&self, deps: &[&DependencyReference]) -> Result<Vec<String>> {
            self.calls
                .lock()
                .unwrap()
                .push(deps.iter().map(|d| d.name.clone()).collect());
            Ok(deps
                .iter()
                .filter(|d| !self.installed.contains(&d.name))
                .map(|d| d.name.clone())
                .collect())
        }
    }

    fn dep(name: &str, constraint: Option<&str>) -> DependencyReference {
        let mut d = DependencyReference::new(DependencyKind::BuildRequires, name);
        d.constraint = constraint.map(|c| VersionConstraint::parse(c).unwrap());
        d
    }

    #[test]
    fn test_noop_resolver() {
        let d = dep("cmake", None);
        assert!(NoopResolver.check_missing(&[&d]).unwrap().is_empty());
    }

    #[test]
    fn test_static_resolver_versions() {
        let resolver =
            StaticResolver::from_entries(["ros-noetic-catkin", "python3-rospkg = 1.4.0-1"]).unwrap();
        let catkin = dep("ros-noetic-catkin", Some(">= 0.7"));
        let rospkg_ok = dep("python3-rospkg", Some(">= 1.2"));
        let rospkg_new = dep("python3-rospkg", Some(">= 2.0"));
        let absent = dep("ros-noetic-rostest", None);

        let missing = resolver
            .check_missing(&[&catkin, &rospkg_ok, &rospkg_new, &absent])
            .unwrap();
        assert_eq!(missing, vec!["python3-rospkg >= 2.0", "ros-noetic-rostest"]);
    }

    #[test]
    fn test_static_resolver_rejects_empty_name() {
        assert!(StaticResolver::from_entries(["= 1.0"]).is_err());
    }

    #[test]
    fn test_mock_resolver_records_calls() {
        let resolver = MockResolver::new(&["gcc"]);
        let gcc = dep("gcc", None);
        let make = dep("make", None);
        let missing = resolver.check_missing(&[&gcc, &make]).unwrap();
        assert_eq!(missing, vec!["make"]);
        assert_eq!(resolver.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_constraint_met() {
        let c = VersionConstraint::parse(">= 1.2").unwrap();
        let v = RpmVersion::parse("1.3").unwrap();
        assert!(constraint_met(Some(&c), Some(&v)));
        assert!(constraint_met(Some(&c), None));
        assert!(constraint_met(None, Some(&v)));
    }
}
