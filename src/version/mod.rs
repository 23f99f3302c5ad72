// src/version/mod.rs

//! Version handling and constraint satisfaction for descriptor dependencies
//!
//! This module provides version parsing and comparison for RPM-style versions,
//! including support for epoch:version-release format and the dependency
//! operators allowed on `Requires`/`BuildRequires`/`Provides` lines.

use crate::error::{Error, Result};
use semver::Version;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// A parsed RPM version with epoch, version, and release components
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RpmVersion {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

impl RpmVersion {
    /// Parse an RPM version string
    ///
    /// Format: [epoch:]version[-release]
    /// Examples:
    /// - "1.2.3" → epoch=0, version="1.2.3", release=None
    /// - "2:1.2.3" → epoch=2, version="1.2.3", release=None
    /// - "1.3.1-1.fc36" → epoch=0, version="1.3.1", release=Some("1.fc36")
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (epoch_str, rest) = match s.split_once(':') {
            Some((e, r)) => (e, r),
            None => ("0", s),
        };

        let epoch = if epoch_str.is_empty() {
            0
        } else {
            epoch_str
                .parse::<u64>()
                .map_err(|e| Error::Version(format!("invalid epoch in '{}': {}", s, e)))?
        };

        // Release is everything after the LAST dash, matching rpm's EVR split
        let (version, release) = match rest.rsplit_once('-') {
            Some((v, r)) => (v.to_string(), Some(r.to_string())),
            None => (rest.to_string(), None),
        };

        if version.is_empty() {
            return Err(Error::Version(format!("empty version component in '{}'", s)));
        }
        if version.chars().any(char::is_whitespace) {
            return Err(Error::Version(format!("whitespace in version '{}'", s)));
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }

    /// Compare two RPM versions
    pub fn compare(&self, other: &RpmVersion) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        // Plain x.y.z versions compare fastest through semver
        let ord = match (Version::parse(&self.version), Version::parse(&other.version)) {
            (Ok(v1), Ok(v2)) => v1.cmp(&v2),
            _ => rpmvercmp(&self.version, &other.version),
        };
        if ord != Ordering::Equal {
            return ord;
        }

        // A missing release matches any release, as rpm does for "Requires: foo = 1.0"
        match (&self.release, &other.release) {
            (Some(a), Some(b)) => rpmvercmp(a, b),
            _ => Ordering::Equal,
        }
    }
}

/// Segment-wise comparison used by rpm for version and release strings
///
/// Alphanumeric runs are compared pairwise: numeric runs numerically,
/// alphabetic runs lexically, and a numeric run is newer than an alphabetic
/// one. `~` sorts before anything, including the end of the string.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    loop {
        let skip = |s: &[u8]| -> usize {
            s.iter()
                .take_while(|c| !c.is_ascii_alphanumeric() && **c != b'~')
                .count()
        };
        one = &one[skip(one)..];
        two = &two[skip(two)..];

        match (one.first() == Some(&b'~'), two.first() == Some(&b'~')) {
            (true, true) => {
                one = &one[1..];
                two = &two[1..];
                continue;
            }
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();
        let run = |s: &[u8]| -> usize {
            s.iter()
                .take_while(|c| {
                    if numeric {
                        c.is_ascii_digit()
                    } else {
                        c.is_ascii_alphabetic()
                    }
                })
                .count()
        };

        let len_one = run(one);
        let len_two = run(two);
        if len_two == 0 {
            // Segments of different kinds: numeric wins
            return if numeric { Ordering::Greater } else { Ordering::Less };
        }

        let (seg_one, seg_two) = (&one[..len_one], &two[..len_two]);
        let ord = if numeric {
            let trim = |s: &[u8]| -> usize { s.iter().take_while(|c| **c == b'0').count() };
            let (s1, s2) = (&seg_one[trim(seg_one)..], &seg_two[trim(seg_two)..]);
            s1.len().cmp(&s2.len()).then_with(|| s1.cmp(s2))
        } else {
            seg_one.cmp(seg_two)
        };
        if ord != Ordering::Equal {
            return ord;
        }

        one = &one[len_one..];
        two = &two[len_two..];
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        _ => Ordering::Greater,
    }
}

impl fmt::Display for RpmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

impl Serialize for RpmVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Version constraint operators allowed in rpm dependency lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Exact version match
    Exact(RpmVersion),
    /// Greater than
    GreaterThan(RpmVersion),
    /// Greater than or equal
    GreaterOrEqual(RpmVersion),
    /// Less than
    LessThan(RpmVersion),
    /// Less than or equal
    LessOrEqual(RpmVersion),
}

impl VersionConstraint {
    /// Build a constraint from an rpm operator token and a version string
    pub fn from_parts(op: &str, version: &str) -> Result<Self> {
        let version = RpmVersion::parse(version)?;
        match op {
            "=" | "==" => Ok(Self::Exact(version)),
            ">" => Ok(Self::GreaterThan(version)),
            ">=" => Ok(Self::GreaterOrEqual(version)),
            "<" => Ok(Self::LessThan(version)),
            "<=" => Ok(Self::LessOrEqual(version)),
            other => Err(Error::Version(format!("unknown operator '{}'", other))),
        }
    }

    /// Parse a constraint string such as ">= 1.2.3" or "= 1.3.1-1"
    ///
    /// A bare version without operator means an exact match.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        for op in [">=", "<=", "==", ">", "<", "="] {
            if let Some(rest) = s.strip_prefix(op) {
                return Self::from_parts(op, rest);
            }
        }
        Self::from_parts("=", s)
    }

    /// The operator token as written in a descriptor
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Exact(_) => "=",
            Self::GreaterThan(_) => ">",
            Self::GreaterOrEqual(_) => ">=",
            Self::LessThan(_) => "<",
            Self::LessOrEqual(_) => "<=",
        }
    }

    /// The version the operator applies to
    pub fn version(&self) -> &RpmVersion {
        match self {
            Self::Exact(v)
            | Self::GreaterThan(v)
            | Self::GreaterOrEqual(v)
            | Self::LessThan(v)
            | Self::LessOrEqual(v) => v,
        }
    }

    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &RpmVersion) -> bool {
        let ord = version.compare(self.version());
        match self {
            Self::Exact(_) => ord == Ordering::Equal,
            Self::GreaterThan(_) => ord == Ordering::Greater,
            Self::GreaterOrEqual(_) => ord != Ordering::Less,
            Self::LessThan(_) => ord == Ordering::Less,
            Self::LessOrEqual(_) => ord != Ordering::Greater,
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operator(), self.version())
    }
}

impl Serialize for VersionConstraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
