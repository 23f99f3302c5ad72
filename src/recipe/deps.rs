// src/recipe/deps.rs

//! Dependency references and provided capabilities
//!
//! Every dependency tag line (`Requires:`, `BuildRequires:`, `Provides:` and
//! the weak/negative kinds) may list several entries separated by
//! whitespace or commas. An operator token binds a version to the name
//! before it: `foo >= 1.2, bar` yields two entries.

use crate::error::{Error, Result};
use crate::features::{Condition, EnabledFeatures};
use crate::version::{RpmVersion, VersionConstraint};
use serde::Serialize;
use strum_macros::{Display, EnumIter, EnumString};

/// Purpose of a dependency reference, named after its preamble tag
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum DependencyKind {
    /// Runtime requirement
    Requires,
    /// Build-time requirement
    BuildRequires,
    Recommends,
    Suggests,
    Supplements,
    Enhances,
    Conflicts,
    Obsoletes,
}

impl DependencyKind {
    /// Kinds that accept a `Tag(qualifier):` form
    pub fn accepts_qualifier(&self) -> bool {
        matches!(self, Self::Requires)
    }
}

/// One named dependency, optionally version constrained and gated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyReference {
    pub kind: DependencyKind,
    /// Scriptlet qualifier of `Requires(post):` style tags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<VersionConstraint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl DependencyReference {
    pub fn new(kind: DependencyKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            qualifier: None,
            name: name.into(),
            constraint: None,
            condition: None,
        }
    }

    /// Render as it appears after the tag (`name >= 1.0`)
    pub fn to_entry_string(&self) -> String {
        match &self.constraint {
            Some(c) => format!("{} {}", self.name, c),
            None => self.name.clone(),
        }
    }
}

/// Capability this package claims to satisfy (`Provides: name = version`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvidesAssertion {
    pub capability: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<RpmVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl ProvidesAssertion {
    pub fn to_entry_string(&self) -> String {
        match &self.version {
            Some(v) => format!("{} = {}", self.capability, v),
            None => self.capability.clone(),
        }
    }
}

/// All dependency references and provides of a descriptor, in text order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencySet {
    pub references: Vec<DependencyReference>,
    pub provides: Vec<ProvidesAssertion>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_kind(&self, kind: DependencyKind) -> impl Iterator<Item = &DependencyReference> {
        self.references.iter().filter(move |d| d.kind == kind)
    }

    pub fn requires(&self) -> impl Iterator<Item = &DependencyReference> {
        self.of_kind(DependencyKind::Requires)
    }

    pub fn build_requires(&self) -> impl Iterator<Item = &DependencyReference> {
        self.of_kind(DependencyKind::BuildRequires)
    }

    /// References of `kind` whose condition holds
    pub fn enabled<'a>(
        &'a self,
        kind: DependencyKind,
        features: &'a EnabledFeatures,
    ) -> impl Iterator<Item = &'a DependencyReference> {
        self.of_kind(kind)
            .filter(move |d| features.allows(d.condition.as_ref()))
    }

    pub fn enabled_provides<'a>(
        &'a self,
        features: &'a EnabledFeatures,
    ) -> impl Iterator<Item = &'a ProvidesAssertion> {
        self.provides
            .iter()
            .filter(move |p| features.allows(p.condition.as_ref()))
    }
}

const OPERATORS: [&str; 6] = ["=", "==", ">=", ">", "<=", "<"];

/// Split a dependency tag value into `(name, Option<(op, version)>)` pairs
fn split_entries(value: &str) -> std::result::Result<Vec<(String, Option<(String, String)>)>, String> {
    if value.trim_start().starts_with('(') {
        return Err("rich (boolean) dependencies are not supported".to_string());
    }

    let tokens: Vec<&str> = value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();

    let mut entries: Vec<(String, Option<(String, String)>)> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if OPERATORS.contains(&token) {
            let Some(last) = entries.last_mut().filter(|(_, c)| c.is_none()) else {
                return Err(format!("operator '{}' without a preceding name", token));
            };
            let Some(version) = tokens.get(i + 1) else {
                return Err(format!("operator '{}' without a version", token));
            };
            last.1 = Some((token.to_string(), version.to_string()));
            i += 2;
            continue;
        }
        if token.contains(['<', '>', '=']) {
            return Err(format!(
                "'{}' must separate name, operator and version with spaces",
                token
            ));
        }
        entries.push((token.to_string(), None));
        i += 1;
    }

    if entries.is_empty() {
        return Err("empty dependency list".to_string());
    }
    Ok(entries)
}

/// Parse the value of a dependency tag into references
pub fn parse_dependency_list(
    kind: DependencyKind,
    qualifier: Option<&str>,
    value: &str,
    condition: Option<&Condition>,
    line: usize,
) -> Result<Vec<DependencyReference>> {
    const EXPECTED: &str = "NAME [OP VERSION][, NAME [OP VERSION]...]";

    let entries = split_entries(value).map_err(|m| Error::parse(line, m, EXPECTED))?;
    entries
        .into_iter()
        .map(|(name, constraint)| {
            let constraint = constraint
                .map(|(op, ver)| VersionConstraint::from_parts(&op, &ver))
                .transpose()
                .map_err(|e| Error::parse(line, e.to_string(), EXPECTED))?;
            Ok(DependencyReference {
                kind,
                qualifier: qualifier.map(str::to_string),
                name,
                constraint,
                condition: condition.cloned(),
            })
        })
        .collect()
}

/// Parse the value of a `Provides:` tag; only `=` may bind a version
pub fn parse_provides_list(
    value: &str,
    condition: Option<&Condition>,
    line: usize,
) -> Result<Vec<ProvidesAssertion>> {
    const EXPECTED: &str = "CAPABILITY [= VERSION][, CAPABILITY [= VERSION]...]";

    let entries = split_entries(value).map_err(|m| Error::parse(line, m, EXPECTED))?;
    entries
        .into_iter()
        .map(|(capability, version)| {
            let version = match version {
                None => None,
                Some((op, ver)) if op == "=" || op == "==" => Some(
                    RpmVersion::parse(&ver)
                        .map_err(|e| Error::parse(line, e.to_string(), EXPECTED))?,
                ),
                Some((op, _)) => {
                    return Err(Error::parse(
                        line,
                        format!("Provides cannot use operator '{}'", op),
                        EXPECTED,
                    ));
                }
            };
            Ok(ProvidesAssertion {
                capability,
                version,
                condition: condition.cloned(),
            })
        })
        .collect()
}
