// src/features.rs
//! Build conditionals: feature flags, overrides and gating conditions
//!
//! Feature flags are the `%bcond_with` / `%bcond_without` toggles of a
//! descriptor. A flag has a declared default; callers supply overrides the
//! same way `rpmbuild --with X` / `--without X` do. Evaluation yields the
//! set of enabled flags, which then decides every gated dependency, phase,
//! command and manifest entry through a [`Condition`].

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// A named boolean toggle declared by the descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureFlag {
    pub name: String,
    pub default_enabled: bool,
}

impl FeatureFlag {
    pub fn new(name: impl Into<String>, default_enabled: bool) -> Self {
        Self {
            name: name.into(),
            default_enabled,
        }
    }

    /// Name of the macro defined when the flag is on (`with_tests`)
    pub fn macro_name(&self) -> String {
        format!("with_{}", self.name)
    }
}

/// Declared flags in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FeatureSet {
    flags: Vec<FeatureFlag>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a flag; a name may only be declared once
    pub fn declare(&mut self, flag: FeatureFlag) -> Result<()> {
        if self.get(&flag.name).is_some() {
            return Err(Error::Config(format!(
                "feature flag '{}' declared twice",
                flag.name
            )));
        }
        self.flags.push(flag);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FeatureFlag> {
        self.flags.iter().find(|f| f.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureFlag> {
        self.flags.iter()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Compute the effective set of enabled flags
    ///
    /// Unset flags take their declared default and explicit overrides always
    /// win. Overrides naming an undeclared flag are honoured, like
    /// `rpmbuild --with` defining the macro regardless of `%bcond`.
    pub fn evaluate(&self, overrides: &FeatureOverrides) -> EnabledFeatures {
        let mut enabled = BTreeSet::new();

        for flag in &self.flags {
            let on = overrides
                .get(&flag.name)
                .unwrap_or(flag.default_enabled);
            if on {
                enabled.insert(flag.name.clone());
            }
        }

        for (name, value) in overrides.iter() {
            if self.get(name).is_none() {
                warn!("Override for undeclared feature flag '{}'", name);
                if value {
                    enabled.insert(name.to_string());
                }
            }
        }

        EnabledFeatures { enabled }
    }
}

/// Externally supplied flag values (`--with X`, `--without X`, config)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FeatureOverrides {
    values: BTreeMap<String, bool>,
}

impl FeatureOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build overrides from `--with` and `--without` lists; `--without` wins on conflict
    pub fn from_lists(with: &[String], without: &[String]) -> Self {
        let mut overrides = Self::new();
        for name in with {
            overrides.set(name, true);
        }
        for name in without {
            overrides.set(name, false);
        }
        overrides
    }

    /// Set a flag; a `with_` prefix is accepted and stripped
    pub fn set(&mut self, name: &str, enabled: bool) {
        self.values.insert(normalize_flag_name(name), enabled);
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.values.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Layer `other` on top of `self`; values in `other` win
    pub fn merged_with(&self, other: &FeatureOverrides) -> FeatureOverrides {
        let mut merged = self.clone();
        for (name, value) in other.iter() {
            merged.values.insert(name.to_string(), value);
        }
        merged
    }
}

impl FromStr for FeatureOverrides {
    type Err = Error;

    /// Parse a comma separated list such as `tests, !weak_deps`
    fn from_str(s: &str) -> Result<Self> {
        let mut overrides = Self::new();
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let (enabled, name) = match item.strip_prefix('!') {
                Some(rest) => (false, rest.trim()),
                None => (true, item),
            };
            if name.is_empty() {
                return Err(Error::Config(format!("missing flag name in '{}'", item)));
            }
            overrides.set(name, enabled);
        }
        Ok(overrides)
    }
}

fn normalize_flag_name(name: &str) -> String {
    let name = name.trim();
    name.strip_prefix("with_").unwrap_or(name).to_string()
}

/// Result of evaluating a [`FeatureSet`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EnabledFeatures {
    enabled: BTreeSet<String>,
}

impl EnabledFeatures {
    /// Enabled set from explicit names, mostly useful in tests
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(String::as_str)
    }

    /// Whether an optional condition holds; `None` means unconditional
    pub fn allows(&self, condition: Option<&Condition>) -> bool {
        condition.is_none_or(|c| c.evaluate(self))
    }
}

/// Boolean expression over feature flags gating a descriptor fragment
///
/// Built only through the smart constructors so that equal expressions have
/// equal shapes: conjunctions and disjunctions are flattened and double
/// negation collapses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Flag(String),
    Not(Box<Condition>),
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

impl Condition {
    pub fn flag(name: impl Into<String>) -> Self {
        Self::Flag(name.into())
    }

    pub fn negate(self) -> Self {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }

    pub fn and(self, other: Condition) -> Self {
        let mut items = Vec::new();
        for c in [self, other] {
            match c {
                Self::All(inner) => items.extend(inner),
                c => items.push(c),
            }
        }
        Self::All(items)
    }

    pub fn or(self, other: Condition) -> Self {
        let mut items = Vec::new();
        for c in [self, other] {
            match c {
                Self::Any(inner) => items.extend(inner),
                c => items.push(c),
            }
        }
        Self::Any(items)
    }

    /// Conjunction of two optional conditions
    pub fn and_opt(a: Option<Condition>, b: Option<Condition>) -> Option<Condition> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.and(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn evaluate(&self, enabled: &EnabledFeatures) -> bool {
        match self {
            Self::Flag(name) => enabled.is_enabled(name),
            Self::Not(inner) => !inner.evaluate(enabled),
            Self::All(items) => items.iter().all(|c| c.evaluate(enabled)),
            Self::Any(items) => items.iter().any(|c| c.evaluate(enabled)),
        }
    }

    /// Every flag name the expression refers to
    pub fn flags(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_flags(&mut out);
        out
    }

    fn collect_flags<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::Flag(name) => {
                out.insert(name);
            }
            Self::Not(inner) => inner.collect_flags(out),
            Self::All(items) | Self::Any(items) => {
                for c in items {
                    c.collect_flags(out);
                }
            }
        }
    }

    fn is_compound(&self) -> bool {
        matches!(self, Self::All(_) | Self::Any(_))
    }
}

/// Renders in descriptor syntax, e.g. `%{with tests} && %{without weak_deps}`
impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let child = |c: &Condition| {
            if c.is_compound() {
                format!("({})", c)
            } else {
                c.to_string()
            }
        };

        match self {
            Self::Flag(name) => write!(f, "%{{with {}}}", name),
            Self::Not(inner) => match inner.as_ref() {
                Self::Flag(name) => write!(f, "%{{without {}}}", name),
                other => write!(f, "!({})", other),
            },
            Self::All(items) => {
                let parts: Vec<String> = items.iter().map(child).collect();
                write!(f, "{}", parts.join(" && "))
            }
            Self::Any(items) => {
                let parts: Vec<String> = items.iter().map(child).collect();
                write!(f, "{}", parts.join(" || "))
            }
        }
    }
}
