// src/recipe/format.rs

//! Descriptor model
//!
//! A [`Descriptor`] is the typed form of one `.spec` file after loading:
//! macros are already substituted, constant `%if` blocks are resolved, and
//! whatever still depends on a feature flag carries a [`Condition`].

use crate::features::{EnabledFeatures, FeatureOverrides, FeatureSet};
use crate::recipe::changelog::ChangeLog;
use crate::recipe::deps::DependencySet;
use crate::recipe::files::InstallManifest;
use crate::recipe::phases::{BuildRecipe, RecipePlan};
use serde::Serialize;

/// A complete, loaded packaging descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Descriptor {
    /// Package metadata from the preamble and `%description`
    pub package: PackageSection,

    /// `%global` / `%define` lines in the order they were read
    pub macros: Vec<MacroDefinition>,

    /// `%bcond_with` / `%bcond_without` declarations
    pub features: FeatureSet,

    /// Requires, BuildRequires, Provides and the weak dependency kinds
    pub dependencies: DependencySet,

    /// `%prep`, `%build`, `%install` and `%check`
    pub recipe: BuildRecipe,

    /// The `%files` list
    pub files: InstallManifest,

    pub changelog: ChangeLog,
}

impl Descriptor {
    /// `[epoch:]version-release`
    pub fn evr(&self) -> String {
        self.package.evr()
    }

    /// `name-[epoch:]version-release`
    pub fn nevr(&self) -> String {
        format!("{}-{}", self.package.name, self.package.evr())
    }

    /// Effective feature flags for a set of overrides
    pub fn enabled_features(&self, overrides: &FeatureOverrides) -> EnabledFeatures {
        self.features.evaluate(overrides)
    }

    /// Phases and commands that would run for `enabled`
    pub fn plan(&self, enabled: &EnabledFeatures) -> RecipePlan {
        self.recipe.plan(enabled)
    }
}

/// Package identity and descriptive metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageSection {
    pub name: String,
    pub version: String,
    pub release: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    pub summary: String,
    pub license: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Free text of `%description`
    pub description: String,

    /// `BuildArch`, e.g. `noarch`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_arch: Option<String>,

    pub sources: Vec<SourceEntry>,
    pub patches: Vec<SourceEntry>,

    /// Other well-formed preamble tags, kept in order (tag, value)
    pub extra_tags: Vec<(String, String)>,

    /// Target distribution channel supplied at load time (`noetic`, `humble`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl PackageSection {
    pub fn evr(&self) -> String {
        match self.epoch {
            Some(epoch) => format!("{}:{}-{}", epoch, self.version, self.release),
            None => format!("{}-{}", self.version, self.release),
        }
    }

    /// Identity tuple (name, version, release, channel)
    pub fn identity(&self) -> (&str, &str, &str, Option<&str>) {
        (
            &self.name,
            &self.version,
            &self.release,
            self.channel.as_deref(),
        )
    }

    /// Primary source archive (`Source0`, or the lowest numbered one)
    pub fn primary_source(&self) -> Option<&SourceEntry> {
        self.sources.iter().min_by_key(|s| s.index)
    }

    pub fn source(&self, index: u32) -> Option<&SourceEntry> {
        self.sources.iter().find(|s| s.index == index)
    }
}

/// A numbered `SourceN` or `PatchN` tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceEntry {
    pub index: u32,
    pub location: String,
}

impl SourceEntry {
    pub fn new(index: u32, location: impl Into<String>) -> Self {
        Self {
            index,
            location: location.into(),
        }
    }

    /// Local file name of the entry; URLs keep only their last path segment
    pub fn filename(&self) -> &str {
        let trimmed = self.location.split(['#', '?']).next().unwrap_or("");
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MacroKind {
    /// `%global`: body expanded once where it is defined
    Global,
    /// `%define`: body expanded where it is used
    Define,
}

/// A macro defined by the descriptor itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MacroDefinition {
    pub kind: MacroKind,
    pub name: String,
    /// Stored expanded for `%global`, verbatim for `%define`
    pub body: String,
}
