// src/config.rs

//! Configuration file for spec-kitchen
//!
//! Settings live in a TOML file, by default
//! `~/.config/spec-kitchen/config.toml`. Every section is optional:
//!
//! ```toml
//! [paths]
//! topdir = "/var/tmp/rpmbuild"
//!
//! [channel]
//! name = "noetic"
//! arch = "x86_64"
//!
//! [defines]
//! dist = ".el8"
//!
//! [build]
//! env_setup = "/opt/ros/noetic/setup.sh"
//! timeout_secs = 3600
//! check_policy = "report"
//!
//! [features]
//! tests = true
//!
//! [resolver]
//! kind = "static"
//! available = ["cmake", "python3 = 3.10"]
//! ```
//!
//! Command line flags override anything set here.

use crate::error::{Error, Result};
use crate::features::FeatureOverrides;
use crate::recipe::kitchen::{
    CheckPolicy, DependencyResolver, KitchenConfig, ManifestPolicy, NoopResolver,
    RpmQueryResolver, StaticResolver,
};
use crate::recipe::parser::LoadOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{Display, EnumString};
use tracing::debug;

/// Name of the directory under the platform config dir
const CONFIG_DIR: &str = "spec-kitchen";

/// The whole configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub channel: ChannelConfig,

    /// Extra macros, like `rpmbuild --define`
    #[serde(default)]
    pub defines: BTreeMap<String, String>,

    #[serde(default)]
    pub build: BuildConfig,

    /// Extra environment variables for every command
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Feature flag overrides (`name = true` is `--with name`)
    #[serde(default)]
    pub features: BTreeMap<String, bool>,

    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// Build directory layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Parent of `BUILD`, `SOURCES` and `BUILDROOT`
    pub topdir: Option<PathBuf>,
    pub builddir: Option<PathBuf>,
    pub sourcedir: Option<PathBuf>,
    pub buildroot: Option<PathBuf>,
}

/// Target distribution channel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// e.g. `noetic` or `humble`
    pub name: Option<String>,
    /// Architecture for `%ifarch` (defaults to the host)
    pub arch: Option<String>,
}

/// How phases run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub shell: Option<PathBuf>,
    /// Sourced before each command when present
    pub env_setup: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub check_policy: CheckPolicy,
    #[serde(default = "default_true")]
    pub run_check: bool,
    #[serde(default)]
    pub strict_unpackaged: bool,
}

fn default_true() -> bool {
    true
}

/// Which resolver checks `BuildRequires`
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResolverKind {
    /// Assume everything is installed
    #[default]
    None,
    /// Only what `available` lists
    Static,
    /// Query the host rpm database
    Rpm,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverConfig {
    #[serde(default)]
    pub kind: ResolverKind,
    /// Entries like `cmake` or `python3 = 3.10` for the static resolver
    #[serde(default)]
    pub available: Vec<String>,
}

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_DIR).join("config.toml"))
}

impl ConfigFile {
    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the default location is
    /// used if present and an empty configuration otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) if p.exists() => p,
                _ => {
                    debug!("No configuration file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        debug!("Loading configuration from {}", path.display());
        let content = fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Loader options from `[channel]` and `[defines]`
    pub fn load_options(&self) -> LoadOptions {
        let mut options = LoadOptions::default();
        if let Some(name) = &self.channel.name {
            options = options.with_channel(name.clone());
        }
        if let Some(arch) = &self.channel.arch {
            options.arch = arch.clone();
        }
        for (name, value) in &self.defines {
            options = options.define(name.clone(), value.clone());
        }
        options
    }

    /// Kitchen settings from `[paths]`, `[build]` and `[env]`
    pub fn kitchen_config(&self) -> KitchenConfig {
        let mut config = match &self.paths.topdir {
            Some(topdir) => KitchenConfig::with_topdir(topdir),
            None => KitchenConfig::default(),
        };
        if let Some(dir) = &self.paths.builddir {
            config.builddir = dir.clone();
        }
        if let Some(dir) = &self.paths.sourcedir {
            config.sourcedir = dir.clone();
        }
        if let Some(dir) = &self.paths.buildroot {
            config.buildroot = dir.clone();
        }

        if let Some(shell) = &self.build.shell {
            config.shell = shell.clone();
        }
        config.env_setup = self.build.env_setup.clone();
        config.timeout = self.build.timeout_secs.map(Duration::from_secs);
        config.check_policy = self.build.check_policy;
        config.run_check = self.build.run_check;
        config.manifest = ManifestPolicy {
            strict_unpackaged: self.build.strict_unpackaged,
        };
        config.env = self.env.clone();
        config
    }

    /// Feature overrides from `[features]`
    pub fn feature_overrides(&self) -> FeatureOverrides {
        let mut overrides = FeatureOverrides::new();
        for (name, enabled) in &self.features {
            overrides.set(name, *enabled);
        }
        overrides
    }

    /// Build the configured dependency resolver
    pub fn resolver(&self) -> Result<Arc<dyn DependencyResolver>> {
        Ok(match self.resolver.kind {
            ResolverKind::None => Arc::new(NoopResolver),
            ResolverKind::Static => {
                Arc::new(StaticResolver::from_entries(&self.resolver.available)?)
            }
            ResolverKind::Rpm => Arc::new(RpmQueryResolver::detect()?),
        })
    }
}
