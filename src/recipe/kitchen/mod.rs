// src/recipe/kitchen/mod.rs

//! Kitchen: the build environment for cooking descriptors
//!
//! Cooking a descriptor:
//! 1. **Features**: evaluate the flags against the caller's overrides
//! 2. **Requirements**: check every enabled `BuildRequires` through the
//!    resolver; anything missing stops the cook before a command runs
//! 3. **Recipe**: run `%prep`, `%build`, `%install` and `%check` in that
//!    order, each command in its own shell with the phase's shell
//!    variables carried to the next
//! 4. **Plate**: compare the build root with the `%files` manifest

mod config;
mod cook;
pub mod plate;
pub mod resolver;

pub use config::{CheckFailure, CheckPolicy, CookResult, KitchenConfig, PhaseReport};
use cook::Cook;
pub use plate::{ManifestPolicy, ManifestReport, validate_manifest};
pub use resolver::{DependencyResolver, NoopResolver, RpmQueryResolver, StaticResolver};

use crate::error::{Error, Result};
use crate::features::{EnabledFeatures, FeatureOverrides};
use crate::recipe::deps::{DependencyKind, DependencyReference};
use crate::recipe::format::Descriptor;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The Kitchen: where descriptors are cooked
pub struct Kitchen {
    pub(crate) config: KitchenConfig,
    resolver: Arc<dyn DependencyResolver>,
}

impl Kitchen {
    /// Create a Kitchen that assumes build requirements are installed
    pub fn new(config: KitchenConfig) -> Self {
        Self::with_resolver(config, Arc::new(NoopResolver))
    }

    /// Create a Kitchen with a build requirement resolver
    pub fn with_resolver(config: KitchenConfig, resolver: Arc<dyn DependencyResolver>) -> Self {
        Self { config, resolver }
    }

    pub fn config(&self) -> &KitchenConfig {
        &self.config
    }

    /// Check the enabled `BuildRequires` of a descriptor
    ///
    /// Returns the entries that were found; any missing entry is an
    /// [`Error::UnresolvedDependency`].
    pub fn resolve_build_requires(
        &self,
        descriptor: &Descriptor,
        enabled: &EnabledFeatures,
    ) -> Result<Vec<String>> {
        let deps: Vec<&DependencyReference> = descriptor
            .dependencies
            .enabled(DependencyKind::BuildRequires, enabled)
            .collect();

        if deps.is_empty() {
            debug!("No build requirements for {}", descriptor.package.name);
            return Ok(Vec::new());
        }

        info!(
            "Checking build requirements: {}",
            deps.iter()
                .map(|d| d.to_entry_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let missing = self.resolver.check_missing(&deps)?;
        if !missing.is_empty() {
            warn!("Unresolved build requirements: {}", missing.join(", "));
            return Err(Error::UnresolvedDependency { missing });
        }

        Ok(deps.iter().map(|d| d.to_entry_string()).collect())
    }

    /// Cook a descriptor
    ///
    /// This is the main entry point for building. Nothing runs unless every
    /// enabled build requirement resolves; a failing command in `%prep`,
    /// `%build` or `%install` stops the cook. `%check` failures follow the
    /// configured [`CheckPolicy`].
    pub fn cook(&self, descriptor: &Descriptor, overrides: &FeatureOverrides) -> Result<CookResult> {
        info!("Cooking {}", descriptor.nevr());

        let enabled = descriptor.enabled_features(overrides);
        let features: Vec<String> = enabled.iter().map(str::to_string).collect();
        if !features.is_empty() {
            info!("Enabled features: {}", features.join(", "));
        }

        let resolved = self.resolve_build_requires(descriptor, &enabled)?;

        let plan = descriptor.plan(&enabled);
        let mut cook = Cook::new(self, descriptor)?;
        cook.prepare_dirs()?;
        cook.run(&plan)?;

        info!("Plating: checking %files against {}", self.config.buildroot.display());
        let manifest = validate_manifest(
            &descriptor.files,
            &self.config.buildroot,
            &enabled,
            &self.config.manifest,
        )?;

        let mut warnings = cook.warnings;
        for path in &manifest.unpackaged {
            warnings.push(format!("Installed but unpackaged file: {}", path));
        }

        info!(
            "Cooked {} ({} phases, {} manifest paths)",
            descriptor.nevr(),
            cook.phases.len(),
            manifest.matched.len()
        );

        Ok(CookResult {
            package: descriptor.nevr(),
            channel: descriptor.package.channel.clone(),
            buildroot: self.config.buildroot.clone(),
            features,
            resolved,
            phases: cook.phases,
            check_failures: cook.check_failures,
            manifest,
            warnings,
            log: cook.log,
        })
    }

    /// Check an existing build root against the manifest without building
    pub fn verify(&self, descriptor: &Descriptor, overrides: &FeatureOverrides) -> Result<ManifestReport> {
        let enabled = descriptor.enabled_features(overrides);
        validate_manifest(
            &descriptor.files,
            &self.config.buildroot,
            &enabled,
            &self.config.manifest,
        )
    }
}
