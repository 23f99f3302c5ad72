// src/lib.rs

//! spec-kitchen
//!
//! Load, evaluate, cook and verify RPM `.spec` package descriptors.
//!
//! # Architecture
//!
//! - Loader: `.spec` text becomes a typed [`recipe::Descriptor`]; macros are
//!   expanded and constant conditionals resolved at load time
//! - Feature flags: `%bcond` toggles stay symbolic as [`features::Condition`]s
//!   until evaluated against caller overrides
//! - Kitchen: build requirements are checked, then the four phases run in
//!   order in a controlled shell environment
//! - Plate: the populated build root is checked against `%files`

pub mod config;
mod error;
pub mod features;
pub mod recipe;
pub mod version;

pub use config::ConfigFile;
pub use error::{Error, ExitStatus, Result};
pub use features::{Condition, EnabledFeatures, FeatureFlag, FeatureOverrides, FeatureSet};
pub use recipe::{
    Descriptor, Kitchen, KitchenConfig, LoadOptions, parse_descriptor, parse_descriptor_file,
    validate_descriptor, write_descriptor,
};
pub use version::{RpmVersion, VersionConstraint};
