// src/recipe/mod.rs

//! Packaging descriptors: loading, rendering and cooking `.spec` files
//!
//! A descriptor declares one package: identity and metadata in the
//! preamble, dependency references, feature flags, the four build phases,
//! the `%files` manifest and the changelog.
//!
//! # Culinary Terminology
//!
//! The executor keeps the kitchen vocabulary:
//! - **Recipe**: the build phases of a descriptor
//! - **Cook**: run the enabled phases in order
//! - **Kitchen**: build directories, environment and resolver
//! - **Plate**: check the build root against the `%files` manifest
//!
//! # Example Descriptor
//!
//! ```text
//! %bcond_with tests
//!
//! Name:           ros-noetic-flexbe-states
//! Version:        1.3.1
//! Release:        1%{?dist}
//! Source0:        %{name}-%{version}.tar.gz
//! BuildRequires:  ros-noetic-catkin
//! %if 0%{?with_tests}
//! BuildRequires:  ros-noetic-rostest
//! %endif
//!
//! %build
//! make
//!
//! %files
//! /opt/ros/noetic
//! ```

pub mod changelog;
pub mod deps;
pub mod expr;
pub mod files;
pub mod format;
pub mod kitchen;
pub mod macros;
pub mod parser;
pub mod phases;
pub mod writer;

pub use changelog::{ChangeLog, ChangeLogEntry};
pub use deps::{DependencyKind, DependencyReference, DependencySet, ProvidesAssertion};
pub use files::{ConfigMode, EntryKind, FileAttr, InstallManifest, ManifestEntry};
pub use format::{Descriptor, MacroDefinition, MacroKind, PackageSection, SourceEntry};
pub use kitchen::{CheckPolicy, CookResult, Kitchen, KitchenConfig};
pub use parser::{LoadOptions, parse_descriptor, parse_descriptor_file, validate_descriptor};
pub use phases::{BuildPhase, BuildRecipe, Phase, PhaseCommand, RecipePlan};
pub use writer::{write_descriptor, write_descriptor_file};
