// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use spec_kitchen::recipe::{Descriptor, KitchenConfig, LoadOptions, parse_descriptor};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Path of a file under `tests/fixtures`
pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture_text(name: &str) -> String {
    fs::read_to_string(fixture_path(name)).unwrap()
}

/// Load a fixture for a channel, the way `spec-kitchen --channel` does
pub fn load_fixture(name: &str, channel: &str) -> Descriptor {
    let options = LoadOptions::default().with_channel(channel);
    parse_descriptor(&fixture_text(name), &options).unwrap()
}

pub fn noetic() -> Descriptor {
    load_fixture("ros-noetic-flexbe-states.spec", "noetic")
}

pub fn humble() -> Descriptor {
    load_fixture("ros-humble-flexbe-states.spec", "humble")
}

/// A scratch `rpmbuild`-style tree.
///
/// Returns (TempDir, config) - keep the TempDir alive to prevent cleanup.
pub fn scratch_kitchen() -> (TempDir, KitchenConfig) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = KitchenConfig::with_topdir(temp_dir.path());
    config.home = temp_dir.path().to_path_buf();
    (temp_dir, config)
}

/// Minimal preamble for handwritten descriptors
pub const PREAMBLE: &str = "Name: demo\nVersion: 1.0\nRelease: 1\nSummary: Demo\nLicense: MIT\n";

/// Load a handwritten descriptor that starts after [`PREAMBLE`]
pub fn load_with_preamble(body: &str) -> Descriptor {
    let text = format!("{}{}", PREAMBLE, body);
    parse_descriptor(&text, &LoadOptions::default()).unwrap()
}
