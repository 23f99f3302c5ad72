// src/commands/mod.rs
//! Command handlers for the spec-kitchen CLI

mod build;
mod describe;

pub use build::{cmd_cook, cmd_verify, CookArgs};
pub use describe::{cmd_features, cmd_inspect, cmd_lint, cmd_render};

use anyhow::{Context, Result};
use spec_kitchen::config::ConfigFile;
use spec_kitchen::features::FeatureOverrides;
use spec_kitchen::recipe::{Descriptor, LoadOptions, parse_descriptor_file};
use std::path::Path;
use tracing::debug;

use crate::cli::{Cli, FeatureArgs};

/// Configuration and loader settings shared by every command
pub struct Session {
    pub config: ConfigFile,
    pub options: LoadOptions,
}

impl Session {
    /// Load the config file and layer the global CLI flags on top
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let config = ConfigFile::load(cli.config.as_deref())
            .context("Failed to load configuration")?;

        let mut options = config.load_options();
        if let Some(channel) = &cli.channel {
            options = options.with_channel(channel.clone());
        }
        if let Some(arch) = &cli.arch {
            options.arch = arch.clone();
        }
        for define in &cli.defines {
            let (name, value) = parse_define(define)?;
            debug!("Command line define: {} = {}", name, value);
            options = options.define(name, value);
        }

        Ok(Self { config, options })
    }

    /// Load a descriptor with the session's options
    pub fn load(&self, spec: &Path) -> Result<Descriptor> {
        parse_descriptor_file(spec, &self.options)
            .with_context(|| format!("Failed to load descriptor: {}", spec.display()))
    }

    /// Config `[features]` overridden by `--with` / `--without`
    pub fn overrides(&self, flags: &FeatureArgs) -> FeatureOverrides {
        self.config
            .feature_overrides()
            .merged_with(&FeatureOverrides::from_lists(&flags.with, &flags.without))
    }
}

/// Split `NAME=VALUE` (or rpm's `NAME VALUE`)
fn parse_define(define: &str) -> Result<(String, String)> {
    let (name, value) = define
        .split_once('=')
        .or_else(|| define.split_once(char::is_whitespace))
        .unwrap_or((define, ""));
    let name = name.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!("Invalid macro definition '{}': expected NAME=VALUE", define);
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_define() {
        assert_eq!(
            parse_define("dist=.el8").unwrap(),
            ("dist".to_string(), ".el8".to_string())
        );
        assert_eq!(
            parse_define("ros_distro noetic").unwrap(),
            ("ros_distro".to_string(), "noetic".to_string())
        );
        assert_eq!(parse_define("flag").unwrap(), ("flag".to_string(), String::new()));
        assert!(parse_define("=x").is_err());
        assert!(parse_define("a-b=1").is_err());
    }
}
