// src/cli/mod.rs
//! CLI definitions for spec-kitchen
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! Descriptor commands:
//! - `inspect` - Load a descriptor and summarise it
//! - `lint` - Report suspicious but loadable descriptors
//! - `features` - Show the effective feature flags
//! - `render` - Write the canonical form of a descriptor
//!
//! Build commands:
//! - `cook` - Run the recipe and check the manifest
//! - `verify` - Check an existing build root against the manifest

use clap::{ArgAction, Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "spec-kitchen")]
#[command(author = "spec-kitchen Contributors")]
#[command(version)]
#[command(about = "Load, evaluate, cook and verify RPM .spec descriptors", long_about = None)]
pub struct Cli {
    /// Configuration file (default: ~/.config/spec-kitchen/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Define a macro before loading, like rpmbuild --define
    #[arg(short = 'D', long = "define", value_name = "NAME=VALUE", global = true)]
    pub defines: Vec<String>,

    /// Target distribution channel (e.g. noetic, humble)
    #[arg(long, global = true)]
    pub channel: Option<String>,

    /// Target architecture for %ifarch (default: host)
    #[arg(long, global = true)]
    pub arch: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// `--with` / `--without` flag overrides
#[derive(Args, Debug, Default)]
pub struct FeatureArgs {
    /// Enable a feature flag (repeatable)
    #[arg(long = "with", value_name = "FLAG")]
    pub with: Vec<String>,

    /// Disable a feature flag (repeatable)
    #[arg(long = "without", value_name = "FLAG")]
    pub without: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    // =========================================================================
    // Descriptor Commands
    // =========================================================================
    /// Load a descriptor and print a summary
    Inspect {
        /// Path to the .spec file
        spec: PathBuf,

        /// Dump the loaded model as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report warnings for a descriptor that loads
    Lint {
        /// Path to the .spec file
        spec: PathBuf,

        /// Exit non-zero when there are warnings
        #[arg(long)]
        strict: bool,
    },

    /// Print the effective feature flags
    Features {
        /// Path to the .spec file
        spec: PathBuf,

        #[command(flatten)]
        flags: FeatureArgs,
    },

    /// Print the canonical form of a descriptor
    Render {
        /// Path to the .spec file
        spec: PathBuf,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    // =========================================================================
    // Build Commands
    // =========================================================================
    /// Run %prep, %build, %install and %check, then check %files
    Cook {
        /// Path to the .spec file
        spec: PathBuf,

        #[command(flatten)]
        flags: FeatureArgs,

        /// Parent of BUILD, SOURCES and BUILDROOT
        #[arg(long)]
        topdir: Option<PathBuf>,

        /// Install destination (%{buildroot})
        #[arg(long)]
        buildroot: Option<PathBuf>,

        /// Directory holding sources and patches
        #[arg(long)]
        sourcedir: Option<PathBuf>,

        /// Skip %check
        #[arg(long)]
        nocheck: bool,

        /// Treat unpackaged files as an error
        #[arg(long)]
        strict_files: bool,

        /// Write a JSON build report
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,

        /// Write the build log
        #[arg(long, value_name = "FILE")]
        log: Option<PathBuf>,
    },

    /// Check an existing build root against %files
    Verify {
        /// Path to the .spec file
        spec: PathBuf,

        #[command(flatten)]
        flags: FeatureArgs,

        /// Build root to check
        #[arg(long)]
        buildroot: PathBuf,

        /// Treat unpackaged files as an error
        #[arg(long)]
        strict_files: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cook_arguments() {
        let cli = Cli::parse_from([
            "spec-kitchen",
            "-D",
            "dist=.el8",
            "cook",
            "flexbe.spec",
            "--with",
            "tests",
            "--nocheck",
            "--buildroot",
            "/tmp/root",
        ]);
        assert_eq!(cli.defines, vec!["dist=.el8"]);
        match cli.command {
            Commands::Cook {
                flags,
                nocheck,
                buildroot,
                ..
            } => {
                assert_eq!(flags.with, vec!["tests"]);
                assert!(nocheck);
                assert_eq!(buildroot, Some(PathBuf::from("/tmp/root")));
            }
            _ => panic!("expected cook"),
        }
    }
}
