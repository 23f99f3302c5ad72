// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: descriptor path
fn spec_arg() -> Arg {
    Arg::new("spec")
        .required(true)
        .value_name("SPEC")
        .help("Path to the .spec file")
}

/// Common arguments: feature flag overrides
fn feature_args() -> [Arg; 2] {
    [
        Arg::new("with")
            .long("with")
            .value_name("FLAG")
            .action(ArgAction::Append)
            .help("Enable a feature flag (repeatable)"),
        Arg::new("without")
            .long("without")
            .value_name("FLAG")
            .action(ArgAction::Append)
            .help("Disable a feature flag (repeatable)"),
    ]
}

fn strict_files_arg() -> Arg {
    Arg::new("strict_files")
        .long("strict-files")
        .action(ArgAction::SetTrue)
        .help("Treat unpackaged files as an error")
}

fn build_cli() -> Command {
    Command::new("spec-kitchen")
        .version(env!("CARGO_PKG_VERSION"))
        .author("spec-kitchen Contributors")
        .about("Load, evaluate, cook and verify RPM .spec descriptors")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Configuration file (default: ~/.config/spec-kitchen/config.toml)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("Increase log output (-v debug, -vv trace)"),
        )
        .arg(
            Arg::new("define")
                .short('D')
                .long("define")
                .value_name("NAME=VALUE")
                .action(ArgAction::Append)
                .global(true)
                .help("Define a macro before loading, like rpmbuild --define"),
        )
        .arg(
            Arg::new("channel")
                .long("channel")
                .global(true)
                .help("Target distribution channel (e.g. noetic, humble)"),
        )
        .arg(
            Arg::new("arch")
                .long("arch")
                .global(true)
                .help("Target architecture for %ifarch (default: host)"),
        )
        .subcommand(
            Command::new("inspect")
                .about("Load a descriptor and print a summary")
                .arg(spec_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Dump the loaded model as JSON"),
                ),
        )
        .subcommand(
            Command::new("lint")
                .about("Report warnings for a descriptor that loads")
                .arg(spec_arg())
                .arg(
                    Arg::new("strict")
                        .long("strict")
                        .action(ArgAction::SetTrue)
                        .help("Exit non-zero when there are warnings"),
                ),
        )
        .subcommand(
            Command::new("features")
                .about("Print the effective feature flags")
                .arg(spec_arg())
                .args(feature_args()),
        )
        .subcommand(
            Command::new("render")
                .about("Print the canonical form of a descriptor")
                .arg(spec_arg())
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("Write to a file instead of stdout"),
                ),
        )
        .subcommand(
            Command::new("cook")
                .about("Run %prep, %build, %install and %check, then check %files")
                .arg(spec_arg())
                .args(feature_args())
                .arg(Arg::new("topdir").long("topdir").help("Parent of BUILD, SOURCES and BUILDROOT"))
                .arg(Arg::new("buildroot").long("buildroot").help("Install destination (%{buildroot})"))
                .arg(Arg::new("sourcedir").long("sourcedir").help("Directory holding sources and patches"))
                .arg(
                    Arg::new("nocheck")
                        .long("nocheck")
                        .action(ArgAction::SetTrue)
                        .help("Skip %check"),
                )
                .arg(strict_files_arg())
                .arg(Arg::new("report").long("report").value_name("FILE").help("Write a JSON build report"))
                .arg(Arg::new("log").long("log").value_name("FILE").help("Write the build log")),
        )
        .subcommand(
            Command::new("verify")
                .about("Check an existing build root against %files")
                .arg(spec_arg())
                .args(feature_args())
                .arg(
                    Arg::new("buildroot")
                        .long("buildroot")
                        .required(true)
                        .help("Build root to check"),
                )
                .arg(strict_files_arg()),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(Arg::new("shell").required(true).help("Shell to generate completions for")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("spec-kitchen.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
