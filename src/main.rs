// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::{CookArgs, Session};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // -v wins over RUST_LOG; otherwise RUST_LOG, then info
    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "spec-kitchen", &mut std::io::stdout());
        return Ok(());
    }

    let session = Session::from_cli(&cli)?;

    match cli.command {
        Commands::Inspect { spec, json } => commands::cmd_inspect(&session, &spec, json),
        Commands::Lint { spec, strict } => commands::cmd_lint(&session, &spec, strict),
        Commands::Features { spec, flags } => commands::cmd_features(&session, &spec, &flags),
        Commands::Render { spec, output } => {
            commands::cmd_render(&session, &spec, output.as_deref())
        }
        Commands::Cook {
            spec,
            flags,
            topdir,
            buildroot,
            sourcedir,
            nocheck,
            strict_files,
            report,
            log,
        } => commands::cmd_cook(
            &session,
            &spec,
            &CookArgs {
                flags,
                topdir,
                buildroot,
                sourcedir,
                nocheck,
                strict_files,
                report,
                log,
            },
        ),
        Commands::Verify {
            spec,
            flags,
            buildroot,
            strict_files,
        } => commands::cmd_verify(&session, &spec, &flags, &buildroot, strict_files),
        Commands::Completions { .. } => Ok(()),
    }
}
