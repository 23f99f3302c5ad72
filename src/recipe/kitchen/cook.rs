// src/recipe/kitchen/cook.rs

//! Cook: run the enabled phases of one descriptor
//!
//! Every command gets its own `sh -c` so a failure can be pinned to one
//! statement. Shell variables still flow through a phase the way they do
//! in rpmbuild's single script: each command runs under `set -a`, its
//! `export -p` is saved on success and the next command of the phase
//! sources it first.

use crate::error::{Error, ExitStatus, Result};
use crate::recipe::format::Descriptor;
use crate::recipe::parser::shell_quote;
use crate::recipe::phases::{Phase, PlannedPhase, RecipePlan};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use super::Kitchen;
use super::config::{CheckFailure, CheckPolicy, KitchenConfig, PhaseReport};

/// A single cook operation
pub struct Cook<'a> {
    kitchen: &'a Kitchen,
    descriptor: &'a Descriptor,
    /// Receives `pwd` after a top-level `cd`
    cwd_file: NamedTempFile,
    /// Exported shell state of the current phase
    env_file: NamedTempFile,
    /// Build log accumulator
    pub(super) log: String,
    /// Copy of the log written as it grows
    log_sink: Option<File>,
    pub(super) warnings: Vec<String>,
    pub(super) check_failures: Vec<CheckFailure>,
    pub(super) phases: Vec<PhaseReport>,
}

/// How one command ended and where it left the shell
struct CommandOutcome {
    status: ExitStatus,
    workdir: Option<PathBuf>,
}

impl<'a> Cook<'a> {
    pub(super) fn new(kitchen: &'a Kitchen, descriptor: &'a Descriptor) -> Result<Self> {
        let log_sink = match &kitchen.config.log_file {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                Some(File::create(path)?)
            }
            None => None,
        };
        Ok(Self {
            kitchen,
            descriptor,
            cwd_file: NamedTempFile::new()?,
            env_file: NamedTempFile::new()?,
            log: String::new(),
            log_sink,
            warnings: Vec::new(),
            check_failures: Vec::new(),
            phases: Vec::new(),
        })
    }

    /// Create the build directories; the build root starts empty
    pub(super) fn prepare_dirs(&mut self) -> Result<()> {
        let config = &self.kitchen.config;
        fs::create_dir_all(&config.builddir)?;
        fs::create_dir_all(&config.sourcedir)?;
        if config.clean_buildroot && config.buildroot.exists() {
            check_cleanable(config)?;
            debug!("Cleaning build root {}", config.buildroot.display());
            fs::remove_dir_all(&config.buildroot)?;
        }
        fs::create_dir_all(&config.buildroot)?;
        Ok(())
    }

    /// Run every planned phase in order
    ///
    /// `%prep` starts in the build directory; later phases start where
    /// `%prep` finished, usually the unpacked source tree.
    pub(super) fn run(&mut self, plan: &RecipePlan) -> Result<()> {
        let builddir = self.kitchen.config.builddir.clone();
        let mut subdir = builddir.clone();

        for planned in &plan.phases {
            if planned.phase == Phase::Check && !self.kitchen.config.run_check {
                info!("Skipping %check");
                self.log_line("=== %check (skipped) ===")?;
                continue;
            }
            let start = if planned.phase == Phase::Prep {
                builddir.clone()
            } else {
                subdir.clone()
            };
            let end = self.run_phase(planned, start)?;
            if planned.phase == Phase::Prep {
                subdir = end;
            }
        }
        Ok(())
    }

    fn run_phase(&mut self, planned: &PlannedPhase, start: PathBuf) -> Result<PathBuf> {
        let section = planned.phase.section();
        info!("Running {} ({} commands)", section, planned.commands.len());
        self.log_line(&format!("=== {} ===", section))?;
        // Each phase starts from the controlled environment alone
        fs::write(self.env_file.path(), "")?;

        let started = Instant::now();
        let mut workdir = start;
        let mut commands_run = 0;

        for command in &planned.commands {
            let outcome = self.run_command(planned.phase, command, &workdir)?;
            commands_run += 1;

            if outcome.status.success() {
                if let Some(dir) = outcome.workdir {
                    debug!("Working directory now {}", dir.display());
                    workdir = dir;
                }
                continue;
            }

            if planned.phase == Phase::Check
                && self.kitchen.config.check_policy == CheckPolicy::Report
            {
                warn!("%check command `{}` ended with {}", command, outcome.status);
                self.warnings
                    .push(format!("Tests failed: `{}` ended with {}", command, outcome.status));
                self.check_failures.push(CheckFailure {
                    command: command.clone(),
                    status: outcome.status,
                });
                continue;
            }

            return Err(Error::PhaseExecution {
                phase: planned.phase.to_string(),
                command: command.clone(),
                status: outcome.status,
            });
        }

        self.phases.push(PhaseReport {
            phase: planned.phase,
            commands_run,
            workdir: workdir.clone(),
            duration_ms: started.elapsed().as_millis(),
        });
        Ok(workdir)
    }

    /// Run one command in its own shell
    fn run_command(&mut self, phase: Phase, command: &str, workdir: &Path) -> Result<CommandOutcome> {
        let kitchen = self.kitchen;
        let config = &kitchen.config;
        debug!("[{}] $ {}", phase, command);
        self.log_line(&format!("+ {}", command))?;

        let tracks_cd = ends_with_top_level_cd(command);
        let script = command_script(
            command,
            config.env_setup.as_deref(),
            self.env_file.path(),
            tracks_cd.then(|| self.cwd_file.path()),
            workdir,
        );

        // stdout and stderr share one file so the log keeps their order
        let mut output = tempfile::tempfile()?;
        let mut child = Command::new(&config.shell)
            .arg("-c")
            .arg(&script)
            .current_dir(workdir)
            .env_clear()
            .envs(self.environment())
            .stdin(Stdio::null())
            .stdout(Stdio::from(output.try_clone()?))
            .stderr(Stdio::from(output.try_clone()?))
            .spawn()?;

        let status = match config.timeout {
            Some(timeout) => match child.wait_timeout(timeout)? {
                Some(status) => ExitStatus::from_std(status),
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    warn!("[{}] command timed out after {}s", phase, timeout.as_secs());
                    ExitStatus::TimedOut
                }
            },
            None => ExitStatus::from_std(child.wait()?),
        };

        let mut raw = Vec::new();
        output.seek(SeekFrom::Start(0))?;
        output.read_to_end(&mut raw)?;
        let text = String::from_utf8_lossy(&raw);
        for line in text.lines() {
            info!("[{}] {}", phase, line);
        }
        self.log_output(&text)?;

        let workdir = if tracks_cd && status.success() {
            let recorded = fs::read_to_string(self.cwd_file.path())?;
            let recorded = recorded.trim();
            (!recorded.is_empty()).then(|| PathBuf::from(recorded))
        } else {
            None
        };

        Ok(CommandOutcome { status, workdir })
    }

    /// The controlled environment every command runs with
    fn environment(&self) -> Vec<(String, String)> {
        let config = &self.kitchen.config;
        let pkg = &self.descriptor.package;
        let path = |p: &Path| p.to_string_lossy().to_string();

        let mut env = vec![
            ("PATH".to_string(), config.path.clone()),
            ("HOME".to_string(), path(&config.home)),
            ("RPM_BUILD_ROOT".to_string(), path(&config.buildroot)),
            ("RPM_BUILD_DIR".to_string(), path(&config.builddir)),
            ("RPM_SOURCE_DIR".to_string(), path(&config.sourcedir)),
            ("RPM_PACKAGE_NAME".to_string(), pkg.name.clone()),
            ("RPM_PACKAGE_VERSION".to_string(), pkg.version.clone()),
            ("RPM_PACKAGE_RELEASE".to_string(), pkg.release.clone()),
        ];
        for (key, value) in &config.env {
            env.push((key.clone(), value.clone()));
        }
        env
    }

    fn log_line(&mut self, line: &str) -> Result<()> {
        self.append_log(&format!("{}\n", line))
    }

    fn log_output(&mut self, output: &str) -> Result<()> {
        if output.is_empty() {
            return Ok(());
        }
        if output.ends_with('\n') {
            self.append_log(output)
        } else {
            self.append_log(&format!("{}\n", output))
        }
    }

    fn append_log(&mut self, text: &str) -> Result<()> {
        self.log.push_str(text);
        if let Some(sink) = &mut self.log_sink {
            sink.write_all(text.as_bytes())?;
            sink.flush()?;
        }
        Ok(())
    }
}

/// Wrap one command in the script its shell runs
///
/// Restores the phase's saved exports, runs the command with `set -a` so
/// plain assignments are exported too, and on success saves `export -p`
/// (and `pwd` when asked) from an EXIT trap so `exit 0` is covered.
fn command_script(
    command: &str,
    env_setup: Option<&Path>,
    env_file: &Path,
    cwd_file: Option<&Path>,
    workdir: &Path,
) -> String {
    let quote = |p: &Path| shell_quote(&p.to_string_lossy());
    let env = quote(env_file);

    let mut script = String::from("umask 022\n");
    if let Some(setup) = env_setup {
        let q = quote(setup);
        script.push_str(&format!("if [ -f {q} ]; then . {q}; fi\n"));
    }
    // The restored PWD/OLDPWD are stale; cd puts them right
    script.push_str(&format!(
        "if [ -s {env} ]; then . {env}; cd {} || exit 1; fi\n",
        quote(workdir)
    ));
    script.push_str("__kitchen_exit() {\n");
    script.push_str("    __kitchen_status=$?\n");
    script.push_str("    set +a\n");
    script.push_str("    if [ \"$__kitchen_status\" -eq 0 ]; then\n");
    script.push_str("        unset __kitchen_status\n");
    script.push_str(&format!("        export -p > {env}\n"));
    if let Some(cwd) = cwd_file {
        script.push_str(&format!("        pwd > {}\n", quote(cwd)));
    }
    script.push_str("        exit 0\n");
    script.push_str("    fi\n");
    script.push_str("    exit \"$__kitchen_status\"\n");
    script.push_str("}\n");
    script.push_str("trap __kitchen_exit EXIT\n");
    script.push_str("set -a\n");
    script.push_str(command);
    script.push('\n');
    script
}

/// Refuse to empty a build root that could hold unrelated files
///
/// `/`, the home directory and anything containing the build or source
/// directory are never removed. A build root outside the top directory
/// is only cleaned when it is already empty.
fn check_cleanable(config: &KitchenConfig) -> Result<()> {
    let canonical = |p: &Path| fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    let root = canonical(&config.buildroot);

    let mut protected = vec![
        canonical(&config.builddir),
        canonical(&config.sourcedir),
        canonical(&config.home),
    ];
    if let Some(home) = dirs::home_dir() {
        protected.push(canonical(&home));
    }
    if root.parent().is_none() || protected.iter().any(|p| p.starts_with(&root)) {
        return Err(Error::Config(format!(
            "refusing to clean build root {}: it contains the home, build or source directory",
            config.buildroot.display()
        )));
    }

    let inside_topdir = config
        .builddir
        .parent()
        .map(canonical)
        .is_some_and(|topdir| root.starts_with(&topdir) && root != topdir);
    if !inside_topdir && fs::read_dir(&root)?.next().is_some() {
        return Err(Error::Config(format!(
            "refusing to clean build root {}: it is outside the build tree and not empty",
            config.buildroot.display()
        )));
    }
    Ok(())
}

/// Whether the statement ends with a `cd` that stays in effect
///
/// Only a plain `cd DIR` or the last link of an `a && b && cd DIR` chain
/// counts; a `cd` inside a subshell, a list or a compound statement does
/// not move later commands.
fn ends_with_top_level_cd(command: &str) -> bool {
    if command.contains(['\n', ';', '|', '(', ')', '`', '{', '}']) {
        return false;
    }
    let last = command.rsplit("&&").next().unwrap_or(command).trim();
    last == "cd" || last.starts_with("cd ") || last.starts_with("cd\t")
}
