// src/error.rs

//! Error types shared across the crate

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// How a finished (or killed) command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ExitStatus {
    /// Process exited with a status code
    Code(i32),
    /// Process was terminated by a signal or killed without a code
    Killed,
    /// Process exceeded the configured timeout and was killed
    TimedOut,
}

impl ExitStatus {
    pub fn from_std(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self::Code(code),
            None => Self::Killed,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Code(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit status {}", code),
            Self::Killed => write!(f, "killed by signal"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed descriptor text
    #[error("line {line}: {message} (expected {expected})")]
    Parse {
        line: usize,
        message: String,
        expected: String,
    },

    /// Build requirements the resolver could not locate
    #[error("Unresolved build dependencies: {}", .missing.join(", "))]
    UnresolvedDependency { missing: Vec<String> },

    /// A command in a fatal phase exited unsuccessfully
    #[error("%{phase} failed: command `{command}` ended with {status}")]
    PhaseExecution {
        phase: String,
        command: String,
        status: ExitStatus,
    },

    /// Installed tree does not match the declared %files list
    #[error(
        "Manifest mismatch: {} missing, {} unpackaged{}",
        .missing.len(),
        .unpackaged.len(),
        first_listed(.missing, .unpackaged)
    )]
    ManifestMismatch {
        missing: Vec<String>,
        unpackaged: Vec<String>,
    },

    #[error("Changelog error: {0}")]
    Changelog(String),

    #[error("Invalid version: {0}")]
    Version(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a parse error for a 1-based line number
    pub fn parse(line: usize, message: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
            expected: expected.into(),
        }
    }
}

fn first_listed(missing: &[String], unpackaged: &[String]) -> String {
    match missing.first().or(unpackaged.first()) {
        Some(path) => format!(" (first: {})", path),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_names_line_and_grammar() {
        let err = Error::parse(7, "unknown section %foo", "a known section name");
        let msg = err.to_string();
        assert!(msg.contains("line 7"));
        assert!(msg.contains("unknown section %foo"));
        assert!(msg.contains("a known section name"));
    }

    #[test]
    fn test_phase_error_names_phase_and_command() {
        let err = Error::PhaseExecution {
            phase: "build".to_string(),
            command: "make".to_string(),
            status: ExitStatus::Code(2),
        };
        assert_eq!(err.to_string(), "%build failed: command `make` ended with exit status 2");
    }

    #[test]
    fn test_manifest_mismatch_mentions_first_path() {
        let err = Error::ManifestMismatch {
            missing: vec!["/opt/ros/noetic".to_string()],
            unpackaged: Vec::new(),
        };
        assert!(err.to_string().contains("/opt/ros/noetic"));
    }
}
