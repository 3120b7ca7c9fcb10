//! Error taxonomy
//!
//! Parse and edit failures are scoped to one module: the loader falls back to
//! the unmodified source. Configuration errors are the only ones surfaced to
//! the caller of the injection entry point, and only at setup time.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while instrumenting a single module
#[derive(Error, Debug)]
pub enum InstrumentError {
    #[error("Failed to parse {file} at {line}:{column}")]
    Parse {
        file: String,
        line: usize,
        column: usize,
    },

    #[error("Failed to load JavaScript grammar: {0}")]
    Language(String),

    #[error("Conflicting source edits: {0}")]
    Edit(String),

    #[error("Instrumented {file} does not parse at {line}:{column}")]
    InvalidRewrite {
        file: String,
        line: usize,
        column: usize,
    },
}

/// Errors raised while validating a configuration, before any module is touched
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Custom handlers must supply both an entry and an exit handler")]
    HandlerPairing,

    #[error("Invalid output file, directory does not exist: {}", .0.display())]
    OutputDirectory(PathBuf),

    #[error("Invalid file pattern {pattern:?}: {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = InstrumentError::Parse {
            file: "a.js".to_string(),
            line: 3,
            column: 7,
        };
        assert_eq!(err.to_string(), "Failed to parse a.js at 3:7");
    }

    #[test]
    fn test_output_directory_display() {
        let err = ConfigError::OutputDirectory(PathBuf::from("/no/such/dir"));
        assert!(err.to_string().contains("/no/such/dir"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: ConfigError = io.into();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
