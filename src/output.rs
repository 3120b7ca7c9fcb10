//! Output sinks for formatters
//!
//! A formatter writes whole lines; where they go is decided once at setup:
//! standard output, a file, a user callback, or nowhere.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Serializable description of an output sink
///
/// In configuration files this is a single string: `"stdout"`, `"none"`, or a
/// file path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OutputTarget {
    #[default]
    Stdout,
    Disabled,
    File(PathBuf),
}

impl From<String> for OutputTarget {
    fn from(value: String) -> Self {
        match value.as_str() {
            "stdout" | "true" => OutputTarget::Stdout,
            "none" | "false" | "" => OutputTarget::Disabled,
            _ => OutputTarget::File(PathBuf::from(value)),
        }
    }
}

impl From<OutputTarget> for String {
    fn from(target: OutputTarget) -> Self {
        match target {
            OutputTarget::Stdout => "stdout".to_string(),
            OutputTarget::Disabled => "none".to_string(),
            OutputTarget::File(path) => path.to_string_lossy().into_owned(),
        }
    }
}

impl std::str::FromStr for OutputTarget {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(OutputTarget::from(s.to_string()))
    }
}

type LineCallback = Box<dyn FnMut(&str) + Send>;

enum Sink {
    Disabled,
    Stdout(io::Stdout),
    File(BufWriter<File>),
    Callback(LineCallback),
}

/// A line-oriented output resource
pub struct Output {
    sink: Sink,
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.sink {
            Sink::Disabled => "disabled",
            Sink::Stdout(_) => "stdout",
            Sink::File(_) => "file",
            Sink::Callback(_) => "callback",
        };
        f.debug_struct("Output").field("sink", &kind).finish()
    }
}

impl Output {
    pub fn stdout() -> Self {
        Self {
            sink: Sink::Stdout(io::stdout()),
        }
    }

    pub fn disabled() -> Self {
        Self { sink: Sink::Disabled }
    }

    /// Each line is handed to `callback` without its trailing newline
    pub fn callback(callback: impl FnMut(&str) + Send + 'static) -> Self {
        Self {
            sink: Sink::Callback(Box::new(callback)),
        }
    }

    /// Create (truncate) `path`; its directory must already exist
    pub fn file(path: &Path) -> Result<Self, ConfigError> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.is_dir() {
            return Err(ConfigError::OutputDirectory(dir));
        }
        let file = File::create(path)?;
        Ok(Self {
            sink: Sink::File(BufWriter::new(file)),
        })
    }

    pub fn from_target(target: &OutputTarget) -> Result<Self, ConfigError> {
        match target {
            OutputTarget::Stdout => Ok(Self::stdout()),
            OutputTarget::Disabled => Ok(Self::disabled()),
            OutputTarget::File(path) => Self::file(path),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.sink, Sink::Disabled)
    }

    /// Write one line; I/O failures are logged, never raised
    pub fn write_line(&mut self, line: &str) {
        let result = match &mut self.sink {
            Sink::Disabled => Ok(()),
            Sink::Stdout(stdout) => writeln!(stdout.lock(), "{}", line),
            Sink::File(file) => writeln!(file, "{}", line),
            Sink::Callback(callback) => {
                callback(line);
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!("Failed to write trace output: {}", e);
        }
    }

    pub fn flush(&mut self) {
        let result = match &mut self.sink {
            Sink::Stdout(stdout) => stdout.flush(),
            Sink::File(file) => file.flush(),
            Sink::Disabled | Sink::Callback(_) => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to flush trace output: {}", e);
        }
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        self.flush();
    }
}
