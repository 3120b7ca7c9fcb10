//! Tracing configuration
//!
//! Every key is optional; missing keys take their defaults.
//!
//! # Example calltrace.toml
//!
//! ```toml
//! files = ["src/**/*.js", "!**/*.test.js"]
//! wrap_functions = false
//!
//! [formatter]
//! kind = "profile"
//! output = "trace.log"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::filter::FileFilter;
use crate::formatter::FormatterConfig;
use crate::injector::InjectOptions;
use crate::output::OutputTarget;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch: when off, modules load unmodified
    pub enabled: bool,
    /// Selection globs, `!` revokes earlier matches
    pub files: Vec<String>,
    /// Guard every function body with try/catch
    pub wrap_functions: bool,
    /// Capture call arguments
    pub inspect_args: bool,
    pub capture_return_values: bool,
    /// Modules arrive wrapped in a synthetic outer function
    pub whole_file_wrapped: bool,
    /// Emit diagnostics through the logger
    pub logger: bool,
    pub formatter: FormatterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            files: vec!["**/*.js".to_string(), "!**/node_modules/**".to_string()],
            wrap_functions: true,
            inspect_args: true,
            capture_return_values: true,
            whole_file_wrapped: false,
            logger: false,
            formatter: FormatterConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate a TOML file
    ///
    /// ```no_run
    /// use calltrace::config::Config;
    ///
    /// # fn main() -> Result<(), calltrace::error::ConfigError> {
    /// let config = Config::from_file("calltrace.toml")?;
    /// println!("{} pattern(s)", config.files.len());
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Setup-time checks: patterns compile and the output directory exists
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.file_filter()?;
        if let OutputTarget::File(path) = &self.formatter.output {
            if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                if !dir.is_dir() {
                    return Err(ConfigError::OutputDirectory(dir.to_path_buf()));
                }
            }
        }
        Ok(())
    }

    pub fn file_filter(&self) -> Result<FileFilter, ConfigError> {
        FileFilter::new(&self.files)
    }

    pub fn inject_options(&self) -> InjectOptions {
        InjectOptions {
            wrap_in_try_catch: self.wrap_functions,
            include_arguments: self.inspect_args,
            capture_return_values: self.capture_return_values,
            whole_file_wrapped: self.whole_file_wrapped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::FormatterKind;
    use std::path::PathBuf;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.enabled);
        assert_eq!(config.formatter.inspect_args_max_len, 500);
    }

    #[test]
    fn test_partial_document() {
        let config = Config::from_toml_str(
            r#"
            wrap_functions = false
            files = ["lib/**/*.js"]

            [formatter]
            kind = "json"
            output = "none"
            inspect_args_count = 2
            "#,
        )
        .unwrap();
        assert!(!config.wrap_functions);
        assert!(config.inspect_args);
        assert_eq!(config.files, vec!["lib/**/*.js"]);
        assert_eq!(config.formatter.kind, FormatterKind::Json);
        assert_eq!(config.formatter.output, OutputTarget::Disabled);
        assert_eq!(config.formatter.inspect_args_count, 2);
        assert_eq!(config.formatter.indentation, "  ");
    }

    #[test]
    fn test_inject_options_mirror_config() {
        let config = Config {
            wrap_functions: false,
            whole_file_wrapped: true,
            ..Config::default()
        };
        let options = config.inject_options();
        assert!(!options.wrap_in_try_catch);
        assert!(options.include_arguments);
        assert!(options.whole_file_wrapped);
    }

    #[test]
    fn test_missing_output_directory_is_rejected() {
        let mut config = Config::default();
        config.formatter.output = OutputTarget::File(PathBuf::from("/no/such/dir/trace.log"));
        assert!(matches!(config.validate(), Err(ConfigError::OutputDirectory(_))));
    }

    #[test]
    fn test_bad_pattern_is_rejected() {
        let result = Config::from_toml_str(r#"files = ["[oops"]"#);
        assert!(matches!(result, Err(ConfigError::Pattern { .. })));
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            Config::from_toml_str("enabled = maybe"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calltrace.toml");
        fs::write(&path, "logger = true\n").unwrap();
        assert!(Config::from_file(&path).unwrap().logger);
        assert!(matches!(
            Config::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
