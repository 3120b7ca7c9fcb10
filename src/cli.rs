//! CLI argument parsing for calltrace

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::formatter::FormatterKind;
use crate::output::OutputTarget;

#[derive(Parser, Debug)]
#[command(name = "calltrace")]
#[command(version)]
#[command(about = "Source-to-source call tracer for JavaScript modules", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Instrument JavaScript files and print or write the rewritten source
    Instrument {
        /// Files or directories to instrument
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Write instrumented files under this directory instead of stdout
        #[arg(short = 'o', long = "out-dir", value_name = "DIR")]
        out_dir: Option<PathBuf>,

        /// Selection glob, may be repeated (replaces the configured patterns)
        #[arg(short = 'p', long = "pattern", value_name = "GLOB")]
        patterns: Vec<String>,

        /// Do not guard function bodies with try/catch
        #[arg(long = "no-wrap")]
        no_wrap: bool,

        /// Do not pass call arguments to the entry hook
        #[arg(long = "no-args")]
        no_args: bool,

        /// Modules are wrapped in a synthetic function starting on line 1
        #[arg(long = "whole-file-wrapped")]
        whole_file_wrapped: bool,
    },

    /// Replay a JSON-lines log of hook calls through the tracer
    Replay {
        /// Log file (stdin when omitted or "-")
        #[arg(value_name = "LOG")]
        log: Option<PathBuf>,

        /// Trace format
        #[arg(long = "format", value_enum)]
        format: Option<FormatterKind>,

        /// Where to write the trace: stdout, none, or a file path
        #[arg(short = 'o', long = "output", value_name = "TARGET")]
        output: Option<OutputTarget>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_instrument() {
        let cli = Cli::parse_from(["calltrace", "instrument", "a.js", "lib", "-o", "out"]);
        match cli.command {
            Command::Instrument { paths, out_dir, no_wrap, .. } => {
                assert_eq!(paths, vec![PathBuf::from("a.js"), PathBuf::from("lib")]);
                assert_eq!(out_dir, Some(PathBuf::from("out")));
                assert!(!no_wrap);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_instrument_requires_paths() {
        assert!(Cli::try_parse_from(["calltrace", "instrument"]).is_err());
    }

    #[test]
    fn test_cli_repeated_patterns() {
        let cli = Cli::parse_from(["calltrace", "instrument", "src", "-p", "**/*.js", "-p", "!**/test/**"]);
        match cli.command {
            Command::Instrument { patterns, .. } => assert_eq!(patterns, vec!["**/*.js", "!**/test/**"]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_replay_options() {
        let cli = Cli::parse_from(["calltrace", "--debug", "replay", "calls.jsonl", "--format", "json", "-o", "none"]);
        assert!(cli.debug);
        match cli.command {
            Command::Replay { log, format, output } => {
                assert_eq!(log, Some(PathBuf::from("calls.jsonl")));
                assert_eq!(format, Some(FormatterKind::Json));
                assert_eq!(output, Some(OutputTarget::Disabled));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_global_config_after_subcommand() {
        let cli = Cli::parse_from(["calltrace", "replay", "--config", "calltrace.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("calltrace.toml")));
    }
}
