use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use calltrace::cli::{Cli, Command};
use calltrace::config::Config;
use calltrace::loader::{self, ModuleLoader};
use calltrace::{hooks, replay};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool, logger: bool) {
    if debug || logger {
        let level = if debug {
            tracing::Level::TRACE
        } else {
            tracing::Level::INFO
        };
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
            .with_writer(std::io::stderr)
            .init();
    }
}

/// A module to instrument and where it lands relative to the output root
struct Job {
    path: PathBuf,
    relative: PathBuf,
}

fn collect_dir(root: &Path, dir: &Path, jobs: &mut Vec<Job>) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            collect_dir(root, &path, jobs)?;
        } else {
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            jobs.push(Job { path, relative });
        }
    }
    Ok(())
}

fn collect_jobs(paths: &[PathBuf]) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    for path in paths {
        if path.is_dir() {
            collect_dir(path, path, &mut jobs)?;
        } else if path.is_file() {
            let relative = path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| path.clone());
            jobs.push(Job {
                path: path.clone(),
                relative,
            });
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    Ok(jobs)
}

fn run_instrument(config: &Config, paths: &[PathBuf], out_dir: Option<&Path>) -> Result<()> {
    let loader = ModuleLoader::new(config)?;
    let jobs = collect_jobs(paths)?;
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    let mut instrumented = 0usize;
    let mut selected = 0usize;

    for job in &jobs {
        let filename = job.path.to_string_lossy();
        if !loader.should_instrument(&filename) {
            continue;
        }
        selected += 1;

        let source = fs::read_to_string(&job.path)
            .with_context(|| format!("Failed to read {}", job.path.display()))?;
        let module = loader.load(&filename, &source);
        if module.instrumented {
            instrumented += 1;
        } else {
            tracing::warn!("{} copied unmodified", job.path.display());
        }

        match out_dir {
            Some(root) => {
                let target = root.join(&job.relative);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
                fs::write(&target, &module.code)
                    .with_context(|| format!("Failed to write {}", target.display()))?;
            }
            None => {
                writeln!(stdout, "{}", module.code)?;
            }
        }
    }

    eprintln!(
        "Instrumented {} of {} selected file(s) ({} found)",
        instrumented,
        selected,
        jobs.len()
    );
    Ok(())
}

fn run_replay(config: &Config, log: Option<&Path>) -> Result<()> {
    let injection = loader::inject(config, None)?;

    let summary = match log {
        Some(path) if path != Path::new("-") => {
            let file =
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
            replay::replay(BufReader::new(file))?
        }
        _ => replay::replay(io::stdin().lock())?,
    };
    let desyncs = hooks::with_tracer(|tracer| tracer.desync_count()).unwrap_or(0);
    injection.finish();

    eprintln!(
        "Replayed {} entries, {} exits, {} catches ({} unmatched, {} open, {} desync)",
        summary.entries,
        summary.exits,
        summary.catches,
        summary.unmatched,
        summary.open_frames,
        desyncs
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug, config.logger);

    match args.command {
        Command::Instrument {
            paths,
            out_dir,
            patterns,
            no_wrap,
            no_args,
            whole_file_wrapped,
        } => {
            if !patterns.is_empty() {
                config.files = patterns;
            }
            config.wrap_functions &= !no_wrap;
            config.inspect_args &= !no_args;
            config.whole_file_wrapped |= whole_file_wrapped;
            config.validate()?;
            run_instrument(&config, &paths, out_dir.as_deref())?;
        }
        Command::Replay {
            log,
            format,
            output,
        } => {
            if let Some(kind) = format {
                config.formatter.kind = kind;
            }
            if let Some(target) = output {
                config.formatter.output = target;
            }
            run_replay(&config, log.as_deref())?;
        }
    }

    Ok(())
}
