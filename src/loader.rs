//! Injection entry point and per-module loading
//!
//! [`inject`] validates the configuration, builds the runtime handler and
//! installs it in the hook namespace. The returned [`Injection`] owns a
//! [`ModuleLoader`] that decides per file whether to instrument and falls back
//! to the original text whenever instrumentation fails. Dropping the
//! injection tears the hooks down and lets formatters flush.

use crate::config::Config;
use crate::error::ConfigError;
use crate::filter::FileFilter;
use crate::formatter::{Formatter, FormatterConfig, FormatterKind, TextFormatter};
use crate::function_profiler::FunctionProfiler;
use crate::hooks::{self, CustomHandlers, InstallId, TraceHandler};
use crate::injector::{self, Diagnostic, InjectOptions};
use crate::json_output::JsonFormatter;
use crate::output::Output;
use crate::tracer::Tracer;

/// Build the formatter selected by `config`
pub fn build_formatter(config: &FormatterConfig) -> Result<Box<dyn Formatter>, ConfigError> {
    let output = Output::from_target(&config.output)?;
    Ok(match config.kind {
        FormatterKind::Text => Box::new(TextFormatter::new(config.clone(), output)),
        FormatterKind::Json => Box::new(JsonFormatter::new(output)),
        FormatterKind::Profile => Box::new(FunctionProfiler::new(output)),
    })
}

/// What the loader hands back to the host for one module
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub code: String,
    /// False when the original text is returned
    pub instrumented: bool,
    pub functions: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl LoadedModule {
    fn original(source: &str) -> Self {
        Self {
            code: source.to_string(),
            instrumented: false,
            functions: 0,
            diagnostics: Vec::new(),
        }
    }
}

/// Applies the file filter and the engine to each module
#[derive(Debug, Clone)]
pub struct ModuleLoader {
    enabled: bool,
    filter: FileFilter,
    options: InjectOptions,
}

impl ModuleLoader {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: config.enabled,
            filter: config.file_filter()?,
            options: config.inject_options(),
        })
    }

    pub fn options(&self) -> &InjectOptions {
        &self.options
    }

    pub fn should_instrument(&self, filename: &str) -> bool {
        self.enabled && self.filter.matches(filename)
    }

    /// Instrument `source` if selected; never fails
    pub fn load(&self, filename: &str, source: &str) -> LoadedModule {
        if !self.should_instrument(filename) {
            tracing::debug!("{} not selected, loading unmodified", filename);
            return LoadedModule::original(source);
        }

        match injector::instrument(filename, source, &self.options) {
            Ok(result) => LoadedModule {
                code: result.code,
                instrumented: true,
                functions: result.functions.len(),
                diagnostics: result.diagnostics,
            },
            Err(e) => {
                tracing::warn!("{}, loading unmodified", e);
                LoadedModule::original(source)
            }
        }
    }
}

/// A live injection; hooks stay installed until it is dropped
#[derive(Debug)]
pub struct Injection {
    loader: ModuleLoader,
    installed: Option<InstallId>,
}

impl Injection {
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    pub fn is_active(&self) -> bool {
        self.installed.is_some()
    }

    /// Tear down the hooks and flush the handler
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(id) = self.installed.take() else {
            return;
        };
        // A later injection may have replaced this one's handler
        match hooks::teardown_owned(id) {
            Some(mut handler) => {
                handler.finish();
                tracing::debug!("Tracing hooks removed");
            }
            None => tracing::debug!("Trace handler already replaced, hooks left in place"),
        }
    }
}

impl Drop for Injection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Set up tracing for a process
///
/// All configuration problems surface here, before any module is loaded.
pub fn inject(config: &Config, handlers: Option<CustomHandlers>) -> Result<Injection, ConfigError> {
    config.validate()?;
    let loader = ModuleLoader::new(config)?;

    let custom = handlers.map(CustomHandlers::into_handler).transpose()?;

    // Disabled tracing must not open or truncate the output file
    if !config.enabled {
        tracing::info!("Tracing disabled, modules load unmodified");
        return Ok(Injection {
            loader,
            installed: None,
        });
    }

    let handler: Box<dyn TraceHandler> = match custom {
        Some(handler) => handler,
        None => Box::new(Tracer::new(vec![build_formatter(&config.formatter)?])),
    };

    let (id, previous) = hooks::install_owned(handler);
    if previous.is_some() {
        tracing::warn!("Replaced a previously installed trace handler");
    }
    tracing::info!("Tracing hooks installed");
    Ok(Injection {
        loader,
        installed: Some(id),
    })
}
