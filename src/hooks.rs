//! Process-wide hook namespace
//!
//! Instrumented modules call the hooks by fixed literal names without
//! importing anything, so the runtime side is a single documented singleton:
//! one installed [`TraceHandler`] behind a mutex, set up by [`install`] and
//! removed by [`teardown`]. Host bindings forward [`ENTRY_HOOK`],
//! [`EXIT_HOOK`] and [`CATCH_HOOK`] calls to [`entry`], [`exit`] and
//! [`catch_clause`].
//!
//! A hook call made while the handler is already running (an output callback
//! that calls traced code) is not traced: entry returns a detached token and
//! exit/catch ignore detached tokens.

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::ConfigError;
use crate::tracer::{EntryArgs, EntryToken, ExitArgs, FrameId, Tracer};

/// Global called by instrumented code on function entry
pub const ENTRY_HOOK: &str = "__calltraceEntry__";
/// Global called by instrumented code on function exit
pub const EXIT_HOOK: &str = "__calltraceExit__";
/// Global called by instrumented code as the first statement of a catch clause
pub const CATCH_HOOK: &str = "__calltraceCatch__";

/// Runtime receiver of hook calls
pub trait TraceHandler: Send {
    fn on_entry(&mut self, args: &EntryArgs) -> EntryToken;
    fn on_exit(&mut self, args: &ExitArgs<'_>);
    fn on_catch_clause(&mut self, _entry: &EntryToken) {}
    fn finish(&mut self) {}
    /// Access to the built-in tracer, when this handler is one
    fn as_tracer_mut(&mut self) -> Option<&mut Tracer> {
        None
    }
}

impl TraceHandler for Tracer {
    fn on_entry(&mut self, args: &EntryArgs) -> EntryToken {
        Tracer::on_entry(self, args)
    }

    fn on_exit(&mut self, args: &ExitArgs<'_>) {
        Tracer::on_exit(self, args)
    }

    fn on_catch_clause(&mut self, entry: &EntryToken) {
        Tracer::on_catch_clause(self, entry)
    }

    fn finish(&mut self) {
        Tracer::finish(self)
    }

    fn as_tracer_mut(&mut self) -> Option<&mut Tracer> {
        Some(self)
    }
}

type EntryFn = Box<dyn FnMut(&EntryArgs) + Send>;
type ExitFn = Box<dyn FnMut(&ExitArgs<'_>) + Send>;

/// User-supplied entry/exit handlers that replace the built-in tracer
#[derive(Default)]
pub struct CustomHandlers {
    on_entry: Option<EntryFn>,
    on_exit: Option<ExitFn>,
}

impl std::fmt::Debug for CustomHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomHandlers")
            .field("on_entry", &self.on_entry.is_some())
            .field("on_exit", &self.on_exit.is_some())
            .finish()
    }
}

impl CustomHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_entry(mut self, handler: impl FnMut(&EntryArgs) + Send + 'static) -> Self {
        self.on_entry = Some(Box::new(handler));
        self
    }

    pub fn on_exit(mut self, handler: impl FnMut(&ExitArgs<'_>) + Send + 'static) -> Self {
        self.on_exit = Some(Box::new(handler));
        self
    }

    /// Both handlers are required
    pub fn into_handler(self) -> Result<Box<dyn TraceHandler>, ConfigError> {
        match (self.on_entry, self.on_exit) {
            (Some(on_entry), Some(on_exit)) => Ok(Box::new(CustomTraceHandler {
                on_entry,
                on_exit,
                calls: 0,
            })),
            _ => Err(ConfigError::HandlerPairing),
        }
    }
}

struct CustomTraceHandler {
    on_entry: EntryFn,
    on_exit: ExitFn,
    calls: u64,
}

impl TraceHandler for CustomTraceHandler {
    fn on_entry(&mut self, args: &EntryArgs) -> EntryToken {
        (self.on_entry)(args);
        self.calls += 1;
        // Custom handlers keep no stack; the token only needs to be non-detached
        let mut token = EntryToken::detached(args);
        token.stack_id = FrameId::from_raw(self.calls);
        token
    }

    fn on_exit(&mut self, args: &ExitArgs<'_>) {
        (self.on_exit)(args)
    }
}

/// Identifies one [`install_owned`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallId(u64);

struct Slot {
    handler: Option<Box<dyn TraceHandler>>,
    generation: u64,
}

static HANDLER: Lazy<Mutex<Slot>> = Lazy::new(|| {
    Mutex::new(Slot {
        handler: None,
        generation: 0,
    })
});

/// Install `handler` as the process-wide receiver, returning the previous one
pub fn install(handler: Box<dyn TraceHandler>) -> Option<Box<dyn TraceHandler>> {
    install_owned(handler).1
}

/// Like [`install`], also returning an id that [`teardown_owned`] accepts
pub fn install_owned(
    handler: Box<dyn TraceHandler>,
) -> (InstallId, Option<Box<dyn TraceHandler>>) {
    let mut slot = HANDLER.lock();
    slot.generation += 1;
    let previous = slot.handler.replace(handler);
    (InstallId(slot.generation), previous)
}

/// Remove the installed handler; hooks become no-ops
pub fn teardown() -> Option<Box<dyn TraceHandler>> {
    HANDLER.lock().handler.take()
}

/// Remove the handler only if it is still the one installed under `id`
pub fn teardown_owned(id: InstallId) -> Option<Box<dyn TraceHandler>> {
    let mut slot = HANDLER.lock();
    if slot.generation != id.0 {
        return None;
    }
    slot.handler.take()
}

pub fn is_installed() -> bool {
    HANDLER.lock().handler.is_some()
}

/// Run `f` against the installed built-in tracer, if any
pub fn with_tracer<R>(f: impl FnOnce(&mut Tracer) -> R) -> Option<R> {
    let mut slot = HANDLER.lock();
    slot.handler.as_mut().and_then(|h| h.as_tracer_mut()).map(f)
}

/// Entry hook
pub fn entry(args: &EntryArgs) -> EntryToken {
    let Some(mut guard) = HANDLER.try_lock() else {
        tracing::debug!("reentrant entry hook for {}, not traced", args.name);
        return EntryToken::detached(args);
    };
    match guard.handler.as_mut() {
        Some(handler) => handler.on_entry(args),
        None => EntryToken::detached(args),
    }
}

/// Exit hook
pub fn exit(args: &ExitArgs<'_>) {
    if args.entry_data.stack_id.is_detached() {
        return;
    }
    let Some(mut guard) = HANDLER.try_lock() else {
        tracing::debug!("reentrant exit hook for {}, not traced", args.entry_data.name);
        return;
    };
    if let Some(handler) = guard.handler.as_mut() {
        handler.on_exit(args);
    }
}

/// Catch-clause resynchronization hook
pub fn catch_clause(entry: &EntryToken) {
    if entry.stack_id.is_detached() {
        return;
    }
    let Some(mut guard) = HANDLER.try_lock() else {
        return;
    };
    if let Some(handler) = guard.handler.as_mut() {
        handler.on_catch_clause(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handlers_must_be_paired() {
        let only_entry = CustomHandlers::new().on_entry(|_| {});
        assert!(matches!(only_entry.into_handler(), Err(ConfigError::HandlerPairing)));

        let only_exit = CustomHandlers::new().on_exit(|_| {});
        assert!(matches!(only_exit.into_handler(), Err(ConfigError::HandlerPairing)));

        let both = CustomHandlers::new().on_entry(|_| {}).on_exit(|_| {});
        assert!(both.into_handler().is_ok());
    }

    #[test]
    fn test_custom_handler_tokens_are_not_detached() {
        let mut handler = CustomHandlers::new()
            .on_entry(|_| {})
            .on_exit(|_| {})
            .into_handler()
            .unwrap();
        let args = EntryArgs {
            name: "f".to_string(),
            file: "a.js".to_string(),
            line: 1,
            args: None,
        };
        let first = handler.on_entry(&args);
        let second = handler.on_entry(&args);
        assert!(!first.stack_id.is_detached());
        assert_ne!(first.stack_id, second.stack_id);
        assert!(handler.as_tracer_mut().is_none());
    }
}
