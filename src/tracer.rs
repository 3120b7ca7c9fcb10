//! Call-stack tracer
//!
//! Receives the entry/exit/catch events emitted by instrumented code, keeps a
//! logical call stack of live frame ids, measures per-call timing and forwards
//! structured events to the registered formatters.
//!
//! The stack models synchronous nesting only. When an activation suspends on
//! an asynchronous boundary and resumes later, its exit pops against whatever
//! is live at resume time, so interleaved async activations appear nested.

use std::time::{Duration, Instant};

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::formatter::Formatter;

/// Opaque identity of one live activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(u64);

impl FrameId {
    /// Id carried by tokens that were never pushed (untraced calls)
    pub const DETACHED: FrameId = FrameId(0);

    pub fn is_detached(self) -> bool {
        self == Self::DETACHED
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        FrameId(raw)
    }
}

/// Arguments of the entry hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryArgs {
    pub name: String,
    pub file: String,
    pub line: usize,
    /// Reified call arguments, when argument capture is enabled
    #[serde(default)]
    pub args: Option<Vec<Value>>,
}

/// Returned by the entry hook and threaded back into the matching exit
#[derive(Debug, Clone, PartialEq)]
pub struct EntryToken {
    pub name: String,
    pub file: String,
    pub line: usize,
    pub timestamp: Instant,
    pub stack_id: FrameId,
}

impl EntryToken {
    /// A token for an activation that is not on any stack
    pub fn detached(args: &EntryArgs) -> Self {
        Self {
            name: args.name.clone(),
            file: args.file.clone(),
            line: args.line,
            timestamp: Instant::now(),
            stack_id: FrameId::DETACHED,
        }
    }
}

/// Arguments of the exit hook
#[derive(Debug, Clone)]
pub struct ExitArgs<'a> {
    pub entry_data: &'a EntryToken,
    pub exception: bool,
    /// Line of the exit point (return statement or closing brace)
    pub line: usize,
    pub return_value: Option<Value>,
}

/// Event forwarded to formatters on function entry
#[derive(Debug)]
pub struct EntryEvent<'a> {
    pub name: &'a str,
    pub file: &'a str,
    pub line: usize,
    pub args: Option<&'a [Value]>,
    /// Stack including the entered frame
    pub stack: &'a CallStack,
}

/// Event forwarded to formatters on function exit
#[derive(Debug)]
pub struct ExitEvent<'a> {
    pub name: &'a str,
    pub file: &'a str,
    pub line: usize,
    pub ret_line: usize,
    pub span: Duration,
    /// Stack after the exited frame was removed
    pub stack: &'a CallStack,
    pub exception: bool,
    pub return_value: Option<&'a Value>,
}

/// Result of popping towards a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unwind {
    /// The frame was found; `skipped` frames above it were discarded
    Found { skipped: usize },
    /// The frame was not live; `discarded` frames were popped to empty
    Missing { discarded: usize },
}

/// Ordered live frame ids plus an id -> descriptor side table
#[derive(Debug)]
pub struct CallStack {
    frames: Vec<FrameId>,
    index: FnvHashMap<FrameId, String>,
    next_id: u64,
}

impl Default for CallStack {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            index: FnvHashMap::default(),
            next_id: 1,
        }
    }
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn top(&self) -> Option<FrameId> {
        self.frames.last().copied()
    }

    /// Live frame ids, outermost first
    pub fn frames(&self) -> &[FrameId] {
        &self.frames
    }

    pub fn contains(&self, id: FrameId) -> bool {
        self.frames.contains(&id)
    }

    /// `"<name>@<file>::<line>"` of a frame seen since the stack was last idle
    pub fn descriptor(&self, id: FrameId) -> Option<&str> {
        self.index.get(&id).map(String::as_str)
    }

    /// Descriptors of the live frames, outermost first
    pub fn descriptors(&self) -> impl Iterator<Item = &str> {
        self.frames.iter().filter_map(|id| self.descriptor(*id))
    }

    /// Size of the side table
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    fn push(&mut self, descriptor: String) -> FrameId {
        let id = FrameId(self.next_id);
        self.next_id += 1;
        self.index.insert(id, descriptor);
        self.frames.push(id);
        id
    }

    /// Pop frames until `id` itself has been popped
    fn pop_through(&mut self, id: FrameId) -> Unwind {
        let mut popped = 0;
        let outcome = loop {
            match self.frames.pop() {
                Some(top) if top == id => break Unwind::Found { skipped: popped },
                Some(_) => popped += 1,
                None => break Unwind::Missing { discarded: popped },
            }
        };
        self.release_if_idle();
        outcome
    }

    /// Pop frames above `id`, leaving `id` on top
    fn unwind_to(&mut self, id: FrameId) -> Unwind {
        let mut popped = 0;
        while let Some(top) = self.top() {
            if top == id {
                return Unwind::Found { skipped: popped };
            }
            self.frames.pop();
            popped += 1;
        }
        self.release_if_idle();
        Unwind::Missing { discarded: popped }
    }

    fn release_if_idle(&mut self) {
        if self.frames.is_empty() {
            self.index.clear();
        }
    }
}

/// The runtime tracer behind the entry/exit/catch hooks
pub struct Tracer {
    stack: CallStack,
    formatters: Vec<Box<dyn Formatter>>,
    enabled: bool,
    desyncs: u64,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("stack", &self.stack)
            .field("formatters", &self.formatters.len())
            .field("enabled", &self.enabled)
            .field("desyncs", &self.desyncs)
            .finish()
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Tracer {
    pub fn new(formatters: Vec<Box<dyn Formatter>>) -> Self {
        Self {
            stack: CallStack::new(),
            formatters,
            enabled: true,
            desyncs: 0,
        }
    }

    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    /// Whether events are forwarded to formatters
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Toggle event forwarding; the call stack keeps being maintained
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Swap the active formatters, returning the previous set
    pub fn set_formatters(&mut self, formatters: Vec<Box<dyn Formatter>>) -> Vec<Box<dyn Formatter>> {
        std::mem::replace(&mut self.formatters, formatters)
    }

    pub fn add_formatter(&mut self, formatter: Box<dyn Formatter>) {
        self.formatters.push(formatter);
    }

    /// Number of exit/catch events that referenced a frame no longer live
    pub fn desync_count(&self) -> u64 {
        self.desyncs
    }

    pub fn on_entry(&mut self, args: &EntryArgs) -> EntryToken {
        let descriptor = format!("{}@{}::{}", args.name, args.file, args.line);
        let stack_id = self.stack.push(descriptor);
        let timestamp = Instant::now();

        if self.enabled {
            let event = EntryEvent {
                name: &args.name,
                file: &args.file,
                line: args.line,
                args: args.args.as_deref(),
                stack: &self.stack,
            };
            for formatter in &mut self.formatters {
                formatter.on_entry(&event);
            }
        }

        EntryToken {
            name: args.name.clone(),
            file: args.file.clone(),
            line: args.line,
            timestamp,
            stack_id,
        }
    }

    pub fn on_exit(&mut self, args: &ExitArgs<'_>) {
        let entry = args.entry_data;
        if entry.stack_id.is_detached() {
            return;
        }
        let span = entry.timestamp.elapsed();

        match self.stack.pop_through(entry.stack_id) {
            Unwind::Found { skipped: 0 } => {}
            Unwind::Found { skipped } => {
                tracing::debug!(
                    "{}@{}::{} exited past {} unwound frame(s)",
                    entry.name,
                    entry.file,
                    entry.line,
                    skipped
                );
            }
            Unwind::Missing { discarded } => {
                self.desyncs += 1;
                tracing::warn!(
                    "exit for {}@{}::{} references a frame that is not live, discarded {} frame(s)",
                    entry.name,
                    entry.file,
                    entry.line,
                    discarded
                );
            }
        }

        if self.enabled {
            let event = ExitEvent {
                name: &entry.name,
                file: &entry.file,
                line: entry.line,
                ret_line: args.line,
                span,
                stack: &self.stack,
                exception: args.exception,
                return_value: args.return_value.as_ref(),
            };
            for formatter in &mut self.formatters {
                formatter.on_exit(&event);
            }
        }
    }

    /// A catch clause inside the frame of `entry` is handling an exception:
    /// discard stale frames above it
    pub fn on_catch_clause(&mut self, entry: &EntryToken) {
        if entry.stack_id.is_detached() {
            return;
        }
        match self.stack.unwind_to(entry.stack_id) {
            Unwind::Found { skipped } => {
                if skipped > 0 {
                    tracing::debug!(
                        "catch in {}@{}::{} discarded {} stale frame(s)",
                        entry.name,
                        entry.file,
                        entry.line,
                        skipped
                    );
                }
            }
            Unwind::Missing { discarded } => {
                self.desyncs += 1;
                tracing::warn!(
                    "catch in {}@{}::{} references a frame that is not live, discarded {} frame(s)",
                    entry.name,
                    entry.file,
                    entry.line,
                    discarded
                );
            }
        }
    }

    /// Let formatters flush buffered output
    pub fn finish(&mut self) {
        for formatter in &mut self.formatters {
            formatter.finish();
        }
    }
}
