//! JSON output format for call traces
//!
//! Events are collected in memory and written as one document when tracing
//! finishes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::formatter::Formatter;
use crate::output::Output;
use crate::tracer::{EntryEvent, ExitEvent};

/// A single hook event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum JsonEvent {
    Entry {
        name: String,
        file: String,
        line: usize,
        /// Stack depth including this call
        depth: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<Vec<Value>>,
    },
    Exit {
        name: String,
        file: String,
        line: usize,
        ret_line: usize,
        /// Stack depth after this call returned
        depth: usize,
        duration_us: u64,
        exception: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        return_value: Option<Value>,
    },
}

/// Summary statistics for the trace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonSummary {
    pub total_calls: u64,
    pub total_exceptions: u64,
    pub max_depth: usize,
}

/// Root JSON output structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonOutput {
    /// Format version identifier
    pub version: String,
    /// Format name
    pub format: String,
    pub events: Vec<JsonEvent>,
    pub summary: JsonSummary,
}

impl JsonOutput {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            format: "calltrace-json-v1".to_string(),
            events: Vec::new(),
            summary: JsonSummary::default(),
        }
    }

    pub fn add_event(&mut self, event: JsonEvent) {
        match &event {
            JsonEvent::Entry { depth, .. } => {
                self.summary.total_calls += 1;
                self.summary.max_depth = self.summary.max_depth.max(*depth);
            }
            JsonEvent::Exit { exception: true, .. } => self.summary.total_exceptions += 1,
            JsonEvent::Exit { .. } => {}
        }
        self.events.push(event);
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for JsonOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// Formatter that renders the whole trace as one [`JsonOutput`] document
#[derive(Debug)]
pub struct JsonFormatter {
    document: JsonOutput,
    output: Output,
}

impl JsonFormatter {
    pub fn new(output: Output) -> Self {
        Self {
            document: JsonOutput::new(),
            output,
        }
    }

    pub fn document(&self) -> &JsonOutput {
        &self.document
    }
}

impl Formatter for JsonFormatter {
    fn on_entry(&mut self, event: &EntryEvent<'_>) {
        self.document.add_event(JsonEvent::Entry {
            name: event.name.to_string(),
            file: event.file.to_string(),
            line: event.line,
            depth: event.stack.depth(),
            args: event.args.map(<[Value]>::to_vec),
        });
    }

    fn on_exit(&mut self, event: &ExitEvent<'_>) {
        self.document.add_event(JsonEvent::Exit {
            name: event.name.to_string(),
            file: event.file.to_string(),
            line: event.line,
            ret_line: event.ret_line,
            depth: event.stack.depth(),
            duration_us: u64::try_from(event.span.as_micros()).unwrap_or(u64::MAX),
            exception: event.exception,
            return_value: event.return_value.cloned(),
        });
    }

    fn finish(&mut self) {
        match self.document.to_json() {
            Ok(json) => self.output.write_line(&json),
            Err(e) => tracing::warn!("Failed to serialize JSON trace: {}", e),
        }
        self.output.flush();
    }
}
