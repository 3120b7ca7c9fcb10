//! Function-level profiling
//!
//! Aggregates calls, inclusive time and exceptional exits per traced
//! function, plus caller -> callee counts taken from the live call stack.
//! The summary table is written when tracing finishes.

use std::collections::HashMap;

use crate::formatter::Formatter;
use crate::output::Output;
use crate::tracer::{EntryEvent, ExitEvent};

/// Statistics for a single function
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionStats {
    /// Number of completed calls
    pub calls: u64,
    /// Total inclusive time (microseconds)
    pub total_time_us: u64,
    /// Calls that exited by throwing
    pub exceptions: u64,
    /// Functions entered directly from this one
    pub callees: HashMap<String, u64>,
}

impl FunctionStats {
    pub fn avg_time_us(&self) -> u64 {
        if self.calls > 0 {
            self.total_time_us / self.calls
        } else {
            0
        }
    }
}

/// Tracks function-level profiling statistics
#[derive(Debug)]
pub struct FunctionProfiler {
    /// Keyed by `name@file::line`
    stats: HashMap<String, FunctionStats>,
    output: Output,
}

impl Default for FunctionProfiler {
    fn default() -> Self {
        Self::new(Output::disabled())
    }
}

impl FunctionProfiler {
    pub fn new(output: Output) -> Self {
        Self {
            stats: HashMap::new(),
            output,
        }
    }

    /// Record one completed call
    pub fn record(&mut self, function: &str, duration_us: u64, exception: bool) {
        let entry = self.stats.entry(function.to_string()).or_default();
        entry.calls += 1;
        entry.total_time_us += duration_us;
        if exception {
            entry.exceptions += 1;
        }
    }

    pub fn record_call_edge(&mut self, caller: &str, callee: &str) {
        *self
            .stats
            .entry(caller.to_string())
            .or_default()
            .callees
            .entry(callee.to_string())
            .or_insert(0) += 1;
    }

    pub fn stats(&self, function: &str) -> Option<&FunctionStats> {
        self.stats.get(function)
    }

    /// Summary table lines, sorted by total time (descending)
    pub fn summary_lines(&self) -> Vec<String> {
        if self.stats.is_empty() {
            return vec!["No function profiling data collected.".to_string()];
        }

        let mut sorted: Vec<_> = self.stats.iter().collect();
        sorted.sort_by(|a, b| {
            b.1.total_time_us
                .cmp(&a.1.total_time_us)
                .then_with(|| a.0.cmp(b.0))
        });

        let mut lines = vec![
            "Function Timing Summary (sorted by total time)".to_string(),
            format!(
                "{:<50} {:>10} {:>12} {:>12} {:>6}",
                "Function", "Calls", "Total Time", "Avg Time", "EX"
            ),
            "─".repeat(94),
        ];
        for (function, stats) in sorted {
            let total_seconds = stats.total_time_us as f64 / 1_000_000.0;
            let avg_seconds = stats.avg_time_us() as f64 / 1_000_000.0;
            lines.push(format!(
                "{:<50} {:>10} {:>11.6}s {:>11.6}s {:>6}",
                function, stats.calls, total_seconds, avg_seconds, stats.exceptions
            ));
        }
        lines.push("─".repeat(94));
        lines
    }
}

impl Formatter for FunctionProfiler {
    fn on_entry(&mut self, event: &EntryEvent<'_>) {
        let frames = event.stack.frames();
        if let [.., caller, callee] = frames {
            let caller = event.stack.descriptor(*caller).map(str::to_string);
            let callee = event.stack.descriptor(*callee).map(str::to_string);
            if let (Some(caller), Some(callee)) = (caller, callee) {
                self.record_call_edge(&caller, &callee);
            }
        }
    }

    fn on_exit(&mut self, event: &ExitEvent<'_>) {
        let function = format!("{}@{}::{}", event.name, event.file, event.line);
        let duration_us = u64::try_from(event.span.as_micros()).unwrap_or(u64::MAX);
        self.record(&function, duration_us, event.exception);
    }

    fn finish(&mut self) {
        for line in self.summary_lines() {
            self.output.write_line(&line);
        }
        self.output.flush();
    }
}
