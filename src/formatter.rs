//! Trace formatters
//!
//! A formatter receives every tracer event, in order, synchronously. Events
//! borrow tracer state, so a formatter must copy anything it wants to keep.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::output::{Output, OutputTarget};
use crate::tracer::{EntryEvent, ExitEvent};

const TRACE_ENTRY_PREFIX: &str = "-->";
const TRACE_EXIT_PREFIX: &str = "<--";
const TRUNCATION_MARK: &str = "---";

/// Consumer of tracer events
pub trait Formatter: Send {
    fn on_entry(&mut self, event: &EntryEvent<'_>);
    fn on_exit(&mut self, event: &ExitEvent<'_>);
    /// Called once when tracing is torn down
    fn finish(&mut self) {}
}

/// Which formatter renders the trace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FormatterKind {
    /// Indented entry/exit lines (default)
    #[default]
    Text,
    /// One JSON document with all events and a summary
    Json,
    /// Per-function call counts and timing
    Profile,
}

/// Formatter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatterConfig {
    pub kind: FormatterKind,
    pub output: OutputTarget,
    /// Indentation unit per stack level
    pub indentation: String,
    /// Number of arguments rendered on entry
    pub inspect_args_count: usize,
    /// Maximum characters per rendered value, 0 for unlimited
    pub inspect_args_max_len: usize,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            kind: FormatterKind::Text,
            output: OutputTarget::Stdout,
            indentation: "  ".to_string(),
            inspect_args_count: 5,
            inspect_args_max_len: 500,
        }
    }
}

/// Render a value on a single line; absent and `null` values render empty
pub fn inspect(value: Option<&Value>, max_len: usize) -> String {
    let rendered = match value {
        None | Some(Value::Null) => return String::new(),
        Some(value) => value.to_string(),
    };
    truncate(rendered, max_len)
}

fn truncate(text: String, max_len: usize) -> String {
    if max_len == 0 || text.chars().count() <= max_len {
        return text;
    }
    let mut cut: String = text.chars().take(max_len).collect();
    cut.push_str(TRUNCATION_MARK);
    cut
}

/// Human-readable, stack-indented trace lines
#[derive(Debug)]
pub struct TextFormatter {
    config: FormatterConfig,
    output: Output,
    indentation: String,
}

impl TextFormatter {
    pub fn new(config: FormatterConfig, output: Output) -> Self {
        Self {
            config,
            output,
            indentation: String::new(),
        }
    }

    fn adjust_indentation(&mut self, levels: usize) {
        let wanted = levels * self.config.indentation.len();
        if self.indentation.len() > wanted {
            self.indentation.truncate(wanted);
        }
        while self.indentation.len() < wanted {
            self.indentation.push_str(&self.config.indentation);
        }
    }

    /// `{0}: 2 {1}: 3 ` for the first `inspect_args_count` arguments
    fn render_args(&self, args: Option<&[Value]>) -> String {
        let mut rendered = String::new();
        for (i, arg) in args
            .unwrap_or_default()
            .iter()
            .take(self.config.inspect_args_count)
            .enumerate()
        {
            rendered.push_str(&format!(
                "{{{}}}: {} ",
                i,
                inspect(Some(arg), self.config.inspect_args_max_len)
            ));
        }
        rendered
    }
}

impl Formatter for TextFormatter {
    fn on_entry(&mut self, event: &EntryEvent<'_>) {
        self.adjust_indentation(event.stack.depth().saturating_sub(1));
        let line = format!(
            "{}{} {}@{}::{}, args: {}",
            self.indentation,
            TRACE_ENTRY_PREFIX,
            event.name,
            event.file,
            event.line,
            self.render_args(event.args)
        );
        self.output.write_line(&line);
    }

    fn on_exit(&mut self, event: &ExitEvent<'_>) {
        self.adjust_indentation(event.stack.depth());
        let exception = if event.exception { "EX, " } else { "" };
        let line = format!(
            "{}{} {}@{}::{}, {}ts: {}, retLine: {}, retVal: {}",
            self.indentation,
            TRACE_EXIT_PREFIX,
            event.name,
            event.file,
            event.line,
            exception,
            event.span.as_millis(),
            event.ret_line,
            inspect(event.return_value, self.config.inspect_args_max_len)
        );
        self.output.write_line(&line);
    }

    fn finish(&mut self) {
        self.output.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::{EntryArgs, ExitArgs, Tracer};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn capture(config: FormatterConfig) -> (Tracer, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let output = Output::callback(move |line| sink.lock().push(line.to_string()));
        let tracer = Tracer::new(vec![Box::new(TextFormatter::new(config, output))]);
        (tracer, lines)
    }

    fn entry(name: &str, line: usize, args: Option<Vec<Value>>) -> EntryArgs {
        EntryArgs {
            name: name.to_string(),
            file: "a.js".to_string(),
            line,
            args,
        }
    }

    #[test]
    fn test_inspect_renders_single_line_json() {
        assert_eq!(inspect(Some(&json!({"a": [1, 2]})), 0), r#"{"a":[1,2]}"#);
        assert_eq!(inspect(Some(&json!("x")), 0), "\"x\"");
        assert_eq!(inspect(Some(&Value::Null), 0), "");
        assert_eq!(inspect(None, 0), "");
    }

    #[test]
    fn test_inspect_truncates() {
        assert_eq!(inspect(Some(&json!("abcdefgh")), 4), "\"abc---");
        assert_eq!(inspect(Some(&json!(12)), 4), "12");
    }

    #[test]
    fn test_entry_and_exit_lines() {
        let (mut tracer, lines) = capture(FormatterConfig::default());
        let token = tracer.on_entry(&entry("add", 1, Some(vec![json!(2), json!(3)])));
        tracer.on_exit(&ExitArgs {
            entry_data: &token,
            exception: false,
            line: 1,
            return_value: Some(json!(5)),
        });

        let lines = lines.lock();
        assert_eq!(lines[0], "--> add@a.js::1, args: {0}: 2 {1}: 3 ");
        assert!(lines[1].starts_with("<-- add@a.js::1, ts: "));
        assert!(lines[1].ends_with(", retLine: 1, retVal: 5"));
    }

    #[test]
    fn test_nested_calls_are_indented() {
        let (mut tracer, lines) = capture(FormatterConfig::default());
        let outer = tracer.on_entry(&entry("outer", 1, None));
        let inner = tracer.on_entry(&entry("inner", 5, None));
        for token in [&inner, &outer] {
            tracer.on_exit(&ExitArgs {
                entry_data: token,
                exception: false,
                line: token.line,
                return_value: None,
            });
        }

        let lines = lines.lock();
        assert!(lines[0].starts_with("--> outer"));
        assert!(lines[1].starts_with("  --> inner"));
        assert!(lines[2].starts_with("  <-- inner"));
        assert!(lines[3].starts_with("<-- outer"));
    }

    #[test]
    fn test_exception_exit_is_marked() {
        let (mut tracer, lines) = capture(FormatterConfig::default());
        let token = tracer.on_entry(&entry("boom", 7, None));
        tracer.on_exit(&ExitArgs {
            entry_data: &token,
            exception: true,
            line: 7,
            return_value: None,
        });
        assert!(lines.lock()[1].starts_with("<-- boom@a.js::7, EX, ts: "));
    }

    #[test]
    fn test_argument_count_limit() {
        let config = FormatterConfig {
            inspect_args_count: 1,
            indentation: "\t".to_string(),
            ..FormatterConfig::default()
        };
        let (mut tracer, lines) = capture(config);
        tracer.on_entry(&entry("f", 1, Some(vec![json!(1), json!(2)])));
        assert_eq!(lines.lock()[0], "--> f@a.js::1, args: {0}: 1 ");
    }
}
