//! Replay of recorded hook calls
//!
//! Drives the installed hooks from a JSON-lines log, one hook call per line.
//! `frame` is the caller-side handle that ties an exit or catch back to the
//! entry that produced its token:
//!
//! ```text
//! {"hook":"entry","frame":1,"name":"add","file":"a.js","line":1,"args":[2,3]}
//! {"hook":"exit","frame":1,"line":1,"exception":false,"returnValue":5}
//! {"hook":"catch","frame":1}
//! ```

use std::collections::HashMap;
use std::io::BufRead;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hooks;
use crate::tracer::{EntryArgs, EntryToken, ExitArgs};

/// One recorded hook call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "hook", rename_all = "lowercase")]
pub enum HookCall {
    Entry {
        frame: u64,
        name: String,
        file: String,
        line: usize,
        #[serde(default)]
        args: Option<Vec<Value>>,
    },
    Exit {
        frame: u64,
        line: usize,
        #[serde(default)]
        exception: bool,
        #[serde(default, rename = "returnValue")]
        return_value: Option<Value>,
    },
    Catch {
        frame: u64,
    },
}

/// Counts from one replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub entries: u64,
    pub exits: u64,
    pub catches: u64,
    /// Exit or catch lines naming a frame with no pending entry
    pub unmatched: u64,
    /// Entries never exited
    pub open_frames: usize,
}

/// Feed every line of `reader` to the installed hooks
pub fn replay<R: BufRead>(reader: R) -> Result<ReplaySummary> {
    let mut tokens: HashMap<u64, EntryToken> = HashMap::new();
    let mut summary = ReplaySummary::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read replay line {}", index + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let call: HookCall = serde_json::from_str(&line)
            .with_context(|| format!("Invalid hook call on line {}", index + 1))?;

        match call {
            HookCall::Entry {
                frame,
                name,
                file,
                line,
                args,
            } => {
                let token = hooks::entry(&EntryArgs {
                    name,
                    file,
                    line,
                    args,
                });
                summary.entries += 1;
                if tokens.insert(frame, token).is_some() {
                    tracing::warn!("frame {} re-entered before exiting", frame);
                }
            }
            HookCall::Exit {
                frame,
                line,
                exception,
                return_value,
            } => match tokens.remove(&frame) {
                Some(token) => {
                    hooks::exit(&ExitArgs {
                        entry_data: &token,
                        exception,
                        line,
                        return_value,
                    });
                    summary.exits += 1;
                }
                None => {
                    tracing::warn!("exit for unknown frame {}", frame);
                    summary.unmatched += 1;
                }
            },
            HookCall::Catch { frame } => match tokens.get(&frame) {
                Some(token) => {
                    hooks::catch_clause(token);
                    summary.catches += 1;
                }
                None => {
                    tracing::warn!("catch for unknown frame {}", frame);
                    summary.unmatched += 1;
                }
            },
        }
    }

    summary.open_frames = tokens.len();
    Ok(summary)
}
