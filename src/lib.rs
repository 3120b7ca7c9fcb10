//! calltrace - call tracing for JavaScript through source instrumentation
//!
//! This library rewrites JavaScript modules so that every function entry,
//! exit and exceptional exit calls into a process-wide hook namespace, and
//! provides the runtime call-stack tracer and formatters behind those hooks.

pub mod ast;
pub mod classify;
pub mod cli;
pub mod config;
pub mod edits;
pub mod error;
pub mod filter;
pub mod formatter;
pub mod function_profiler;
pub mod hooks;
pub mod injector;
pub mod json_output;
pub mod loader;
pub mod output;
pub mod replay;
pub mod tracer;
