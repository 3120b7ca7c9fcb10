//! Tracing overhead benchmarks
//!
//! Measures the two costs an instrumented program pays:
//!
//! 1. The one-off rewrite of a module when it loads
//! 2. The per-call entry/exit pair through the tracer
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench tracer_overhead
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use calltrace::formatter::{FormatterConfig, TextFormatter};
use calltrace::injector::{instrument, InjectOptions};
use calltrace::output::Output;
use calltrace::tracer::{EntryArgs, ExitArgs, Tracer};
use serde_json::json;

/// A module with `count` small functions of mixed shapes
fn generate_module(count: usize) -> String {
    let mut source = String::new();
    for i in 0..count {
        source.push_str(&format!(
            "function f{i}(a, b) {{\n  if (a) {{ return a + b; }}\n  return b;\n}}\nvar g{i} = x => x * {i};\n"
        ));
    }
    source
}

fn bench_instrument(c: &mut Criterion) {
    let mut group = c.benchmark_group("instrument");
    for count in [10, 100, 1000] {
        let source = generate_module(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &source, |b, source| {
            b.iter(|| {
                instrument("bench.js", black_box(source), &InjectOptions::default())
                    .map(|result| result.code.len())
                    .unwrap_or(0)
            })
        });
    }
    group.finish();
}

fn entry_args() -> EntryArgs {
    EntryArgs {
        name: "add".to_string(),
        file: "bench.js".to_string(),
        line: 1,
        args: Some(vec![json!(2), json!(3)]),
    }
}

fn call_pair(tracer: &mut Tracer, args: &EntryArgs) {
    let token = tracer.on_entry(args);
    tracer.on_exit(&ExitArgs {
        entry_data: &token,
        exception: false,
        line: 2,
        return_value: Some(json!(5)),
    });
}

fn bench_call_pair(c: &mut Criterion) {
    let args = entry_args();

    let mut disabled = Tracer::default();
    disabled.set_enabled(false);
    c.bench_function("call_pair_disabled", |b| {
        b.iter(|| call_pair(black_box(&mut disabled), &args))
    });

    let mut no_formatters = Tracer::default();
    c.bench_function("call_pair_no_formatters", |b| {
        b.iter(|| call_pair(black_box(&mut no_formatters), &args))
    });

    let mut text = Tracer::new(vec![Box::new(TextFormatter::new(
        FormatterConfig::default(),
        Output::disabled(),
    ))]);
    c.bench_function("call_pair_text_formatter", |b| {
        b.iter(|| call_pair(black_box(&mut text), &args))
    });
}

fn bench_nested_calls(c: &mut Criterion) {
    let args = entry_args();
    let mut group = c.benchmark_group("nested_calls");
    for depth in [8, 64, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let mut tracer = Tracer::default();
            b.iter(|| {
                let tokens: Vec<_> = (0..depth).map(|_| tracer.on_entry(&args)).collect();
                for token in tokens.iter().rev() {
                    tracer.on_exit(&ExitArgs {
                        entry_data: token,
                        exception: false,
                        line: 1,
                        return_value: None,
                    });
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_instrument, bench_call_pair, bench_nested_calls);
criterion_main!(benches);
