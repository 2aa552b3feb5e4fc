use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sidekick::config::TerminalTuning;
use sidekick::engine::{build_context, SignalAggregator};
use sidekick::score::TriggerScoringEngine;
use sidekick::signal::{Signal, SignalKind};
use sidekick::watchers::{SignalSink, TerminalWatcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const KINDS: [SignalKind; 6] = [
    SignalKind::TerminalError,
    SignalKind::UndoBurst,
    SignalKind::Idle,
    SignalKind::FileSave,
    SignalKind::ComplexitySpike,
    SignalKind::TypingFlow,
];

fn synthetic_signals(count: usize) -> Vec<Signal> {
    (0..count)
        .map(|i| {
            let kind = KINDS[i % KINDS.len()].clone();
            Signal::new(kind, format!("payload {i}"), 0.1 + (i % 9) as f64 / 10.0)
        })
        .collect()
}

struct NullSink;

impl SignalSink for NullSink {
    fn emit(&self, signal: Signal) {
        black_box(signal);
    }
}

fn bench_aggregate_and_score(c: &mut Criterion) {
    let aggregator = SignalAggregator::new(Duration::from_secs(300));
    for signal in synthetic_signals(500) {
        aggregator.add(signal);
    }

    c.bench_function("aggregator_add_score", |b| {
        b.iter(|| {
            aggregator.add(Signal::new(SignalKind::Idle, "User is pondering", 0.5));
            black_box(TriggerScoringEngine::score(&aggregator.snapshot()));
        });
    });

    let signals = synthetic_signals(500);
    c.bench_function("build_context_500", |b| {
        b.iter(|| black_box(build_context(black_box(&signals), 300)));
    });
}

fn bench_terminal_scan(c: &mut Criterion) {
    let watcher = TerminalWatcher::new(Arc::new(NullSink), TerminalTuning::default());
    watcher.start();
    let chunk = "\x1b[32mCompiling sidekick v0.3.0\x1b[0m\n\
                 warning: unused variable `x`\n\
                 error[E0425]: cannot find value `y` in this scope\n"
        .repeat(20);

    c.bench_function("terminal_report_output", |b| {
        b.iter(|| watcher.report_output(black_box(&chunk), Some("cargo build")));
    });
}

fn bench_syntax_count(c: &mut Criterion) {
    let source: String = (0..400)
        .map(|i| format!("pub fn f{i}(a: usize) -> usize {{ if a > {i} {{ a * 2 }} else {{ a + {i} }} }}\n"))
        .collect();

    c.bench_function("syntax_count_nodes_rust", |b| {
        b.iter(|| {
            let count = sidekick::syntax::count_nodes(Path::new("bench.rs"), black_box(&source))
                .expect("parse should succeed");
            black_box(count);
        });
    });
}

criterion_group!(
    perf_core,
    bench_aggregate_and_score,
    bench_terminal_scan,
    bench_syntax_count
);
criterion_main!(perf_core);
