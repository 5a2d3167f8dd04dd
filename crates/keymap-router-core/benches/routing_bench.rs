//! Criterion benchmarks for the routing decision and report framing.
//!
//! Every focus sample runs `should_switch`, so it must stay a hash lookup
//! regardless of how many rules are configured.
//!
//! Run with:
//! ```bash
//! cargo bench --package keymap-router-core --bench routing_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use keymap_router_core::domain::rules::{normalize, RawConfig, RawRule};
use keymap_router_core::protocol::{encode_switch_keymap, DEFAULT_REPORT_ID};
use keymap_router_core::RoutingTable;

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn raw_config_with_n_rules(n: usize) -> RawConfig {
    RawConfig {
        rules: (0..n)
            .map(|i| RawRule {
                process_name: format!("app-{i}.exe"),
                keymap: format!("K{i}"),
                layer: if i % 2 == 0 { "base" } else { "fn" }.to_string(),
            })
            .collect(),
        ..RawConfig::default()
    }
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_should_switch(c: &mut Criterion) {
    let mut group = c.benchmark_group("should_switch");

    for n in [1usize, 16, 256] {
        let config = normalize(&raw_config_with_n_rules(n)).expect("fixture must be valid");
        let table = RoutingTable::new(&config);
        let (_, applied) = table.should_switch("app-0.exe");
        table.mark_applied(&applied);

        group.bench_with_input(BenchmarkId::new("hit", n), &table, |b, table| {
            b.iter(|| table.should_switch(black_box(r"C:\Program Files\App\APP-0.EXE")))
        });
        group.bench_with_input(BenchmarkId::new("miss", n), &table, |b, table| {
            b.iter(|| table.should_switch(black_box("unknown")))
        });
    }

    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let raw = raw_config_with_n_rules(64);
    c.bench_function("normalize_64_rules", |b| b.iter(|| normalize(black_box(&raw))));
}

fn bench_encode_switch_keymap(c: &mut Criterion) {
    c.bench_function("encode_switch_keymap", |b| {
        b.iter(|| encode_switch_keymap(DEFAULT_REPORT_ID, black_box("QWR"), black_box(65)))
    });
}

criterion_group!(
    benches,
    bench_should_switch,
    bench_normalize,
    bench_encode_switch_keymap
);
criterion_main!(benches);
