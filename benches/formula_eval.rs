//! Criterion benchmarks for the formula evaluator.
//!
//! Benchmarks:
//!   - parse only, for a short and a long formula
//!   - evaluate a pre-parsed formula
//!   - parse + evaluate in one step
//!   - aggregate one tree with several services
//!
//! Run with: cargo bench --bench formula_eval

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::BTreeMap;

use habitas_services::services::tree_context;
use habitas_services::{
    aggregate_tree, evaluate, Biometrics, EcosystemServiceConfig, Formula, Origin, ServiceCategory,
    Tree, TreeSnapshot,
};

const SHORT: &str = "dap * 2 + coef_a";
const LONG: &str = "biomassa * 0.47 * 3.67 * valor_carbono + ln(dap) * sqrt(altura) \
                    - max(dap, altura, 1) / 3 + pow(dap, 0.5) * exp(-altura / 100)";

fn coefficients() -> BTreeMap<String, f64> {
    [("coef_a", 5.0), ("valor_carbono", 2.5)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

// ---------------------------------------------------------------------------
// Benchmark: parsing
// ---------------------------------------------------------------------------

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("formula_parse");

    group.bench_function("short", |b| {
        b.iter(|| black_box(Formula::parse(black_box(SHORT))))
    });

    group.bench_function("long", |b| {
        b.iter(|| black_box(Formula::parse(black_box(LONG))))
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: evaluation
// ---------------------------------------------------------------------------

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("formula_evaluate");
    let ctx = tree_context(
        Biometrics { dap: 30.0, altura: 10.0 },
        &coefficients(),
        &[],
        &Default::default(),
    );
    let parsed = Formula::parse(LONG).unwrap();

    group.bench_function("pre_parsed_long", |b| {
        b.iter(|| black_box(parsed.evaluate(black_box(&ctx))))
    });

    group.bench_function("parse_and_evaluate_short", |b| {
        b.iter(|| black_box(evaluate(black_box(SHORT), &ctx)))
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: one tree, several services
// ---------------------------------------------------------------------------

fn bench_aggregate_tree(c: &mut Criterion) {
    let services: Vec<EcosystemServiceConfig> = (0..8)
        .map(|i| EcosystemServiceConfig {
            id: i,
            name: format!("Service {}", i),
            code: format!("svc_{}", i),
            description: String::new(),
            category: ServiceCategory::Carbon,
            formula: if i % 2 == 0 { LONG.to_string() } else { SHORT.to_string() },
            coefficients: coefficients(),
            unit_monetary_value: 1.5,
            unit: "kg".into(),
            reference: String::new(),
            active: true,
            display_order: i as i32,
            created_by: None,
        })
        .collect();

    let snapshot = TreeSnapshot {
        tree: Tree {
            id: 1,
            plate_number: "001".into(),
            common_name: "Ipê-amarelo".into(),
            scientific_name: "Handroanthus albus".into(),
            dap: 30.0,
            height: 10.0,
            latitude: -22.9,
            longitude: -43.2,
            reports: vec![],
            images: vec![],
            origin: Origin::Native,
            planted_by: String::new(),
        },
        species_id: None,
        species_name: None,
        services,
        variables: vec![],
        species_defaults: Default::default(),
    };

    c.bench_function("aggregate_tree_8_services", |b| {
        b.iter(|| black_box(aggregate_tree(black_box(&snapshot))))
    });
}

criterion_group!(benches, bench_parse, bench_evaluate, bench_aggregate_tree);
criterion_main!(benches);
