//! Benchmarks for naming and manifest ordering.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use deploykit::manifests::{Manifest, ManifestSet};
use deploykit::utils::{slugify, ResourceNames};
use serde_json::json;

fn manifest_set(count: usize) -> ManifestSet {
    let kinds = ["Service", "Deployment", "ConfigMap", "Namespace", "Ingress"];
    let manifests = (0..count)
        .filter_map(|i| {
            let kind = kinds[i % kinds.len()];
            Manifest::from_value(json!({
                "apiVersion": "v1",
                "kind": kind,
                "metadata": { "name": format!("object-{i}"), "namespace": "acme" },
            }))
            .ok()
        })
        .collect();
    ManifestSet::new(manifests)
}

fn naming_benchmark(c: &mut Criterion) {
    c.bench_function("slugify", |b| {
        b.iter(|| slugify(black_box("Acme Widgets_Production  Service!")));
    });

    c.bench_function("resource_names", |b| {
        b.iter(|| ResourceNames::derive(black_box("acme-web"), black_box("101010")));
    });
}

fn manifest_benchmark(c: &mut Criterion) {
    let set = manifest_set(50);

    c.bench_function("order_50_manifests", |b| {
        b.iter(|| black_box(&set).ordered().len());
    });

    c.bench_function("digest_50_manifests", |b| {
        b.iter(|| {
            black_box(&set)
                .manifests()
                .iter()
                .filter_map(|m| m.digest().ok())
                .count()
        });
    });
}

criterion_group!(benches, naming_benchmark, manifest_benchmark);
criterion_main!(benches);
