//! Benchmarks for eclass collection merging and `INHERITED` resolution.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kit_merge::eclass::HashCollection;
use kit_merge::metadata::resolve_inherited;

fn collection(prefix: &str, n: usize) -> HashCollection {
    HashCollection::from_hashes(
        vec![],
        (0..n).map(|i| (format!("{}{}", prefix, i), format!("{:032x}", i))),
    )
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("eclass_merge");
    for size in [100, 500, 2_000] {
        let core = collection("eclass", size);
        let local = collection("eclass", size / 10);
        group.bench_with_input(BenchmarkId::new("master_chain", size), &size, |b, _| {
            b.iter(|| {
                // own + master + own, as a dependent kit builds its view
                let merged = local.merge(&core).merge(&local);
                black_box(merged)
            })
        });
    }
    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let merged = collection("eclass", 1_000);
    let inherited = "eclass1 eclass17 eclass250 eclass999 missing eclass1";
    c.bench_function("resolve_inherited", |b| {
        b.iter(|| black_box(resolve_inherited(black_box(inherited), &merged)))
    });
}

criterion_group!(benches, bench_merge, bench_resolve);
criterion_main!(benches);
