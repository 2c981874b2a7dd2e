use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng;
use themis_engine::core::registry::{Metric, Registry};
use themis_engine::core::types::{Entity, Value};
use themis_engine::engine::Themis;
use themis_engine::geo::geometry::{Coordinate, Geometry, MBR};
use themis_engine::index::spatial::{SpatialConfig, SpatialIndex};
use themis_engine::store::memstore::MemStore;

fn random_vector(dim: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

/// Index build/rebuild cost as the table grows — the analogue of an
/// on-disk segment-loading sweep, here over the in-memory catalog-driven
/// indexes (`spec.md` §4.3 "Rebuild").
fn bench_equality_index_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("equality_index_rebuild");

    for table_size in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(table_size), &table_size, |b, &table_size| {
            let db = Themis::in_memory().unwrap();
            for i in 0..table_size {
                db.put(
                    "users",
                    &Entity::new("users", &format!("u{i}")).with_field("city", Value::Str(format!("city_{}", i % 20))),
                )
                .unwrap();
            }
            db.create_equality_index("users", "city", false).unwrap();
            let secondary = db.secondary();

            b.iter(|| {
                secondary.drop_index("users", &["city"], themis_engine::catalog::IndexKind::Equality).unwrap();
                db.create_equality_index("users", "city", false).unwrap();
                let n = secondary
                    .rebuild("users", &["city"], themis_engine::catalog::IndexKind::Equality, |_| true)
                    .unwrap();
                black_box(n);
            });
        });
    }

    group.finish();
}

/// HNSW build cost over a growing vector population (`spec.md` §4.6,
/// property 10's recall floor is tested elsewhere; this tracks build time).
fn bench_vector_index_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_index_build");
    group.sample_size(10);

    for population in [100usize, 1_000, 5_000] {
        group.bench_with_input(BenchmarkId::from_parameter(population), &population, |b, &population| {
            let db = Themis::in_memory().unwrap();
            db.create_vector_index("images", "embedding", 32, Metric::Cosine, 16, 200, 64).unwrap();

            b.iter(|| {
                for i in 0..population {
                    db.put(
                        "images",
                        &Entity::new("images", &format!("img{i}")).with_field("embedding", Value::Vector(random_vector(32))),
                    )
                    .unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_vector_knn_search(c: &mut Criterion) {
    let db = Themis::in_memory().unwrap();
    db.create_vector_index("images", "embedding", 32, Metric::Cosine, 16, 200, 64).unwrap();
    for i in 0..5_000 {
        db.put(
            "images",
            &Entity::new("images", &format!("img{i}")).with_field("embedding", Value::Vector(random_vector(32))),
        )
        .unwrap();
    }
    let query_literal = format!("[{}]", random_vector(32).iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "));
    let aql = format!("FOR d IN images SORT SIMILARITY(d.embedding, {query_literal}) DESC LIMIT 10 RETURN d");

    c.bench_function("vector_knn_search_k10", |b| {
        b.iter(|| {
            let rows = db.query(black_box(&aql)).unwrap_or_default();
            black_box(rows);
        });
    });
}

/// Exercises the Morton-bucket R-tree directly (`spec.md` §4.4): bucket
/// insert cost as the table grows, then `search_intersects` against a
/// small query window.
fn bench_spatial_index_build_and_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("spatial_index");

    for population in [100usize, 1_000, 10_000] {
        let store = Arc::new(MemStore::new());
        let index = SpatialIndex::new(store, Registry::default());
        index.create("places", SpatialConfig::default()).unwrap();

        let mut rng = rand::thread_rng();
        for i in 0..population {
            let x: f64 = rng.gen_range(-180.0..180.0);
            let y: f64 = rng.gen_range(-90.0..90.0);
            let sidecar = Geometry::Point(Coordinate { x, y, z: None }).sidecar();
            index.insert("places", &format!("p{i}"), &sidecar).unwrap();
        }

        let query = MBR::new(-10.0, -10.0, 10.0, 10.0);
        group.bench_with_input(BenchmarkId::new("search_intersects", population), &index, |b, index| {
            b.iter(|| {
                let hits = index.search_intersects("places", black_box(&query)).unwrap();
                black_box(hits);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_equality_index_rebuild,
    bench_vector_index_build,
    bench_vector_knn_search,
    bench_spatial_index_build_and_search
);
criterion_main!(benches);
