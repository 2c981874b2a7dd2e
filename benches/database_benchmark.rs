use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng;
use themis_engine::core::types::{Entity, Value};
use themis_engine::engine::Themis;

/// Builds an `articles` row with a pseudo-random fulltext body and a
/// category bucket, mirroring the fixture shape used in the crate's own
/// end-to-end tests (`aql::executor` test scenarios).
fn make_article(id: u64, body_words: usize) -> Entity {
    let mut rng = rand::thread_rng();
    let words = ["the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog"];
    let body: String = (0..body_words).map(|_| words[rng.gen_range(0..words.len())]).collect::<Vec<_>>().join(" ");

    Entity::new("articles", &format!("a{id}"))
        .with_field("title", Value::Str(format!("Article {id}")))
        .with_field("body", Value::Str(body))
        .with_field("category", Value::Str(format!("category_{}", id % 10)))
        .with_field("views", Value::I64(rng.gen_range(0..10_000)))
}

fn open_articles_db() -> Themis {
    let db = Themis::in_memory().unwrap();
    db.create_equality_index("articles", "category", false).unwrap();
    db.create_range_index("articles", "views").unwrap();
    db.create_fulltext_index("articles", "body", None).unwrap();
    db
}

fn bench_single_put(c: &mut Criterion) {
    let db = open_articles_db();

    c.bench_function("single_entity_put", |b| {
        let mut id = 0u64;
        b.iter(|| {
            db.put("articles", &make_article(id, 40)).unwrap();
            id += 1;
        });
    });
}

fn bench_batch_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_put");

    for batch_size in [10, 50, 100, 500, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &batch_size, |b, &batch_size| {
            let db = open_articles_db();
            let mut id_counter = 0u64;

            b.iter(|| {
                for _ in 0..batch_size {
                    db.put("articles", &make_article(id_counter, 40)).unwrap();
                    id_counter += 1;
                }
            });
        });
    }
    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let db = open_articles_db();
    for i in 0..2000u64 {
        db.put("articles", &make_article(i, 40)).unwrap();
    }

    let mut group = c.benchmark_group("query");

    group.bench_function("equality_filter", |b| {
        b.iter(|| {
            let rows = db.query(black_box("FOR a IN articles FILTER a.category == \"category_5\" RETURN a")).unwrap();
            black_box(rows);
        });
    });

    group.bench_function("range_filter_sorted_limit", |b| {
        b.iter(|| {
            let rows = db
                .query(black_box("FOR a IN articles FILTER a.views > 5000 SORT a.views DESC LIMIT 20 RETURN a"))
                .unwrap();
            black_box(rows);
        });
    });

    group.bench_function("fulltext_single_term", |b| {
        b.iter(|| {
            let rows = db.query(black_box("FOR a IN articles FILTER FULLTEXT(a.body, \"fox\") RETURN a")).unwrap();
            black_box(rows);
        });
    });

    group.bench_function("fulltext_and_structural", |b| {
        b.iter(|| {
            let rows = db
                .query(black_box(
                    "FOR a IN articles FILTER FULLTEXT(a.body, \"quick brown\") AND a.category == \"category_3\" RETURN a",
                ))
                .unwrap();
            black_box(rows);
        });
    });

    group.bench_function("or_disjunctive", |b| {
        b.iter(|| {
            let rows = db
                .query(black_box("FOR a IN articles FILTER a.category == \"category_1\" OR a.category == \"category_2\" RETURN a"))
                .unwrap();
            black_box(rows);
        });
    });

    group.bench_function("collect_aggregate", |b| {
        b.iter(|| {
            let rows = db
                .query(black_box(
                    "FOR a IN articles COLLECT category = a.category AGGREGATE total = SUM(a.views), n = COUNT(a) RETURN {category: category, total: total, n: n}",
                ))
                .unwrap();
            black_box(rows);
        });
    });

    group.finish();
}

fn bench_simd_operations(c: &mut Criterion) {
    use themis_engine::simd::SimdOps;

    let mut group = c.benchmark_group("simd_operations");

    for size in [100u32, 1_000, 10_000, 100_000] {
        let array1: Vec<u32> = (0..size).step_by(2).collect();
        let array2: Vec<u32> = (0..size).step_by(3).collect();

        group.bench_with_input(BenchmarkId::new("intersection", size), &(array1.clone(), array2.clone()), |b, (a1, a2)| {
            b.iter(|| SimdOps::intersect_sorted(black_box(a1), black_box(a2)));
        });

        group.bench_with_input(BenchmarkId::new("union", size), &(array1, array2), |b, (a1, a2)| {
            b.iter(|| SimdOps::union_sorted(black_box(a1), black_box(a2)));
        });
    }

    group.finish();
}

fn bench_put_and_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_path");

    group.bench_function("put_then_delete", |b| {
        let db = open_articles_db();
        let mut id = 0u64;

        b.iter(|| {
            let entity = make_article(id, 40);
            db.put("articles", &entity).unwrap();
            db.delete("articles", &format!("a{id}")).unwrap();
            id += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_put,
    bench_batch_put,
    bench_query,
    bench_simd_operations,
    bench_put_and_delete
);
criterion_main!(benches);
