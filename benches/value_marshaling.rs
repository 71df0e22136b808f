//! Value Marshaling Benchmark (Criterion)
//!
//! Measures the per-call conversion cost of `mongodb.query`: stored
//! documents to native values, and native values to policy terms.

use bson::{doc, Document};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rego_mongo_bridge::value::{document, term};
use rego_mongo_bridge::{Mapping, NativeValue};

/// Sample user documents as the store would return them.
fn sample_documents(count: usize) -> Vec<Document> {
    (0..count)
        .map(|i| {
            doc! {
                "_id": bson::oid::ObjectId::new(),
                "name": format!("user-{}", i),
                "active": i % 2 == 0,
                "age": 20 + (i % 50) as i32,
                "score": i as f64 * 0.5,
                "roles": ["reader", "writer"],
                "profile": {
                    "department": "engineering",
                    "created": bson::DateTime::from_millis(1_700_000_000_000 + i as i64),
                },
            }
        })
        .collect()
}

fn bench_from_documents(c: &mut Criterion) {
    let mut group = c.benchmark_group("from_documents");

    for count in [1, 10, 100, 1000] {
        let documents = sample_documents(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &documents, |b, docs| {
            b.iter(|| document::from_documents(black_box(docs)).unwrap())
        });
    }

    group.finish();
}

fn bench_encode_result(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_result");

    for count in [1, 10, 100, 1000] {
        let results = document::from_documents(&sample_documents(count)).unwrap();
        let value = NativeValue::Sequence(results.into_iter().map(NativeValue::Mapping).collect());
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &value, |b, value| {
            b.iter(|| term::encode_result(black_box(value)).unwrap())
        });
    }

    group.finish();
}

fn bench_to_filter(c: &mut Criterion) {
    let mut filter = Mapping::new();
    filter.insert("active".into(), NativeValue::Boolean(true));
    filter.insert("profile.department".into(), NativeValue::from("engineering"));
    filter.insert(
        "age".into(),
        NativeValue::Mapping(Mapping::from([("$gte".to_string(), NativeValue::Integer(21))])),
    );

    c.bench_function("to_filter", |b| {
        b.iter(|| document::to_filter(black_box(&filter)))
    });
}

criterion_group!(
    benches,
    bench_from_documents,
    bench_encode_result,
    bench_to_filter
);
criterion_main!(benches);
