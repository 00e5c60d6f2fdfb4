use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{Duration, Utc};
use citylayout_core::{LayoutId, LayoutRecord, OwnerId, Payload};
use citylayout_events::InMemoryBroadcaster;
use citylayout_infra::layout_service::LayoutService;
use citylayout_infra::layout_store::{InMemoryLayoutStore, LayoutStore};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Store holding `entities` layouts for one owner, each with `versions` rows.
fn seeded_store(rt: &Runtime, owner: OwnerId, entities: usize, versions: usize) -> InMemoryLayoutStore {
    let store = InMemoryLayoutStore::new();
    let base = Utc::now();
    rt.block_on(async {
        for _ in 0..entities {
            let entity = LayoutId::new();
            for v in 0..versions {
                let record = LayoutRecord::new(
                    owner,
                    entity,
                    base + Duration::milliseconds(v as i64),
                    Payload::from(r#"{"grid":{"width":32,"height":32}}"#),
                );
                store.insert(&record).await.unwrap();
            }
        }
    });
    store
}

fn bench_latest_per_entity(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("latest_per_entity");

    for (entities, versions) in [(10, 1), (10, 50), (200, 5)] {
        let owner = OwnerId::new();
        let store = seeded_store(&rt, owner, entities, versions);
        group.throughput(Throughput::Elements((entities * versions) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{entities}x{versions}")),
            &owner,
            |b, owner| {
                b.iter(|| {
                    let records = rt.block_on(store.latest_per_entity(*owner)).unwrap();
                    black_box(records)
                });
            },
        );
    }

    group.finish();
}

fn bench_upsert(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("upsert");
    group.throughput(Throughput::Elements(1));

    let service = LayoutService::new(
        Arc::new(InMemoryLayoutStore::new()),
        Arc::new(InMemoryBroadcaster::new()),
    );
    let owner = OwnerId::new();
    let entity = LayoutId::new();

    group.bench_function("same_layout_new_version", |b| {
        b.iter(|| {
            let record = rt
                .block_on(service.upsert(owner, entity, Payload::from(r#"{"x":1}"#)))
                .unwrap();
            black_box(record)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_latest_per_entity, bench_upsert);
criterion_main!(benches);
