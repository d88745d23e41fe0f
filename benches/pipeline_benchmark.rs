use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use locktree::protocol::{Operation, PushPollData};
use locktree::transform::{transform_batch, TransformContext};
use locktree::{Direction, Encrypter, LockConfig, MemoryStore, NodePatch, NodeStore, Secret};
use serde_json::json;
use tokio::runtime::Runtime;

fn locked_store(children: usize) -> NodeStore {
    let mut store = NodeStore::new("#private", 10_000);
    store.update("root", NodePatch::default().name("Vault #private"), false);
    for i in 0..children {
        store.update(
            &format!("n{i}"),
            NodePatch::default().name(format!("note {i}")).parent(Some("root".into())),
            false,
        );
    }
    store
}

fn edit_batch(count: usize) -> PushPollData {
    let operations = (0..count)
        .map(|i| {
            Operation::from(json!({
                "type": "edit",
                "data": {"projectid": format!("n{i}"), "name": format!("renamed {i}")}
            }))
        })
        .collect();
    PushPollData {
        operations: Some(operations),
        ..PushPollData::default()
    }
}

fn benchmark_pipeline(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut config = LockConfig::default();
    config.crypto.kdf_iterations = 1_000;

    let encrypter = Arc::new(Encrypter::new(&config, Arc::new(MemoryStore::new())));
    runtime
        .block_on(encrypter.set_secret(Secret::new("bench-secret").unwrap()))
        .unwrap();

    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);

    for count in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("outbound_edits", count), &count, |b, &count| {
            b.to_async(&runtime).iter(|| {
                let encrypter = encrypter.clone();
                async move {
                    let mut store = locked_store(count);
                    let mut batch = edit_batch(count);
                    let mut ctx = TransformContext {
                        store: &mut store,
                        cipher: encrypter.as_ref(),
                        direction: Direction::Encrypt,
                        network: true,
                    };
                    black_box(transform_batch(&mut ctx, &mut batch).await);
                    batch
                }
            });
        });
    }

    group.bench_function("ancestor_walk_depth_1000", |b| {
        let mut store = NodeStore::new("#private", 10_000);
        store.update("d0", NodePatch::default().name("top #private"), false);
        for i in 1..1000 {
            store.update(
                &format!("d{i}"),
                NodePatch::default().parent(Some(format!("d{}", i - 1))),
                false,
            );
        }
        b.iter(|| store.is_locked(black_box("d999"), false));
    });

    group.finish();
}

criterion_group!(benches, benchmark_pipeline);
criterion_main!(benches);
