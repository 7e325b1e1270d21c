//! Registry and codec benchmarks
//!
//! Run with: cargo bench -p tandem-objects --bench registry

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tandem_objects::id::{decode, encode};
use tandem_objects::{ClassConfig, ClassRegistry, NodeId, ObjectClass, ObjectId, ObjectName};

fn bench_codec(c: &mut Criterion) {
    c.bench_function("encode_decode", |b| {
        b.iter(|| {
            let id = encode(black_box(2), black_box(5), black_box(3), black_box(0x1234));
            black_box(decode(id))
        })
    });
}

fn bench_allocate_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_free");

    for size in [16u16, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut registry: ClassRegistry<u32> =
                ClassRegistry::new(ObjectClass::PARTITIONS, NodeId::FIRST, 1, ClassConfig::fixed(size))
                    .unwrap();
            b.iter(|| {
                let slot = registry.allocate(ObjectName::Word(0x5054_3120), 7).unwrap();
                black_box(registry.free(slot).unwrap())
            })
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut registry: ClassRegistry<u32> =
        ClassRegistry::new(ObjectClass::PARTITIONS, NodeId::FIRST, 4, ClassConfig::fixed(1024)).unwrap();
    let ids: Vec<ObjectId> = (0..1024u32)
        .map(|value| registry.allocate(ObjectName::Word(value + 1), value).unwrap().id())
        .collect();

    c.bench_function("get_local", |b| {
        let mut next = 0;
        b.iter(|| {
            next = (next + 1) % ids.len();
            black_box(registry.get(ids[next]).local().is_ok())
        })
    });

    let remote = ObjectId::new(ObjectClass::PARTITIONS, NodeId::new(3).unwrap(), 1);
    c.bench_function("get_remote", |b| b.iter(|| black_box(registry.get(black_box(remote)))));

    c.bench_function("name_to_id", |b| {
        b.iter(|| black_box(registry.name_to_id(&ObjectName::Word(black_box(512)))))
    });
}

criterion_group!(benches, bench_codec, bench_allocate_free, bench_lookup);
criterion_main!(benches);
