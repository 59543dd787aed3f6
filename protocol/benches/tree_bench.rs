// Indexed Merkle tree benchmarks.
//
// Covers the checkpoint hot path: building a receipt tree from a full
// stage, incremental inserts, and slice extraction.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use childchain_protocol::crypto::hash_text;
use childchain_protocol::tree::{IndexedMerkleTree, LeafEntry};

const HEIGHT: u32 = 16;

fn receipt_entries(n: usize) -> Vec<LeafEntry> {
    (0..n)
        .map(|i| {
            let receipt_hash = hash_text(&format!("receipt-{:08}", i));
            LeafEntry::new(receipt_hash.clone(), receipt_hash, "")
        })
        .collect()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree/build");
    group.sample_size(20);

    for size in [100usize, 1_000, 10_000] {
        let entries = receipt_entries(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &entries, |b, entries| {
            b.iter(|| IndexedMerkleTree::build(HEIGHT, 1, entries).unwrap());
        });
    }

    group.finish();
}

fn bench_insert(c: &mut Criterion) {
    let base = IndexedMerkleTree::build(HEIGHT, 1, &receipt_entries(1_000)).unwrap();
    let id = hash_text("late receipt");

    c.bench_function("tree/insert_into_1000", |b| {
        b.iter_batched(
            || base.clone(),
            |mut tree| tree.insert(&id, &id, "").unwrap(),
            criterion::BatchSize::LargeInput,
        );
    });
}

fn bench_extract_proof(c: &mut Criterion) {
    let entries = receipt_entries(1_000);
    let tree = IndexedMerkleTree::build(HEIGHT, 1, &entries).unwrap();
    let id = entries[500].id.clone();

    c.bench_function("tree/extract_proof", |b| {
        b.iter(|| tree.extract_proof(&id));
    });
}

criterion_group!(benches, bench_build, bench_insert, bench_extract_proof);
criterion_main!(benches);
