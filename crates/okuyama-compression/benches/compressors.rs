//! Compressor throughput benchmarks.
//!
//! Run with:
//! ```bash
//! cargo bench -p okuyama-compression --bench compressors
//! ```

#![allow(clippy::expect_used)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use okuyama_compression::{CompressorId, CompressorRegistry};
use std::hint::black_box;

fn sample(len: usize) -> Vec<u8> {
    b"session=4f1c; user=okuyama; tags=alpha:beta:gamma; "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

fn bench_compress(c: &mut Criterion) {
    let registry = CompressorRegistry::with_defaults();
    let mut group = c.benchmark_group("compress");
    for len in [256usize, 4 * 1024, 64 * 1024] {
        let data = sample(len);
        group.throughput(Throughput::Bytes(len as u64));
        for (name, id) in [("deflate", CompressorId::DEFLATE), ("lz4", CompressorId::LZ4)] {
            group.bench_with_input(BenchmarkId::new(name, len), &data, |b, data| {
                b.iter(|| registry.compress(id, black_box(data)).expect("compress"));
            });
        }
    }
    group.finish();
}

fn bench_decompress(c: &mut Criterion) {
    let registry = CompressorRegistry::with_defaults();
    let mut group = c.benchmark_group("decompress");
    for len in [256usize, 4 * 1024, 64 * 1024] {
        group.throughput(Throughput::Bytes(len as u64));
        for (name, id) in [("deflate", CompressorId::DEFLATE), ("lz4", CompressorId::LZ4)] {
            let framed = registry.compress(id, &sample(len)).expect("compress");
            group.bench_with_input(BenchmarkId::new(name, len), &framed, |b, framed| {
                b.iter(|| registry.decompress(black_box(framed)).expect("decompress"));
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_compress, bench_decompress);
criterion_main!(benches);
