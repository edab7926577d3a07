//! Write transaction and enumeration benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tessera_bench::{bench_runtime, blob_config, blob_fields, random_data};

/// Benchmark one put per transaction.
fn bench_single_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_write");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let runtime = bench_runtime();
            let handle = runtime.open(blob_config("single-write")).unwrap();
            let data = random_data(size);
            let mut n = 0u64;

            b.iter(|| {
                n += 1;
                let key = format!("blob-{n}");
                handle
                    .run_in_transaction(|h| {
                        h.put("Blob", &key, &blob_fields(black_box(data.clone())))
                    })
                    .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark many puts in one transaction.
fn bench_batch_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_write");

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let runtime = bench_runtime();
                let handle = runtime.open(blob_config("batch-write")).unwrap();

                // Pre-generate data
                let blobs: Vec<_> = (0..batch_size)
                    .map(|i| (format!("blob-{i}"), random_data(256)))
                    .collect();

                b.iter(|| {
                    handle
                        .run_in_transaction(|h| {
                            for (key, data) in &blobs {
                                h.put("Blob", key, &blob_fields(black_box(data.clone())))?;
                            }
                            Ok(())
                        })
                        .unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark commits with a registered listener.
fn bench_commit_with_listeners(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_with_listeners");

    for listeners in [0usize, 1, 16].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(listeners),
            listeners,
            |b, &listeners| {
                let runtime = bench_runtime();
                let handle = runtime.open(blob_config("listeners")).unwrap();
                let tokens: Vec<_> = (0..listeners)
                    .map(|_| handle.add_listener(|kind, _| {
                        black_box(kind);
                    }))
                    .collect();

                b.iter(|| {
                    handle.begin_write().unwrap();
                    black_box(handle.commit_write().unwrap());
                });

                for token in tokens {
                    handle.remove_listener(token).unwrap();
                }
            },
        );
    }
    group.finish();
}

/// Benchmark a full enumeration.
fn bench_enumerate(c: &mut Criterion) {
    let mut group = c.benchmark_group("enumerate");

    for count in [100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let runtime = bench_runtime();
            let handle = runtime.open(blob_config("enumerate")).unwrap();
            handle
                .run_in_transaction(|h| {
                    for i in 0..count {
                        h.put("Blob", &format!("blob-{i:05}"), &blob_fields(random_data(64)))?;
                    }
                    Ok(())
                })
                .unwrap();

            b.iter(|| {
                let seen = handle.enumerate("Blob").unwrap().count();
                black_box(seen);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_single_write,
    bench_batch_write,
    bench_commit_with_listeners,
    bench_enumerate
);
criterion_main!(benches);
