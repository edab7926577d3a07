//! Stress helpers for concurrent handle use.
//!
//! Every worker thread opens its own handle, since handles are bound to the
//! thread that opened them. Workers start together behind a barrier to
//! maximize contention on cold opens and the engine's write lock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tessera_core::{CoreError, HandleConfig, Runtime};
use tessera_engine::Value;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Write transactions per thread.
    pub operations: usize,
    /// Number of worker threads.
    pub threads: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 100,
            threads: 4,
        }
    }
}

/// Opens `config` on every worker thread at once and has each commit
/// `config.operations` single-object transactions.
///
/// Objects are `Person` rows keyed `t{thread}-{op}`, so the file must carry
/// a schema with that type. Open failures count as one failed operation per
/// planned transaction.
pub fn stress_concurrent_writers(
    runtime: &Runtime,
    config: &HandleConfig,
    stress: &StressConfig,
) -> StressTestResult {
    let barrier = Arc::new(Barrier::new(stress.threads));
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let workers: Vec<_> = (0..stress.threads)
        .map(|t| {
            let runtime = runtime.clone();
            let config = config.clone();
            let barrier = Arc::clone(&barrier);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let operations = stress.operations;

            thread::spawn(move || {
                barrier.wait();
                let handle = match runtime.open(config) {
                    Ok(handle) => handle,
                    Err(_) => {
                        failed.fetch_add(operations, Ordering::Relaxed);
                        return;
                    }
                };
                for i in 0..operations {
                    let key = format!("t{t}-{i}");
                    let result = handle.run_in_transaction(|h| {
                        h.put("Person", &key, &[("age", Value::from(i as i64))])
                    });
                    match result {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Opens `config` on every worker thread at once and returns each thread's
/// outcome in thread order.
pub fn concurrent_opens(
    runtime: &Runtime,
    config: &HandleConfig,
    threads: usize,
) -> Vec<Result<u64, CoreError>> {
    let barrier = Arc::new(Barrier::new(threads));
    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let runtime = runtime.clone();
            let config = config.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                runtime.open(config).map(|handle| handle.schema_version())
            })
        })
        .collect();

    workers
        .into_iter()
        .map(|w| w.join().expect("Thread panicked"))
        .collect()
}
