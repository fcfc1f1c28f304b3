//! Dispatch throughput benchmarks.
//!
//! Measures per-call dispatch overhead for borrowed and consumed inputs,
//! and pooled throughput under concurrent callers.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use tempfile::TempDir;

use modelpack_core::models::MANIFEST_FILE;
use modelpack_core::{DType, DeviceManager, ModelPackage, Tensor};

const ELEMENTS: usize = 64 * 1024;

fn identity_package() -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    let manifest = json!({
        "format_version": 1,
        "models": {
            "model": {
                "backend": "signature",
                "call_spec": ["x", "y"],
                "entry_point": {
                    "inputs": [{ "dtype": "f32", "shape": [ELEMENTS] }],
                    "outputs": [{ "init": { "input": 0 } }]
                }
            }
        }
    });
    std::fs::write(dir.path().join(MANIFEST_FILE), manifest.to_string()).expect("write manifest");
    dir
}

fn open(dir: &TempDir, runners: usize) -> ModelPackage {
    ModelPackage::builder(dir.path())
        .num_runners(runners)
        .device_manager(DeviceManager::host_only())
        .build()
        .expect("open package")
}

fn bench_single_call(c: &mut Criterion) {
    let dir = identity_package();
    let package = open(&dir, 1);
    let input = Tensor::zeros(DType::F32, vec![ELEMENTS]).expect("input");

    let mut group = c.benchmark_group("single_call");
    group.throughput(Throughput::Bytes((ELEMENTS * 4) as u64));

    // Borrowed input: the forwarded output is deep-copied.
    group.bench_function("run", |b| {
        b.iter(|| black_box(package.run(std::slice::from_ref(&input)).expect("run")))
    });

    // Consumed input: the forwarded output reuses its storage.
    group.bench_function("boxed_run", |b| {
        b.iter_batched(
            || input.deep_copy(),
            |owned| black_box(package.boxed_run(vec![owned]).expect("boxed_run")),
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_pooled(c: &mut Criterion) {
    const CALLERS: usize = 8;
    const CALLS_PER_CALLER: usize = 16;

    let dir = identity_package();
    let mut group = c.benchmark_group("pooled_runs");
    group.throughput(Throughput::Elements((CALLERS * CALLS_PER_CALLER) as u64));

    for runners in [1usize, 2, 4, 8] {
        let package = open(&dir, runners);
        let input = Tensor::zeros(DType::F32, vec![ELEMENTS]).expect("input");

        group.bench_function(BenchmarkId::new("runners", runners), |b| {
            b.iter(|| {
                std::thread::scope(|s| {
                    for _ in 0..CALLERS {
                        s.spawn(|| {
                            for _ in 0..CALLS_PER_CALLER {
                                black_box(package.run(std::slice::from_ref(&input)).expect("run"));
                            }
                        });
                    }
                });
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_call, bench_pooled);
criterion_main!(benches);
