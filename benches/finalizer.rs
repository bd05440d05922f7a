//! Finalizer benchmarks
//!
//! Measures the enqueue path host threads pay and the cost of one drain.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hostbridge::{Finalizer, FinalizerConfig};
use hostbridge_runtime::builtins::string;
use hostbridge_runtime::object::{incref, ObjPtr, SharedPtr};
use hostbridge_runtime::{gil, RuntimeConfig};

fn make_objects(count: usize) -> Vec<ObjPtr> {
    let _gil = gil::acquire();
    (0..count)
        .map(|i| unsafe { string::new(&format!("bench_{}", i)).unwrap() })
        .collect()
}

fn bench_enqueue(c: &mut Criterion) {
    let _ = hostbridge_runtime::initialize(&RuntimeConfig::default());
    let finalizer = Finalizer::new(&FinalizerConfig::default());
    let generation = hostbridge_runtime::generation();
    let ptr = SharedPtr(make_objects(1)[0]);

    c.bench_function("enqueue", |b| {
        b.iter(|| finalizer.enqueue(black_box(ptr), generation));
    });
}

fn bench_drain(c: &mut Criterion) {
    let _ = hostbridge_runtime::initialize(&RuntimeConfig::default());
    let generation = hostbridge_runtime::generation();
    let mut group = c.benchmark_group("drain");

    for size in [10, 100, 1000].iter() {
        let objects = make_objects(1);
        let keep = objects[0];
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let finalizer = Finalizer::new(&FinalizerConfig::default());
            b.iter(|| {
                {
                    let _gil = gil::acquire();
                    for _ in 0..size {
                        unsafe { incref(keep) };
                    }
                }
                for _ in 0..size {
                    finalizer.enqueue(SharedPtr(keep), generation);
                }
                black_box(finalizer.collect().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_validated_drain(c: &mut Criterion) {
    let _ = hostbridge_runtime::initialize(&RuntimeConfig::default());
    let generation = hostbridge_runtime::generation();
    let config = FinalizerConfig {
        refcount_validation: true,
        ..FinalizerConfig::default()
    };
    let finalizer = Finalizer::new(&config);
    let keep = make_objects(1)[0];

    c.bench_function("drain_validated_100", |b| {
        b.iter(|| {
            {
                let _gil = gil::acquire();
                for _ in 0..100 {
                    unsafe { incref(keep) };
                }
            }
            for _ in 0..100 {
                finalizer.enqueue(SharedPtr(keep), generation);
            }
            black_box(finalizer.collect().unwrap())
        });
    });
}

criterion_group!(benches, bench_enqueue, bench_drain, bench_validated_drain);
criterion_main!(benches);
