use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hostbridge_runtime::builtins::{numbers, tuple};
use hostbridge_runtime::{decref, gil, incref, initialize, RuntimeConfig};

fn bench_refcount(c: &mut Criterion) {
    initialize(&RuntimeConfig::default()).expect("runtime init");
    let _gil = gil::acquire();
    let obj = unsafe { numbers::int_new(1).expect("int") };

    c.bench_function("incref_decref", |b| {
        b.iter(|| unsafe {
            incref(black_box(obj));
            decref(black_box(obj));
        });
    });

    c.bench_function("tuple_alloc_free", |b| {
        b.iter(|| unsafe {
            let t = tuple::from_borrowed(&[obj, obj]).expect("tuple");
            decref(black_box(t));
        });
    });

    unsafe { decref(obj) };
}

criterion_group!(benches, bench_refcount);
criterion_main!(benches);
