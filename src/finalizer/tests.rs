use super::*;
use crate::test_support::runtime;
use hostbridge_runtime::builtins::{self, string};
use hostbridge_runtime::errors::ExcKind;
use hostbridge_runtime::object::{incref, refcount, ObjPtr};
use hostbridge_runtime::protocol::RawBuffer;
use hostbridge_runtime::typeobj;
use proptest::prelude::*;

unsafe extern "C" fn failing_dealloc(obj: ObjPtr) {
    typeobj::subtype_dealloc(obj);
    errors::raise(ExcKind::RuntimeError, "dealloc failed");
}

/// Heap type whose instances report an error when destroyed
unsafe fn failing_type() -> ObjPtr {
    let tp = typeobj::new_heap_type("FailingDealloc", builtins::object_type()).unwrap();
    typeobj::set(
        tp,
        hostbridge_runtime::offsets().tp_dealloc,
        failing_dealloc as usize,
    );
    tp
}

fn started() -> Arc<Finalizer> {
    let finalizer = Arc::new(Finalizer::default());
    finalizer.start();
    finalizer
}

fn recording_handler(seen: &Arc<Mutex<Vec<usize>>>) -> ErrorHandler {
    let seen = Arc::clone(seen);
    Arc::new(move |err: &BridgeError| {
        if let BridgeError::Finalization { address, .. } = err {
            seen.lock().push(*address);
        }
        true
    })
}

#[test]
fn test_collect_releases_enqueued_reference() {
    let _gil = runtime();
    let finalizer = started();
    unsafe {
        let s = string::new("queued").unwrap();
        incref(s);
        finalizer.enqueue(SharedPtr(s), hostbridge_runtime::generation());
        assert_eq!(finalizer.pending(), (1, 0, 0));

        assert_eq!(finalizer.collect().unwrap(), 1);
        assert_eq!(refcount(s), 1);
        assert_eq!(finalizer.pending(), (0, 0, 0));
        assert_eq!(finalizer.stats().released, 1);
        object::decref(s);
    }
}

#[test]
fn test_disabled_enqueue_is_noop() {
    let _gil = runtime();
    let finalizer = started();
    finalizer.set_enabled(false);
    unsafe {
        let s = string::new("kept").unwrap();
        finalizer.enqueue(SharedPtr(s), hostbridge_runtime::generation());
        assert_eq!(finalizer.pending(), (0, 0, 0));
        object::decref(s);
    }
}

#[test]
fn test_stale_generation_is_reported_not_released() {
    let _gil = runtime();
    let finalizer = started();
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reported);
    finalizer.set_error_handler(Some(Arc::new(move |err: &BridgeError| {
        if matches!(err, BridgeError::StaleGeneration { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        true
    })));
    unsafe {
        let s = string::new("old").unwrap();
        let generation = hostbridge_runtime::generation() + 1000;
        finalizer.enqueue(SharedPtr(s), generation);
        assert_eq!(finalizer.collect().unwrap(), 0);
        assert_eq!(refcount(s), 1);
        assert_eq!(finalizer.stats().stale, 1);
        assert_eq!(reported.load(Ordering::SeqCst), 1);
        object::decref(s);
    }
}

#[test]
fn test_stale_buffer_is_reported_through_handler() {
    let _gil = runtime();
    let finalizer = started();
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reported);
    finalizer.set_error_handler(Some(Arc::new(move |err: &BridgeError| {
        if matches!(err, BridgeError::StaleGeneration { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        true
    })));
    let view = SendBuffer(Box::new(RawBuffer::default()));
    finalizer.enqueue_buffer(view, hostbridge_runtime::generation() + 1000);
    assert_eq!(finalizer.collect().unwrap(), 0);
    assert_eq!(finalizer.pending().2, 0);
    assert_eq!(finalizer.stats().stale, 1);
    assert_eq!(reported.load(Ordering::SeqCst), 1);
}

#[test]
fn test_error_indicator_survives_drain() {
    let _gil = runtime();
    let finalizer = started();
    unsafe {
        let tp = failing_type();
        let obj = typeobj::generic_alloc(tp, 0).unwrap();
        finalizer.set_error_handler(Some(Arc::new(|_: &BridgeError| true)));
        finalizer.enqueue(SharedPtr(obj), hostbridge_runtime::generation());

        errors::raise(ExcKind::KeyError, "pending before drain");
        finalizer.collect().unwrap();
        assert_eq!(errors::occurred_type(), ExcKind::KeyError.type_object());
        errors::clear();
        object::decref(tp);
    }
}

#[test]
fn test_unhandled_failure_stops_and_carries_rest() {
    let _gil = runtime();
    let finalizer = started();
    unsafe {
        let tp = failing_type();
        let first = typeobj::generic_alloc(tp, 0).unwrap();
        let second = typeobj::generic_alloc(tp, 0).unwrap();
        let generation = hostbridge_runtime::generation();
        finalizer.enqueue(SharedPtr(first), generation);
        finalizer.enqueue(SharedPtr(second), generation);

        let err = finalizer.collect().unwrap_err();
        match err {
            BridgeError::Finalization { address, source } => {
                assert_eq!(address, first as usize);
                assert!(matches!(*source, BridgeError::Foreign(_)));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(finalizer.pending().0, 1);
        assert!(!errors::occurred());

        let seen = Arc::new(Mutex::new(Vec::new()));
        finalizer.set_error_handler(Some(recording_handler(&seen)));
        finalizer.collect().unwrap();
        assert_eq!(*seen.lock(), vec![second as usize]);
        assert_eq!(finalizer.stats().failures, 2);
        object::decref(tp);
    }
}

#[test]
fn test_double_enqueue_reports_one_violation() {
    let _gil = runtime();
    let finalizer = started();
    finalizer.set_refcount_validation(true);
    finalizer.set_throw_on_unhandled_refcount(false);
    unsafe {
        let s = string::new("once").unwrap();
        let generation = hostbridge_runtime::generation();
        finalizer.enqueue(SharedPtr(s), generation);
        finalizer.enqueue(SharedPtr(s), generation);
        assert_eq!(finalizer.collect().unwrap(), 1);
    }
    let stats = finalizer.stats();
    assert_eq!(stats.violations, 1);
    assert_eq!(stats.released, 1);
}

#[test]
fn test_unhandled_violation_is_fatal_by_default() {
    let _gil = runtime();
    let finalizer = started();
    finalizer.set_refcount_validation(true);
    unsafe {
        let s = string::new("twice").unwrap();
        incref(s);
        let generation = hostbridge_runtime::generation();
        for _ in 0..3 {
            finalizer.enqueue(SharedPtr(s), generation);
        }
        let err = finalizer.collect().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::IncorrectRefCount {
                enqueued: 3,
                refcount: 2,
                ..
            }
        ));
        // Surplus entries are gone; the two allowed ones wait for the next drain
        assert_eq!(finalizer.pending().0, 2);
        finalizer.set_refcount_validation(false);
        assert_eq!(finalizer.collect().unwrap(), 2);
    }
}

#[test]
fn test_resolver_can_accept_violations() {
    let _gil = runtime();
    let finalizer = started();
    finalizer.set_refcount_validation(true);
    finalizer.set_refcount_resolver(Some(Arc::new(|_: &BridgeError| true)));
    unsafe {
        let s = string::new("resolved").unwrap();
        let generation = hostbridge_runtime::generation();
        finalizer.enqueue(SharedPtr(s), generation);
        finalizer.enqueue(SharedPtr(s), generation);
        assert_eq!(finalizer.collect().unwrap(), 1);
    }
    assert_eq!(finalizer.stats().violations, 1);
}

#[test]
fn test_throttled_collect_needs_start_and_threshold() {
    let finalizer = Finalizer::default();
    assert!(matches!(finalizer.throttled_collect(), Err(BridgeError::NotRunning)));

    let _gil = runtime();
    finalizer.start();
    finalizer.set_threshold(3);
    let drains = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&drains);
    finalizer.set_before_collect(Some(Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })));
    assert_eq!(finalizer.throttled_collect().unwrap(), 0);
    assert_eq!(finalizer.throttled_collect().unwrap(), 0);
    assert_eq!(drains.load(Ordering::SeqCst), 0);
    finalizer.throttled_collect().unwrap();
    assert_eq!(drains.load(Ordering::SeqCst), 1);
    finalizer.throttled_collect().unwrap();
    assert_eq!(drains.load(Ordering::SeqCst), 1);
}

#[test]
fn test_before_collect_sees_pending_count() {
    let _gil = runtime();
    let finalizer = started();
    let seen = Arc::new(AtomicUsize::new(usize::MAX));
    let slot = Arc::clone(&seen);
    finalizer.set_before_collect(Some(Arc::new(move |n| slot.store(n, Ordering::SeqCst))));
    unsafe {
        let a = string::new("a").unwrap();
        let b = string::new("b").unwrap();
        let generation = hostbridge_runtime::generation();
        finalizer.enqueue(SharedPtr(a), generation);
        finalizer.enqueue(SharedPtr(b), generation);
    }
    finalizer.collect().unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_drain_is_fifo(count in 1usize..12) {
        let _gil = runtime();
        let finalizer = started();
        let seen = Arc::new(Mutex::new(Vec::new()));
        finalizer.set_error_handler(Some(recording_handler(&seen)));
        unsafe {
            let tp = failing_type();
            let generation = hostbridge_runtime::generation();
            let mut order = Vec::new();
            for _ in 0..count {
                let obj = typeobj::generic_alloc(tp, 0).unwrap();
                order.push(obj as usize);
                finalizer.enqueue(SharedPtr(obj), generation);
            }
            finalizer.collect().unwrap();
            prop_assert_eq!(&*seen.lock(), &order);
            object::decref(tp);
        }
    }
}
