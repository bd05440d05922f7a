//! Runtime restart in one process; a single test since it finalizes the
//! process-wide runtime

use hostbridge::{Bridge, BridgeError, FinalizerConfig, Finalizer, HostObject, HostType};
use hostbridge_runtime::builtins::string;
use hostbridge_runtime::gil;
use hostbridge_runtime::object::SharedPtr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_objects_from_a_finished_runtime_are_never_touched() {
    let bridge = Bridge::start().unwrap();
    let first_generation = bridge.generation();
    let obj = HostObject::new(&HostType::class("Old").build());
    let wrapped = bridge.wrap(&obj).unwrap();
    let raw = {
        let _gil = gil::acquire();
        unsafe { string::new("old").unwrap() }
    };
    bridge.shutdown().unwrap();

    hostbridge_runtime::finalize();
    assert!(!wrapped.is_current());

    let bridge = Bridge::start().unwrap();
    assert!(bridge.generation() > first_generation);
    assert!(matches!(wrapped.to_owned_ptr(), Err(BridgeError::StaleGeneration { .. })));

    // Old-generation entries are reported and dropped
    let finalizer = Finalizer::new(&FinalizerConfig::default());
    let reported = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&reported);
    finalizer.set_error_handler(Some(Arc::new(move |err: &BridgeError| {
        assert!(matches!(err, BridgeError::StaleGeneration { .. }));
        seen.fetch_add(1, Ordering::SeqCst);
        true
    })));
    finalizer.enqueue(SharedPtr(raw), first_generation);
    assert_eq!(finalizer.collect().unwrap(), 0);
    assert_eq!(reported.load(Ordering::SeqCst), 1);
    assert_eq!(finalizer.stats().stale, 1);

    // Dropping the stale wrapper only queues it
    drop(wrapped);
    let fresh = bridge.wrap(&obj).unwrap();
    assert!(fresh.is_current());
    bridge.shutdown().unwrap();
}
