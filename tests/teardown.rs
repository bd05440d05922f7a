use hostbridge::host;
use hostbridge::{handles, Bridge, BridgeError, HostObject, HostType, HostValue};
use hostbridge_runtime::{gil, protocol};
use std::sync::Arc;

#[test]
fn test_instances_outlive_the_bridge() {
    let bridge = Bridge::start().unwrap();
    let ty = HostType::class("Survivor")
        .member(host::auto_property("Name", host::string_type()))
        .build();
    let obj = HostObject::new(&ty);
    let wrapped = bridge.wrap(&obj).unwrap();
    assert!(Arc::strong_count(&obj) > 1);

    let report = bridge.shutdown().unwrap();
    assert!(report.classes_released >= 1);
    assert!(report.handles_released >= 1);
    assert_eq!(handles::live_count_for(bridge.owner()), 0);
    assert_eq!(Arc::strong_count(&obj), 1);

    // Default slots only from here on; host code is never reached
    {
        let _gil = gil::acquire();
        let text = unsafe { protocol::repr_string(wrapped.as_ptr()).unwrap() };
        assert!(text.contains("Survivor"), "{}", text);
        drop(wrapped);
    }
    assert_eq!(Arc::strong_count(&obj), 1);
}

#[test]
fn test_stopped_bridge_refuses_work() {
    let bridge = Bridge::start().unwrap();
    let ty = HostType::class("Late").build();
    bridge.shutdown().unwrap();

    assert!(!bridge.is_running());
    assert!(matches!(bridge.shutdown(), Err(BridgeError::NotRunning)));
    assert!(matches!(bridge.class_of(&ty), Err(BridgeError::NotRunning)));
    assert!(matches!(bridge.to_foreign(&HostValue::Int(1)), Err(BridgeError::NotRunning)));
    assert!(matches!(bridge.root_module(), Err(BridgeError::NotRunning)));
    assert!(matches!(bridge.throttled_collect(), Err(BridgeError::NotRunning)));
}

#[test]
fn test_dropping_a_running_bridge_tears_it_down() {
    let bridge = Bridge::start().unwrap();
    let owner = bridge.owner();
    let obj = HostObject::new(&HostType::class("Dropped").build());
    let wrapped = bridge.wrap(&obj).unwrap();
    assert!(handles::live_count_for(owner) > 0);

    drop(bridge);
    assert_eq!(handles::live_count_for(owner), 0);
    drop(wrapped);
}

#[test]
fn test_bridges_are_isolated() {
    let first = Bridge::start().unwrap();
    let second = Bridge::start().unwrap();
    let ty = HostType::class("Shared").build();

    let a = first.class_of(&ty).unwrap();
    let b = second.class_of(&ty).unwrap();
    assert_ne!(a.addr(), b.addr());

    first.shutdown().unwrap();
    assert!(second.classes().lookup(&ty).is_some());
    assert!(second.class_of(&ty).is_ok());
    second.shutdown().unwrap();
}
