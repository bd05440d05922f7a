use super::*;
use crate::test_runtime;

#[test]
fn test_raise_and_fetch() {
    let _gil = test_runtime();
    let err = raise(ExcKind::ValueError, "bad value");
    assert_eq!(err, ErrorSet);
    assert!(occurred());

    let state = fetch().unwrap();
    assert!(!occurred());
    assert_eq!(state.type_name(), "ValueError");
    assert_eq!(state.message(), "bad value");
    assert!(state.matches(ExcKind::Exception));
    assert!(!state.matches(ExcKind::TypeError));
    unsafe { state.release() };
}

#[test]
fn test_restore_replaces_pending() {
    let _gil = test_runtime();
    raise(ExcKind::TypeError, "first");
    raise(ExcKind::KeyError, "second");
    let state = fetch().unwrap();
    assert_eq!(state.message(), "second");
    unsafe { state.release() };
}

#[test]
fn test_fetch_restore_preserves_state() {
    let _gil = test_runtime();
    raise(ExcKind::RuntimeError, "outer");
    let saved = fetch();
    assert!(!occurred());

    raise(ExcKind::IndexError, "inner");
    clear();

    restore(saved);
    assert_eq!(unsafe { typeobj::name(occurred_type()) }, "RuntimeError");
    clear();
}

#[test]
fn test_traceback_travels_with_value() {
    let _gil = test_runtime();
    unsafe {
        set_with_traceback(ExcKind::Exception.type_object(), "boom", Some("at Main()"));
    }
    let state = fetch().unwrap();
    assert_eq!(state.traceback().as_deref(), Some("at Main()"));
    unsafe { state.release() };
}

#[test]
fn test_check_ptr_without_error_is_system_error() {
    let _gil = test_runtime();
    assert!(check_ptr(ptr::null_mut()).is_err());
    let state = fetch().unwrap();
    assert!(state.matches(ExcKind::SystemError));
    unsafe { state.release() };
}

#[test]
fn test_status_mapping() {
    assert_eq!(status(Ok(())), 0);
    assert_eq!(status(Err(ErrorSet)), -1);
    assert!(ptr_or_null(Err(ErrorSet)).is_null());
}

#[test]
fn test_kind_names() {
    for kind in ExcKind::ALL {
        assert_eq!(ExcKind::from_name(kind.name()), Some(kind));
    }
    assert_eq!(ExcKind::from_name("NoSuchError"), None);
}
