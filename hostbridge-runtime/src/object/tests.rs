use super::*;
use crate::builtins::{self, numbers, string};
use crate::test_runtime;

#[test]
fn test_incref_decref_balance() {
    let _gil = test_runtime();
    unsafe {
        let obj = numbers::int_new(7).unwrap();
        assert_eq!(refcount(obj), 1);
        incref(obj);
        assert_eq!(refcount(obj), 2);
        decref(obj);
        assert_eq!(refcount(obj), 1);
        decref(obj);
    }
}

#[test]
fn test_null_is_ignored() {
    let _gil = test_runtime();
    unsafe {
        incref(std::ptr::null_mut());
        decref(std::ptr::null_mut());
        assert_eq!(refcount(std::ptr::null_mut()), 0);
    }
}

#[test]
fn test_clear_slot_releases_reference() {
    let _gil = test_runtime();
    unsafe {
        let s = string::new("held").unwrap();
        incref(s);
        let mut slot = s;
        clear_slot(&mut slot);
        assert!(slot.is_null());
        assert_eq!(refcount(s), 1);
        decref(s);
    }
}

#[test]
fn test_type_of_builtin_instance() {
    let _gil = test_runtime();
    unsafe {
        let s = string::new("x").unwrap();
        assert_eq!(type_of(s), builtins::str_type());
        decref(s);
    }
}

#[test]
fn test_static_objects_are_immortal() {
    let _gil = test_runtime();
    unsafe {
        let none = builtins::none();
        let before = refcount(none);
        assert!(before >= IMMORTAL_REFCNT);
        let r = builtins::none_ref();
        decref(r);
        assert_eq!(refcount(none), before);
    }
}

#[test]
fn test_word_access_roundtrip() {
    let _gil = test_runtime();
    unsafe {
        let obj = numbers::int_new(1).unwrap();
        assert_eq!(read_word(obj, 0), 1);
        assert_eq!(read_word(obj, crate::layout::WORD), builtins::int_type() as usize);
        decref(obj);
    }
}

#[test]
fn test_shared_ptr() {
    let p = SharedPtr::NULL;
    assert!(p.is_null());
    let q: SharedPtr = (0x1000 as ObjPtr).into();
    assert_eq!(q.addr(), 0x1000);
}
