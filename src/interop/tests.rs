use super::*;
use crate::test_support::runtime;
use hostbridge_runtime::builtins::{self, string};
use hostbridge_runtime::layout::offsets;
use hostbridge_runtime::object::decref;
use hostbridge_runtime::typeobj;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

unsafe extern "C" fn fixed_repr(_obj: ObjPtr) -> ObjPtr {
    guard_object("tp_repr", || Ok(string::new("fixed")?))
}

unsafe extern "C" fn failing_repr(_obj: ObjPtr) -> ObjPtr {
    guard_object("tp_repr", || Err(BridgeError::Attribute("nope".into())))
}

unsafe extern "C" fn panicking_repr(_obj: ObjPtr) -> ObjPtr {
    guard_object("tp_repr", || panic!("boom"))
}

unsafe extern "C" fn minus_one_hash(_obj: ObjPtr) -> isize {
    guard_hash("tp_hash", || Ok(-1))
}

#[test]
fn test_prototypes_by_slot_name() {
    assert_eq!(prototype_for("tp_dealloc"), Some(Prototype::Destructor));
    assert_eq!(prototype_for("mp_subscript"), Some(Prototype::Binary));
    assert_eq!(prototype_for("tp_new"), Some(Prototype::Ternary));
    assert_eq!(prototype_for("bf_getbuffer"), Some(Prototype::GetBuffer));
    assert_eq!(prototype_for("tp_nonsense"), None);
}

#[test]
fn test_every_layout_slot_has_a_prototype() {
    for (name, _) in offsets().slot_offsets() {
        assert!(prototype_for(name).is_some(), "{} has no prototype", name);
    }
}

#[test]
fn test_thunk_is_created_once_per_key() {
    let a = thunk::get_or_create("interop_test", "tp_repr", SlotFn::Unary(fixed_repr)).unwrap();
    let b = thunk::get_or_create("interop_test", "tp_repr", SlotFn::Unary(fixed_repr)).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.key, "interop_test.tp_repr");
    assert_eq!(a.address(), fixed_repr as usize);
}

#[test]
fn test_thunk_rejects_unknown_slot_and_wrong_prototype() {
    let unknown = thunk::get_or_create("interop_test", "tp_bogus", SlotFn::Unary(fixed_repr));
    assert!(matches!(unknown, Err(BridgeError::Construction { .. })));

    let wrong = thunk::get_or_create("interop_test", "tp_hash", SlotFn::Unary(fixed_repr));
    assert!(matches!(wrong, Err(BridgeError::Construction { .. })));
}

#[test]
fn test_guard_turns_error_into_indicator() {
    let _gil = runtime();
    let result = unsafe { failing_repr(builtins::none()) };
    assert!(result.is_null());
    let state = errors::fetch().unwrap();
    assert!(state.matches(ExcKind::AttributeError));
    assert!(state.message().contains("nope"));
    unsafe { state.release() };
}

#[test]
fn test_guard_catches_panics() {
    let _gil = runtime();
    let result = unsafe { panicking_repr(builtins::none()) };
    assert!(result.is_null());
    let state = errors::fetch().unwrap();
    assert!(state.matches(ExcKind::SystemError));
    assert!(state.message().contains("boom"));
    unsafe { state.release() };
}

#[test]
fn test_hash_guard_never_returns_minus_one() {
    let _gil = runtime();
    assert_eq!(unsafe { minus_one_hash(builtins::none()) }, -2);
    assert!(!errors::occurred());
}

#[test]
fn test_defaults_are_cached_per_base() {
    let _gil = runtime();
    let defaults = SlotDefaults::new();
    let object = builtins::object_type();
    let first = unsafe { defaults.for_base(object) }.unwrap();
    let second = unsafe { defaults.for_base(object) }.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(defaults.len(), 1);
    assert_eq!(first["tp_dealloc"], typeobj::subtype_dealloc as usize);
}

#[test]
fn test_holder_reset_restores_defaults_once() {
    let _gil = runtime();
    let defaults = SlotDefaults::new();
    let object = builtins::object_type();
    unsafe {
        let tp = typeobj::new_heap_type("HolderTarget", object).unwrap();
        let table = defaults.for_base(object).unwrap();
        let holder = SlotsHolder::new(tp, table, None, &[]);

        let thunk = thunk::get_or_create("holder_test", "tp_repr", SlotFn::Unary(fixed_repr)).unwrap();
        holder.set("tp_repr", thunk).unwrap();
        let repr_offset = offsets().tp_repr;
        assert_eq!(typeobj::get(tp, repr_offset), fixed_repr as usize);
        assert!(holder.is_set("tp_repr"));

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        holder.add_deallocator(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(holder.reset(), 1);
        assert_eq!(typeobj::get(tp, repr_offset), holder.default_for("tp_repr"));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        assert_eq!(holder.reset(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(holder.is_reset());

        let thunk = thunk::get_or_create("holder_test", "tp_repr", SlotFn::Unary(fixed_repr)).unwrap();
        assert!(holder.set("tp_repr", thunk).is_err());
        decref(tp);
    }
}

#[test]
fn test_holder_reset_skips_preserved_slots() {
    let _gil = runtime();
    unsafe {
        let object = builtins::object_type();
        let tp = typeobj::new_heap_type("PreservedTarget", object).unwrap();
        let table = SlotDefaults::of_type(tp);
        let holder = SlotsHolder::new(tp, table, None, &["tp_repr"]);
        let thunk = thunk::get_or_create("holder_test", "tp_repr", SlotFn::Unary(fixed_repr)).unwrap();
        holder.set("tp_repr", thunk).unwrap();
        assert_eq!(holder.reset(), 0);
        assert_eq!(typeobj::get(tp, offsets().tp_repr), fixed_repr as usize);
        decref(tp);
    }
}
