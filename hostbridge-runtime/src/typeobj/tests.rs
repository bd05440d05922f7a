use super::*;
use crate::builtins::{object_type, string};
use crate::object::{refcount, type_of};
use crate::protocol;
use crate::test_runtime;

#[test]
fn test_builtins_are_ready() {
    let _gil = test_runtime();
    unsafe {
        for tp in [
            builtins::object_type(),
            builtins::type_type(),
            builtins::str_type(),
            builtins::int_type(),
            builtins::bool_type(),
        ] {
            assert!(flags(tp).contains(TypeFlags::READY));
        }
        assert_eq!(name(builtins::tuple_type()), "tuple");
        assert!(is_subtype(builtins::bool_type(), builtins::int_type()));
        assert!(!is_subtype(builtins::int_type(), builtins::bool_type()));
    }
}

#[test]
fn test_heap_type_inherits_layout_and_slots() {
    let _gil = test_runtime();
    unsafe {
        let tp = new_heap_type("Point", object_type()).unwrap();
        let off = offsets();
        assert!(is_heap_type(tp));
        assert_eq!(dictoffset(tp), basicsize(object_type()));
        assert_eq!(basicsize(tp), basicsize(object_type()) + WORD);
        assert_eq!(get(tp, off.tp_repr), get(object_type(), off.tp_repr));
        assert_eq!(get(tp, off.tp_dealloc), subtype_dealloc as usize);
        assert_eq!(mro(tp), vec![tp, object_type()]);
        assert!(!dict::get_item_str(type_dict(tp), "__doc__").is_null());
        decref(tp);
    }
}

#[test]
fn test_non_basetype_is_rejected() {
    let _gil = test_runtime();
    unsafe {
        assert!(new_heap_type("MyBool", builtins::bool_type()).is_err());
        let err = errors::fetch().unwrap();
        assert!(err.matches(ExcKind::TypeError));
        assert!(err.message().contains("not an acceptable base type"));
        err.release();
    }
}

#[test]
fn test_int_accepts_subclasses() {
    let _gil = test_runtime();
    unsafe {
        let tp = new_heap_type("MyInt", builtins::int_type()).unwrap();
        assert!(is_subtype(tp, builtins::int_type()));
        decref(tp);
    }
}

#[test]
fn test_instances_keep_their_type_alive() {
    let _gil = test_runtime();
    unsafe {
        let tp = new_heap_type("Holder", object_type()).unwrap();
        let before = refcount(tp);
        let obj = protocol::call(tp, &[]).unwrap();
        assert_eq!(type_of(obj), tp);
        assert_eq!(refcount(tp), before + 1);
        decref(obj);
        assert_eq!(refcount(tp), before);
        decref(tp);
    }
}

#[test]
fn test_instance_attributes() {
    let _gil = test_runtime();
    unsafe {
        let tp = new_heap_type("Bag", object_type()).unwrap();
        let obj = protocol::call(tp, &[]).unwrap();
        let value = string::new("v").unwrap();
        protocol::setattr(obj, "item", value).unwrap();
        let got = protocol::getattr(obj, "item").unwrap();
        assert_eq!(got, value);
        decref(got);

        protocol::delattr(obj, "item").unwrap();
        assert!(!protocol::hasattr(obj, "item").unwrap());
        assert!(!errors::occurred());

        decref(value);
        decref(obj);
        decref(tp);
    }
}

#[test]
fn test_type_attribute_lookup_walks_mro() {
    let _gil = test_runtime();
    unsafe {
        let base_tp = new_heap_type("Base", object_type()).unwrap();
        let child = new_heap_type("Child", base_tp).unwrap();
        let marker = string::new("marker").unwrap();
        protocol::setattr(base_tp, "tag", marker).unwrap();

        assert_eq!(lookup(child, "tag"), marker);
        let got = protocol::getattr(child, "tag").unwrap();
        assert_eq!(got, marker);
        decref(got);

        decref(marker);
        decref(child);
        decref(base_tp);
    }
}

#[test]
fn test_setattr_on_static_type_fails() {
    let _gil = test_runtime();
    unsafe {
        let result = protocol::setattr(builtins::int_type(), "x", builtins::none());
        assert!(result.is_err());
        let err = errors::fetch().unwrap();
        assert!(err.matches(ExcKind::TypeError));
        err.release();
    }
}

#[test]
fn test_type_modified_bumps_version() {
    let _gil = test_runtime();
    unsafe {
        let tp = new_heap_type("Versioned", object_type()).unwrap();
        let before = version_tag(tp);
        type_modified(tp);
        assert!(version_tag(tp) > before);
        decref(tp);
    }
}

#[test]
fn test_gc_type_without_clear_fails_ready() {
    let _gil = test_runtime();
    unsafe {
        let off = offsets();
        let tp = alloc_type_object(builtins::type_type()).unwrap();
        set_heap_name(tp, "Broken").unwrap();
        crate::object::incref(object_type());
        set(tp, off.tp_base, object_type() as usize);
        set(tp, off.tp_dealloc, subtype_dealloc as usize);
        set_flags(tp, TypeFlags::HEAPTYPE | TypeFlags::HAVE_GC);

        assert!(type_ready(tp).is_err());
        assert!(!flags(tp).contains(TypeFlags::READY));
        let err = errors::fetch().unwrap();
        assert!(err.matches(ExcKind::SystemError));
        err.release();
        decref(tp);
    }
}

#[test]
fn test_object_repr_names_type() {
    let _gil = test_runtime();
    unsafe {
        let tp = new_heap_type("Shown", object_type()).unwrap();
        let obj = protocol::call(tp, &[]).unwrap();
        let text = protocol::repr_string(obj).unwrap();
        assert!(text.starts_with("<Shown object at 0x"));
        assert_eq!(protocol::repr_string(tp).unwrap(), "<class 'Shown'>");
        decref(obj);
        decref(tp);
    }
}
