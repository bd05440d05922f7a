use super::*;
use crate::errors::{self, ExcKind};
use crate::object::{decref, refcount};
use crate::protocol::{self, CompareOp};
use crate::test_runtime;

#[test]
fn test_singletons() {
    let _gil = test_runtime();
    unsafe {
        assert!(is_none(none()));
        let t = bool_from(true);
        assert!(protocol::is_true(t).unwrap());
        decref(t);
        assert!(!protocol::is_true(none()).unwrap());
        assert_eq!(protocol::repr_string(none()).unwrap(), "None");
    }
}

#[test]
fn test_int_arithmetic() {
    let _gil = test_runtime();
    unsafe {
        let a = numbers::int_new(6).unwrap();
        let b = numbers::int_new(7).unwrap();
        let product = protocol::multiply(a, b).unwrap();
        assert_eq!(numbers::as_i64(product), Some(42));

        let quotient = protocol::true_divide(a, b).unwrap();
        assert!(numbers::is_float(quotient));

        for obj in [a, b, product, quotient] {
            decref(obj);
        }
    }
}

#[test]
fn test_int_overflow_raises() {
    let _gil = test_runtime();
    unsafe {
        let a = numbers::int_new(i64::MAX).unwrap();
        let b = numbers::int_new(1).unwrap();
        assert!(protocol::add(a, b).is_err());
        let err = errors::fetch().unwrap();
        assert!(err.matches(ExcKind::OverflowError));
        err.release();
        decref(a);
        decref(b);
    }
}

#[test]
fn test_mixed_operands_raise_type_error() {
    let _gil = test_runtime();
    unsafe {
        let a = numbers::int_new(1).unwrap();
        let s = string::new("x").unwrap();
        assert!(protocol::add(a, s).is_err());
        let err = errors::fetch().unwrap();
        assert!(err.message().contains("unsupported operand"));
        err.release();
        decref(a);
        decref(s);
    }
}

#[test]
fn test_string_compare_and_concat() {
    let _gil = test_runtime();
    unsafe {
        let a = string::new("ab").unwrap();
        let b = string::new("cd").unwrap();
        assert!(protocol::richcompare_bool(a, b, CompareOp::Lt).unwrap());
        let joined = protocol::add(a, b).unwrap();
        assert_eq!(string::as_str(joined), Some("abcd"));
        assert_eq!(protocol::len(joined).unwrap(), 4);
        assert_eq!(protocol::repr_string(a).unwrap(), "'ab'");
        for obj in [a, b, joined] {
            decref(obj);
        }
    }
}

#[test]
fn test_string_rejects_embedded_nul() {
    let _gil = test_runtime();
    unsafe {
        assert!(string::new("a\0b").is_err());
        errors::clear();
    }
}

#[test]
fn test_tuple_indexing() {
    let _gil = test_runtime();
    unsafe {
        let one = numbers::int_new(1).unwrap();
        let two = numbers::int_new(2).unwrap();
        let t = tuple::from_borrowed(&[one, two]).unwrap();
        assert_eq!(refcount(one), 2);

        let idx = numbers::int_new(-1).unwrap();
        let last = protocol::getitem(t, idx).unwrap();
        assert_eq!(last, two);
        decref(last);

        let bad = numbers::int_new(5).unwrap();
        assert!(protocol::getitem(t, bad).is_err());
        let err = errors::fetch().unwrap();
        assert!(err.matches(ExcKind::IndexError));
        err.release();

        assert_eq!(protocol::repr_string(t).unwrap(), "(1, 2)");
        decref(t);
        assert_eq!(refcount(one), 1);
        for obj in [one, two, idx, bad] {
            decref(obj);
        }
    }
}

#[test]
fn test_list_mutation() {
    let _gil = test_runtime();
    unsafe {
        let l = list::new(Vec::new()).unwrap();
        let v = numbers::int_new(3).unwrap();
        list::append(l, v).unwrap();
        list::append(l, v).unwrap();
        assert_eq!(protocol::len(l).unwrap(), 2);

        let zero = numbers::int_new(0).unwrap();
        protocol::delitem(l, zero).unwrap();
        assert_eq!(list::items(l), vec![v]);
        assert!(protocol::contains(l, v).unwrap());

        decref(l);
        assert_eq!(refcount(v), 1);
        decref(v);
        decref(zero);
    }
}

#[test]
fn test_dict_string_keys() {
    let _gil = test_runtime();
    unsafe {
        let d = dict::new().unwrap();
        let v = numbers::int_new(10).unwrap();
        dict::set_item_str(d, "a", v).unwrap();
        dict::set_item_str(d, "a", v).unwrap();
        assert_eq!(dict::len(d), 1);
        assert_eq!(dict::get_item_str(d, "a"), v);

        let key = string::new("a").unwrap();
        assert_eq!(dict::get_item(d, key), v);
        assert!(dict::del_item(d, key));
        assert!(!dict::del_item_str(d, "a"));

        let missing = protocol::getitem(d, key);
        assert!(missing.is_err());
        let err = errors::fetch().unwrap();
        assert!(err.matches(ExcKind::KeyError));
        err.release();

        for obj in [d, v, key] {
            decref(obj);
        }
    }
}

#[test]
fn test_closure_function_call() {
    let _gil = test_runtime();
    unsafe {
        let f = function::new_closure("count", |args| numbers::int_new(args.len() as i64)).unwrap();
        let a = none_ref();
        let result = protocol::call(f, &[a, a]).unwrap();
        assert_eq!(numbers::as_i64(result), Some(2));
        assert!(protocol::repr_string(f).unwrap().contains("count"));
        for obj in [f, a, result] {
            decref(obj);
        }
    }
}

unsafe extern "C" fn echo_first(_receiver: ObjPtr, arg: ObjPtr) -> ObjPtr {
    new_ref(arg)
}

#[test]
fn test_method_table_becomes_descriptors() {
    let _gil = test_runtime();
    unsafe {
        let name = std::ffi::CString::new("echo").unwrap();
        let table = Box::leak(Box::new([
            function::MethodDef {
                ml_name: name.as_ptr(),
                ml_meth: Some(echo_first),
                ml_flags: function::METH_O,
                ml_doc: std::ptr::null(),
            },
            function::MethodDef::SENTINEL,
        ]));

        let off = offsets();
        let tp = typeobj::alloc_type_object(type_type()).unwrap();
        typeobj::set_heap_name(tp, "Echoer").unwrap();
        set(tp, off.tp_methods, table.as_ptr() as usize);
        set(tp, off.tp_dealloc, typeobj::subtype_dealloc as usize);
        typeobj::set_flags(tp, TypeFlags::HEAPTYPE | TypeFlags::BASETYPE);
        typeobj::type_ready(tp).unwrap();

        let obj = protocol::call(tp, &[]).unwrap();
        let arg = numbers::int_new(9).unwrap();
        let result = protocol::call_method(obj, "echo", &[arg]).unwrap();
        assert_eq!(result, arg);

        for o in [result, arg, obj, tp] {
            decref(o);
        }
        drop(name);
    }
}

#[test]
fn test_exception_instances() {
    let _gil = test_runtime();
    unsafe {
        let tp = ExcKind::KeyError.type_object();
        assert!(typeobj::is_subtype(tp, ExcKind::Exception.type_object()));
        let msg = string::new("missing").unwrap();
        let exc = protocol::call(tp, &[msg]).unwrap();
        assert_eq!(exceptions::message(exc).as_deref(), Some("missing"));
        assert_eq!(protocol::str_string(exc).unwrap(), "missing");
        assert_eq!(protocol::repr_string(exc).unwrap(), "KeyError('missing')");
        decref(exc);
        decref(msg);
    }
}

#[test]
fn test_module_namespace() {
    let _gil = test_runtime();
    unsafe {
        let m = module::new("bridge").unwrap();
        assert_eq!(module::name(m).as_deref(), Some("bridge"));
        let n = protocol::getattr(m, "__name__").unwrap();
        assert_eq!(string::as_str(n), Some("bridge"));
        assert_eq!(protocol::repr_string(m).unwrap(), "<module 'bridge'>");
        decref(n);
        decref(m);
    }
}
