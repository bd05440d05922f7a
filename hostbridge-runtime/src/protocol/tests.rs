use super::*;
use crate::builtins::{self, list, numbers};
use crate::test_runtime;

#[test]
fn test_compare_op_tables() {
    assert_eq!(CompareOp::from_raw(2), Some(CompareOp::Eq));
    assert_eq!(CompareOp::from_raw(9), None);
    assert_eq!(CompareOp::Lt.reflected(), CompareOp::Gt);
    assert_eq!(CompareOp::Ne.reflected(), CompareOp::Ne);
    assert!(CompareOp::Le.matches(Ordering::Equal));
    assert!(!CompareOp::Gt.matches(Ordering::Less));
}

#[test]
fn test_mixed_numeric_compare() {
    let _gil = test_runtime();
    unsafe {
        let i = numbers::int_new(2).unwrap();
        let f = numbers::float_new(2.5).unwrap();
        assert!(richcompare_bool(i, f, CompareOp::Lt).unwrap());
        assert!(richcompare_bool(f, i, CompareOp::Ge).unwrap());
        decref(i);
        decref(f);
    }
}

#[test]
fn test_unordered_types_raise() {
    let _gil = test_runtime();
    unsafe {
        let i = numbers::int_new(1).unwrap();
        let s = string::new("1").unwrap();
        assert!(!richcompare_bool(i, s, CompareOp::Eq).unwrap());
        assert!(richcompare(i, s, CompareOp::Lt).is_err());
        let err = errors::fetch().unwrap();
        assert!(err.message().contains("not supported between instances"));
        err.release();
        decref(i);
        decref(s);
    }
}

#[test]
fn test_not_callable() {
    let _gil = test_runtime();
    unsafe {
        let i = numbers::int_new(1).unwrap();
        assert!(call(i, &[]).is_err());
        let err = errors::fetch().unwrap();
        assert_eq!(err.message(), "'int' object is not callable");
        err.release();
        decref(i);
    }
}

#[test]
fn test_isinstance_without_hooks() {
    let _gil = test_runtime();
    unsafe {
        let b = builtins::bool_from(true);
        assert!(is_instance(b, builtins::int_type()).unwrap());
        assert!(!is_instance(b, builtins::str_type()).unwrap());
        assert!(is_subclass(builtins::bool_type(), builtins::object_type()).unwrap());
        decref(b);
    }
}

#[test]
fn test_referents_of_container() {
    let _gil = test_runtime();
    unsafe {
        let a = numbers::int_new(1).unwrap();
        let l = list::new(vec![crate::object::new_ref(a)]).unwrap();
        assert_eq!(referents(l), vec![a]);
        clear(l).unwrap();
        assert!(referents(l).is_empty());
        decref(l);
        decref(a);
    }
}

#[test]
fn test_buffer_requires_exporter() {
    let _gil = test_runtime();
    unsafe {
        let i = numbers::int_new(1).unwrap();
        assert!(!has_buffer(i));
        assert!(get_buffer(i, BUF_FULL_RO).is_err());
        errors::clear();
        decref(i);
    }
}

#[test]
fn test_truthiness() {
    let _gil = test_runtime();
    unsafe {
        let zero = numbers::int_new(0).unwrap();
        let empty = list::new(Vec::new()).unwrap();
        let text = string::new("x").unwrap();
        assert!(!is_true(zero).unwrap());
        assert!(!is_true(empty).unwrap());
        assert!(is_true(text).unwrap());
        for obj in [zero, empty, text] {
            decref(obj);
        }
    }
}
