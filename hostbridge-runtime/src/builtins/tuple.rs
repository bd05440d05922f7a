//! tuple - immutable sequence

use super::numbers;
use super::payload::{payload, payload_clear, payload_dealloc, payload_traverse, set_payload, Payload};
use super::{bool_from, not_implemented, tuple_type};
use crate::errors::{self, ptr_or_null, ExcKind, RtResult};
use crate::layout::offsets;
use crate::object::{decref, incref, new_ref, type_of, ObjPtr};
use crate::protocol::{self, CompareOp};
use crate::typeobj::{self, set};
use std::ffi::c_int;

/// New tuple taking ownership of `items`
///
/// On failure the items are released.
///
/// # Safety
/// Every item must be an owned reference; the global lock must be held.
pub unsafe fn new(items: Vec<ObjPtr>) -> RtResult<ObjPtr> {
    match typeobj::generic_alloc(tuple_type(), 0) {
        Ok(obj) => {
            set_payload(obj, Payload::Tuple(items));
            Ok(obj)
        }
        Err(err) => {
            for item in items {
                decref(item);
            }
            Err(err)
        }
    }
}

/// New tuple from borrowed references
///
/// # Safety
/// Every item must be live; the global lock must be held.
pub unsafe fn from_borrowed(items: &[ObjPtr]) -> RtResult<ObjPtr> {
    for item in items {
        incref(*item);
    }
    new(items.to_vec())
}

/// Borrow the items of a tuple (empty for other objects)
///
/// # Safety
/// `obj` must be null or a live object; the borrow must not outlive it.
pub unsafe fn items<'a>(obj: ObjPtr) -> &'a [ObjPtr] {
    if obj.is_null() || !is_tuple(obj) {
        return &[];
    }
    match payload(obj) {
        Some(Payload::Tuple(items)) => items.as_slice(),
        _ => &[],
    }
}

/// # Safety
/// `obj` must be a live object.
pub unsafe fn is_tuple(obj: ObjPtr) -> bool {
    typeobj::is_subtype(type_of(obj), tuple_type())
}

/// Normalize a possibly negative index against `len`
pub(super) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if index < 0 { index + len } else { index };
    (0..len).contains(&idx).then_some(idx as usize)
}

unsafe extern "C" fn tuple_length(obj: ObjPtr) -> isize {
    items(obj).len() as isize
}

unsafe extern "C" fn tuple_subscript(obj: ObjPtr, key: ObjPtr) -> ObjPtr {
    let Some(index) = numbers::as_i64(key) else {
        errors::raise(ExcKind::TypeError, "tuple indices must be integers");
        return std::ptr::null_mut();
    };
    let values = items(obj);
    match normalize_index(index, values.len()) {
        Some(i) => new_ref(values[i]),
        None => {
            errors::raise(ExcKind::IndexError, "tuple index out of range");
            std::ptr::null_mut()
        }
    }
}

unsafe extern "C" fn tuple_contains(obj: ObjPtr, item: ObjPtr) -> c_int {
    for candidate in items(obj) {
        match protocol::richcompare_bool(*candidate, item, CompareOp::Eq) {
            Ok(true) => return 1,
            Ok(false) => {}
            Err(_) => return -1,
        }
    }
    0
}

unsafe extern "C" fn tuple_richcompare(a: ObjPtr, b: ObjPtr, op: c_int) -> ObjPtr {
    let op = CompareOp::from_raw(op);
    if !is_tuple(b) || !matches!(op, Some(CompareOp::Eq) | Some(CompareOp::Ne)) {
        return not_implemented();
    }
    let (left, right) = (items(a), items(b));
    let mut equal = left.len() == right.len();
    if equal {
        for (x, y) in left.iter().zip(right) {
            match protocol::richcompare_bool(*x, *y, CompareOp::Eq) {
                Ok(true) => {}
                Ok(false) => {
                    equal = false;
                    break;
                }
                Err(_) => return std::ptr::null_mut(),
            }
        }
    }
    bool_from(equal == (op == Some(CompareOp::Eq)))
}

unsafe extern "C" fn tuple_repr(obj: ObjPtr) -> ObjPtr {
    let mut parts = Vec::new();
    for item in items(obj) {
        match protocol::repr_string(*item) {
            Ok(text) => parts.push(text),
            Err(_) => return std::ptr::null_mut(),
        }
    }
    let text = if parts.len() == 1 {
        format!("({},)", parts[0])
    } else {
        format!("({})", parts.join(", "))
    };
    ptr_or_null(super::string::new(&text))
}

pub(super) unsafe fn configure(tp: ObjPtr) {
    let off = offsets();
    set(tp, off.tp_dealloc, payload_dealloc as usize);
    set(tp, off.tp_traverse, payload_traverse as usize);
    set(tp, off.tp_clear, payload_clear as usize);
    set(tp, off.tp_repr, tuple_repr as usize);
    set(tp, off.tp_richcompare, tuple_richcompare as usize);
    set(tp, off.sq_length, tuple_length as usize);
    set(tp, off.sq_contains, tuple_contains as usize);
    set(tp, off.mp_length, tuple_length as usize);
    set(tp, off.mp_subscript, tuple_subscript as usize);
}
