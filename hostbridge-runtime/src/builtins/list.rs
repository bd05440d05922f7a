//! list - mutable sequence

use super::payload::{payload, payload_clear, payload_dealloc, payload_traverse, set_payload, Payload};
use super::tuple::normalize_index;
use super::{list_type, numbers, string};
use crate::errors::{self, ptr_or_null, ExcKind, RtResult};
use crate::layout::offsets;
use crate::object::{decref, incref, new_ref, type_of, ObjPtr};
use crate::protocol::{self, CompareOp};
use crate::typeobj::{self, set};
use std::ffi::c_int;
use std::ptr;

/// New list taking ownership of `items`
///
/// # Safety
/// Every item must be an owned reference; the global lock must be held.
pub unsafe fn new(items: Vec<ObjPtr>) -> RtResult<ObjPtr> {
    match typeobj::generic_alloc(list_type(), 0) {
        Ok(obj) => {
            set_payload(obj, Payload::List(items));
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

/// # Safety
/// `obj` must be a live object.
pub unsafe fn is_list(obj: ObjPtr) -> bool {
    !obj.is_null() && typeobj::is_subtype(type_of(obj), list_type())
}

unsafe fn storage<'a>(obj: ObjPtr) -> Option<&'a mut Vec<ObjPtr>> {
    if !is_list(obj) {
        return None;
    }
    match payload(obj) {
        Some(Payload::List(items)) => Some(items),
        _ => None,
    }
}

/// Append a borrowed reference
///
/// # Safety
/// `obj` must be a live list; the global lock must be held.
pub unsafe fn append(obj: ObjPtr, item: ObjPtr) -> RtResult<()> {
    let Some(items) = storage(obj) else {
        return Err(errors::raise(ExcKind::TypeError, "expected list"));
    };
    incref(item);
    items.push(item);
    Ok(())
}

/// Snapshot of the items (borrowed pointers)
///
/// # Safety
/// `obj` must be a live list.
pub unsafe fn items(obj: ObjPtr) -> Vec<ObjPtr> {
    storage(obj).map(|v| v.clone()).unwrap_or_default()
}

unsafe fn index_of(obj: ObjPtr, key: ObjPtr) -> RtResult<usize> {
    let Some(index) = numbers::as_i64(key) else {
        return Err(errors::raise(ExcKind::TypeError, "list indices must be integers"));
    };
    let len = storage(obj).map(|v| v.len()).unwrap_or(0);
    normalize_index(index, len)
        .ok_or_else(|| errors::raise(ExcKind::IndexError, "list index out of range"))
}

unsafe extern "C" fn list_length(obj: ObjPtr) -> isize {
    storage(obj).map(|v| v.len() as isize).unwrap_or(-1)
}

unsafe extern "C" fn list_subscript(obj: ObjPtr, key: ObjPtr) -> ObjPtr {
    match (index_of(obj, key), storage(obj)) {
        (Ok(i), Some(items)) => new_ref(items[i]),
        _ => ptr::null_mut(),
    }
}

unsafe extern "C" fn list_ass_subscript(obj: ObjPtr, key: ObjPtr, value: ObjPtr) -> c_int {
    let Ok(i) = index_of(obj, key) else { return -1 };
    let Some(items) = storage(obj) else { return -1 };
    let old = if value.is_null() {
        items.remove(i)
    } else {
        incref(value);
        std::mem::replace(&mut items[i], value)
    };
    decref(old);
    0
}

unsafe extern "C" fn list_contains(obj: ObjPtr, item: ObjPtr) -> c_int {
    for candidate in items(obj) {
        match protocol::richcompare_bool(candidate, item, CompareOp::Eq) {
            Ok(true) => return 1,
            Ok(false) => {}
            Err(_) => return -1,
        }
    }
    0
}

unsafe extern "C" fn list_repr(obj: ObjPtr) -> ObjPtr {
    let mut parts = Vec::new();
    for item in items(obj) {
        match protocol::repr_string(item) {
            Ok(text) => parts.push(text),
            Err(_) => return ptr::null_mut(),
        }
    }
    ptr_or_null(string::new(&format!("[{}]", parts.join(", "))))
}

pub(super) unsafe fn configure(tp: ObjPtr) {
    let off = offsets();
    set(tp, off.tp_dealloc, payload_dealloc as usize);
    set(tp, off.tp_traverse, payload_traverse as usize);
    set(tp, off.tp_clear, payload_clear as usize);
    set(tp, off.tp_repr, list_repr as usize);
    set(tp, off.sq_length, list_length as usize);
    set(tp, off.sq_contains, list_contains as usize);
    set(tp, off.mp_length, list_length as usize);
    set(tp, off.mp_subscript, list_subscript as usize);
    set(tp, off.mp_ass_subscript, list_ass_subscript as usize);
}
