//! dict - insertion-ordered mapping
//!
//! Entries live in a vector; lookups are linear. Keys compare by identity,
//! then by value for strings and numbers, which is all type dicts and
//! instance dicts need.

use super::payload::{payload, payload_clear, payload_dealloc, payload_traverse, set_payload, Payload};
use super::{dict_type, numbers, string};
use crate::errors::{self, ptr_or_null, status, ExcKind, RtResult};
use crate::layout::offsets;
use crate::object::{decref, incref, new_ref, type_of, ObjPtr};
use crate::protocol;
use crate::typeobj::{self, set};
use std::ffi::c_int;
use std::ptr;

/// New empty dict
///
/// # Safety
/// The global lock must be held.
pub unsafe fn new() -> RtResult<ObjPtr> {
    let obj = typeobj::generic_alloc(dict_type(), 0)?;
    set_payload(obj, Payload::Dict(Vec::new()));
    Ok(obj)
}

/// # Safety
/// `obj` must be a live object.
pub unsafe fn is_dict(obj: ObjPtr) -> bool {
    !obj.is_null() && typeobj::is_subtype(type_of(obj), dict_type())
}

unsafe fn entries<'a>(obj: ObjPtr) -> Option<&'a mut Vec<(ObjPtr, ObjPtr)>> {
    if !is_dict(obj) {
        return None;
    }
    match payload(obj) {
        Some(Payload::Dict(entries)) => Some(entries),
        _ => None,
    }
}

unsafe fn keys_equal(a: ObjPtr, b: ObjPtr) -> bool {
    if a == b {
        return true;
    }
    if let (Some(x), Some(y)) = (string::as_str(a), string::as_str(b)) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (numbers::as_i64(a), numbers::as_i64(b)) {
        return x == y;
    }
    matches!((numbers::as_f64(a), numbers::as_f64(b)), (Some(x), Some(y)) if x == y)
}

unsafe fn position(entries: &[(ObjPtr, ObjPtr)], key: ObjPtr) -> Option<usize> {
    entries.iter().position(|(k, _)| keys_equal(*k, key))
}

fn position_str(entries: &[(ObjPtr, ObjPtr)], key: &str) -> Option<usize> {
    entries
        .iter()
        .position(|(k, _)| unsafe { string::as_str(*k) } == Some(key))
}

/// Number of entries
///
/// # Safety
/// `obj` must be a live dict.
pub unsafe fn len(obj: ObjPtr) -> usize {
    entries(obj).map(|e| e.len()).unwrap_or(0)
}

/// Value for `key` (borrowed, null if absent)
///
/// # Safety
/// `obj` must be a live dict.
pub unsafe fn get_item(obj: ObjPtr, key: ObjPtr) -> ObjPtr {
    match entries(obj) {
        Some(e) => position(e, key).map(|i| e[i].1).unwrap_or(ptr::null_mut()),
        None => ptr::null_mut(),
    }
}

/// Value for a string key (borrowed, null if absent)
///
/// # Safety
/// `obj` must be a live dict.
pub unsafe fn get_item_str(obj: ObjPtr, key: &str) -> ObjPtr {
    match entries(obj) {
        Some(e) => position_str(e, key).map(|i| e[i].1).unwrap_or(ptr::null_mut()),
        None => ptr::null_mut(),
    }
}

/// Insert or replace; both key and value are borrowed
///
/// # Safety
/// `obj` must be a live dict; the global lock must be held.
pub unsafe fn set_item(obj: ObjPtr, key: ObjPtr, value: ObjPtr) -> RtResult<()> {
    let Some(e) = entries(obj) else {
        return Err(errors::raise(ExcKind::TypeError, "expected dict"));
    };
    incref(value);
    match position(e, key) {
        Some(i) => {
            let old = std::mem::replace(&mut e[i].1, value);
            decref(old);
        }
        None => {
            incref(key);
            e.push((key, value));
        }
    }
    Ok(())
}

/// Insert or replace under a string key
///
/// # Safety
/// `obj` must be a live dict; the global lock must be held.
pub unsafe fn set_item_str(obj: ObjPtr, key: &str, value: ObjPtr) -> RtResult<()> {
    let Some(e) = entries(obj) else {
        return Err(errors::raise(ExcKind::TypeError, "expected dict"));
    };
    if let Some(i) = position_str(e, key) {
        incref(value);
        let old = std::mem::replace(&mut e[i].1, value);
        decref(old);
        return Ok(());
    }
    let key_obj = string::new(key)?;
    let result = set_item(obj, key_obj, value);
    decref(key_obj);
    result
}

/// Remove `key`; false if it was absent
///
/// # Safety
/// `obj` must be a live dict; the global lock must be held.
pub unsafe fn del_item(obj: ObjPtr, key: ObjPtr) -> bool {
    let Some(e) = entries(obj) else { return false };
    match position(e, key) {
        Some(i) => {
            let (k, v) = e.remove(i);
            decref(k);
            decref(v);
            true
        }
        None => false,
    }
}

/// Remove a string key; false if it was absent
///
/// # Safety
/// `obj` must be a live dict; the global lock must be held.
pub unsafe fn del_item_str(obj: ObjPtr, key: &str) -> bool {
    let Some(e) = entries(obj) else { return false };
    match position_str(e, key) {
        Some(i) => {
            let (k, v) = e.remove(i);
            decref(k);
            decref(v);
            true
        }
        None => false,
    }
}

/// Snapshot of the entries (borrowed pointers)
///
/// # Safety
/// `obj` must be a live dict.
pub unsafe fn items(obj: ObjPtr) -> Vec<(ObjPtr, ObjPtr)> {
    entries(obj).map(|e| e.clone()).unwrap_or_default()
}

/// String keys in insertion order
///
/// # Safety
/// `obj` must be a live dict.
pub unsafe fn str_keys(obj: ObjPtr) -> Vec<String> {
    items(obj)
        .into_iter()
        .filter_map(|(k, _)| string::as_str(k).map(str::to_string))
        .collect()
}

unsafe extern "C" fn dict_length(obj: ObjPtr) -> isize {
    len(obj) as isize
}

unsafe extern "C" fn dict_subscript(obj: ObjPtr, key: ObjPtr) -> ObjPtr {
    let value = get_item(obj, key);
    if value.is_null() {
        let shown = protocol::repr_string(key).unwrap_or_else(|_| {
            errors::clear();
            String::from("?")
        });
        errors::raise(ExcKind::KeyError, &shown);
        return ptr::null_mut();
    }
    new_ref(value)
}

unsafe extern "C" fn dict_ass_subscript(obj: ObjPtr, key: ObjPtr, value: ObjPtr) -> c_int {
    if value.is_null() {
        if del_item(obj, key) {
            return 0;
        }
        let shown = protocol::repr_string(key).unwrap_or_default();
        errors::raise(ExcKind::KeyError, &shown);
        return -1;
    }
    status(set_item(obj, key, value))
}

unsafe extern "C" fn dict_contains(obj: ObjPtr, key: ObjPtr) -> c_int {
    (!get_item(obj, key).is_null()) as c_int
}

unsafe extern "C" fn dict_repr(obj: ObjPtr) -> ObjPtr {
    let mut parts = Vec::new();
    for (k, v) in items(obj) {
        let (Ok(k), Ok(v)) = (protocol::repr_string(k), protocol::repr_string(v)) else {
            return ptr::null_mut();
        };
        parts.push(format!("{k}: {v}"));
    }
    ptr_or_null(string::new(&format!("{{{}}}", parts.join(", "))))
}

pub(super) unsafe fn configure(tp: ObjPtr) {
    let off = offsets();
    set(tp, off.tp_dealloc, payload_dealloc as usize);
    set(tp, off.tp_traverse, payload_traverse as usize);
    set(tp, off.tp_clear, payload_clear as usize);
    set(tp, off.tp_repr, dict_repr as usize);
    set(tp, off.sq_contains, dict_contains as usize);
    set(tp, off.mp_length, dict_length as usize);
    set(tp, off.mp_subscript, dict_subscript as usize);
    set(tp, off.mp_ass_subscript, dict_ass_subscript as usize);
}
