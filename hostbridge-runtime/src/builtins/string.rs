//! str - immutable UTF-8 text backed by a C string

use super::payload::{payload, payload_dealloc, set_payload, Payload};
use super::{bool_from, not_implemented, str_type};
use crate::errors::{self, ptr_or_null, ExcKind, RtResult};
use crate::layout::offsets;
use crate::object::{new_ref, type_of, ObjPtr};
use crate::protocol::CompareOp;
use crate::typeobj::{self, set};
use std::ffi::{c_char, c_int, CString};

/// New str object
///
/// # Safety
/// The global lock must be held.
pub unsafe fn new(text: &str) -> RtResult<ObjPtr> {
    let c_text = CString::new(text)
        .map_err(|_| errors::raise(ExcKind::ValueError, "embedded null character"))?;
    let obj = typeobj::generic_alloc(str_type(), 0)?;
    set_payload(obj, Payload::Str(c_text));
    Ok(obj)
}

/// Borrow the text of a str object (None for other objects)
///
/// # Safety
/// `obj` must be null or a live object; the borrow must not outlive it.
pub unsafe fn as_str<'a>(obj: ObjPtr) -> Option<&'a str> {
    if obj.is_null() || !typeobj::is_subtype(type_of(obj), str_type()) {
        return None;
    }
    match payload(obj) {
        Some(Payload::Str(text)) => text.to_str().ok(),
        _ => None,
    }
}

/// Pointer to the NUL-terminated buffer of a str object
///
/// Stable for the lifetime of the object.
///
/// # Safety
/// `obj` must be a live str object.
pub unsafe fn as_c_ptr(obj: ObjPtr) -> *const c_char {
    match payload(obj) {
        Some(Payload::Str(text)) => text.as_ptr(),
        _ => std::ptr::null(),
    }
}

/// # Safety
/// `obj` must be a live object.
pub unsafe fn is_str(obj: ObjPtr) -> bool {
    as_str(obj).is_some()
}

unsafe extern "C" fn str_repr(obj: ObjPtr) -> ObjPtr {
    match as_str(obj) {
        Some(text) => ptr_or_null(new(&format!("'{}'", text.replace('\'', "\\'")))),
        None => ptr_or_null(Err(errors::raise(ExcKind::TypeError, "expected str"))),
    }
}

unsafe extern "C" fn str_str(obj: ObjPtr) -> ObjPtr {
    new_ref(obj)
}

unsafe extern "C" fn str_hash(obj: ObjPtr) -> isize {
    // FNV-1a, stable across runs
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in as_str(obj).unwrap_or_default().bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash >> 1) as isize
}

unsafe extern "C" fn str_length(obj: ObjPtr) -> isize {
    as_str(obj).map(|s| s.chars().count() as isize).unwrap_or(-1)
}

unsafe extern "C" fn str_contains(obj: ObjPtr, item: ObjPtr) -> c_int {
    match (as_str(obj), as_str(item)) {
        (Some(hay), Some(needle)) => hay.contains(needle) as c_int,
        _ => {
            errors::raise(ExcKind::TypeError, "'in <string>' requires string as left operand");
            -1
        }
    }
}

unsafe extern "C" fn str_richcompare(a: ObjPtr, b: ObjPtr, op: c_int) -> ObjPtr {
    match (as_str(a), as_str(b), CompareOp::from_raw(op)) {
        (Some(x), Some(y), Some(op)) => bool_from(op.matches(x.cmp(y))),
        _ => not_implemented(),
    }
}

unsafe extern "C" fn str_concat(a: ObjPtr, b: ObjPtr) -> ObjPtr {
    match (as_str(a), as_str(b)) {
        (Some(x), Some(y)) => ptr_or_null(new(&format!("{x}{y}"))),
        _ => not_implemented(),
    }
}

pub(super) unsafe fn configure(tp: ObjPtr) {
    let off = offsets();
    set(tp, off.tp_dealloc, payload_dealloc as usize);
    set(tp, off.tp_repr, str_repr as usize);
    set(tp, off.tp_str, str_str as usize);
    set(tp, off.tp_hash, str_hash as usize);
    set(tp, off.tp_richcompare, str_richcompare as usize);
    set(tp, off.sq_length, str_length as usize);
    set(tp, off.sq_contains, str_contains as usize);
    set(tp, off.nb_add, str_concat as usize);
}
