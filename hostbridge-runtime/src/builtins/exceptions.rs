//! Builtin exception hierarchy
//!
//! `BaseException` carries a message and an optional traceback text in
//! its payload. `Exception` derives from it and every other builtin kind
//! derives from `Exception`.

use super::payload::{payload, payload_dealloc, set_payload, Payload};
use super::{registry, static_type, string, tuple};
use crate::errors::{ptr_or_null, ExcKind, RtResult};
use crate::layout::{offsets, OBJECT_HEADER_SIZE, WORD};
use crate::object::{type_of, ObjPtr};
use crate::protocol;
use crate::typeobj::{self, set, AllocFunc, TypeFlags};
use std::ptr;

/// Native state of an exception instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionState {
    pub message: String,
    pub traceback: Option<String>,
}

/// Allocate the builtin exception types (bootstrap only)
pub(super) unsafe fn allocate(type_t: ObjPtr, object_t: ObjPtr) -> Vec<(ExcKind, ObjPtr)> {
    let flags = TypeFlags::BASETYPE | TypeFlags::BASE_EXC_SUBCLASS;
    let size = OBJECT_HEADER_SIZE + WORD;

    let base_exc = static_type("BaseException", type_t, object_t, size, flags);
    configure_base(base_exc);
    let exception = static_type("Exception", type_t, base_exc, size, flags);

    let mut all = vec![
        (ExcKind::BaseException, base_exc),
        (ExcKind::Exception, exception),
    ];
    for kind in ExcKind::ALL {
        if matches!(kind, ExcKind::BaseException | ExcKind::Exception) {
            continue;
        }
        all.push((kind, static_type(kind.name(), type_t, exception, size, flags)));
    }
    all
}

unsafe fn configure_base(tp: ObjPtr) {
    let off = offsets();
    set(tp, off.tp_dealloc, payload_dealloc as usize);
    set(tp, off.tp_new, exception_new as usize);
    set(tp, off.tp_str, exception_str as usize);
    set(tp, off.tp_repr, exception_repr as usize);
}

/// Type object for a builtin kind (borrowed)
pub fn type_for(kind: ExcKind) -> ObjPtr {
    registry()
        .exceptions
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, tp)| tp.get())
        .unwrap_or(ptr::null_mut())
}

/// # Safety
/// `obj` must be a live object.
pub unsafe fn is_exception(obj: ObjPtr) -> bool {
    !obj.is_null() && typeobj::flags(type_of(obj)).contains(TypeFlags::BASE_EXC_SUBCLASS)
}

/// Give a freshly allocated exception its message and traceback
///
/// # Safety
/// `obj` must be an exception instance without a payload.
pub unsafe fn init_payload(obj: ObjPtr, message: &str, traceback: Option<&str>) {
    set_payload(
        obj,
        Payload::Exception(ExceptionState {
            message: message.to_string(),
            traceback: traceback.map(str::to_string),
        }),
    );
}

/// New exception instance of `tp`
///
/// # Safety
/// `tp` must be a ready exception type; the global lock must be held.
pub unsafe fn new_instance(tp: ObjPtr, message: &str, traceback: Option<&str>) -> RtResult<ObjPtr> {
    let obj = typeobj::generic_alloc(tp, 0)?;
    init_payload(obj, message, traceback);
    Ok(obj)
}

unsafe fn state<'a>(obj: ObjPtr) -> Option<&'a mut ExceptionState> {
    if !is_exception(obj) {
        return None;
    }
    match payload(obj) {
        Some(Payload::Exception(state)) => Some(state),
        _ => None,
    }
}

/// Message of an exception instance
///
/// # Safety
/// `obj` must be a live object.
pub unsafe fn message(obj: ObjPtr) -> Option<String> {
    state(obj).map(|s| s.message.clone())
}

/// Traceback text of an exception instance
///
/// # Safety
/// `obj` must be a live object.
pub unsafe fn traceback(obj: ObjPtr) -> Option<String> {
    state(obj).and_then(|s| s.traceback.clone())
}

/// Attach traceback text to an exception instance
///
/// # Safety
/// `obj` must be a live exception; the global lock must be held.
pub unsafe fn set_traceback(obj: ObjPtr, text: Option<&str>) {
    if let Some(s) = state(obj) {
        s.traceback = text.map(str::to_string);
    }
}

unsafe extern "C" fn exception_new(tp: ObjPtr, args: ObjPtr, _kwargs: ObjPtr) -> ObjPtr {
    let message = match tuple::items(args).first() {
        Some(first) => match protocol::str_string(*first) {
            Ok(text) => text,
            Err(_) => return ptr::null_mut(),
        },
        None => String::new(),
    };
    let obj = match typeobj::slot::<AllocFunc>(tp, offsets().tp_alloc) {
        Some(alloc) => alloc(tp, 0),
        None => ptr_or_null(typeobj::generic_alloc(tp, 0)),
    };
    if !obj.is_null() {
        init_payload(obj, &message, None);
    }
    obj
}

unsafe extern "C" fn exception_str(obj: ObjPtr) -> ObjPtr {
    ptr_or_null(string::new(&message(obj).unwrap_or_default()))
}

unsafe extern "C" fn exception_repr(obj: ObjPtr) -> ObjPtr {
    let text = message(obj).unwrap_or_default();
    let shown = format!("{}('{}')", typeobj::name(type_of(obj)), text.replace('\'', "\\'"));
    ptr_or_null(string::new(&shown))
}
