//! Native state of builtin objects
//!
//! Builtin instances keep their state behind one boxed payload word right
//! after the object header. Heap subtypes of payload-carrying types
//! inherit the word at the same offset.

use super::exceptions::ExceptionState;
use super::function::FunctionBody;
use crate::layout::PAYLOAD_OFFSET;
use crate::object::{decref, read_word, write_word, ObjPtr};
use crate::typeobj::{self, object_dealloc};
use std::ffi::CString;

/// Boxed native state
pub enum Payload {
    Int(i64),
    Float(f64),
    Str(CString),
    Tuple(Vec<ObjPtr>),
    List(Vec<ObjPtr>),
    Dict(Vec<(ObjPtr, ObjPtr)>),
    Function(FunctionBody),
    Exception(ExceptionState),
    Module(String),
}

impl Payload {
    /// Release every object reference held by the payload
    ///
    /// # Safety
    /// The global lock must be held.
    pub unsafe fn release(self) {
        match self {
            Payload::Tuple(items) | Payload::List(items) => {
                for item in items {
                    decref(item);
                }
            }
            Payload::Dict(entries) => {
                for (k, v) in entries {
                    decref(k);
                    decref(v);
                }
            }
            Payload::Function(body) => body.release(),
            _ => {}
        }
    }

    /// Object references held by the payload (borrowed)
    pub fn referents(&self) -> Vec<ObjPtr> {
        match self {
            Payload::Tuple(items) | Payload::List(items) => items.clone(),
            Payload::Dict(entries) => entries.iter().flat_map(|(k, v)| [*k, *v]).collect(),
            Payload::Function(body) => body.referents(),
            _ => Vec::new(),
        }
    }
}

/// Borrow the payload of `obj`
///
/// # Safety
/// `obj` must be an instance of a payload-carrying type and the global
/// lock must be held for as long as the reference is used.
#[inline]
pub unsafe fn payload<'a>(obj: ObjPtr) -> Option<&'a mut Payload> {
    let raw = read_word(obj, PAYLOAD_OFFSET) as *mut Payload;
    raw.as_mut()
}

/// Install the payload of a freshly allocated object
///
/// # Safety
/// `obj` must be an instance of a payload-carrying type with no payload.
#[inline]
pub unsafe fn set_payload(obj: ObjPtr, value: Payload) {
    debug_assert_eq!(read_word(obj, PAYLOAD_OFFSET), 0, "payload already set");
    write_word(obj, PAYLOAD_OFFSET, Box::into_raw(Box::new(value)) as usize);
}

/// Detach the payload of `obj`
///
/// # Safety
/// `obj` must be an instance of a payload-carrying type.
#[inline]
pub unsafe fn take_payload(obj: ObjPtr) -> Option<Box<Payload>> {
    let raw = read_word(obj, PAYLOAD_OFFSET) as *mut Payload;
    if raw.is_null() {
        return None;
    }
    write_word(obj, PAYLOAD_OFFSET, 0);
    Some(Box::from_raw(raw))
}

/// Deallocation shared by all payload-carrying builtin types
///
/// # Safety
/// `obj` must be an object whose refcount just reached zero.
pub unsafe extern "C" fn payload_dealloc(obj: ObjPtr) {
    let dict = typeobj::dict_slot(obj);
    if !dict.is_null() {
        crate::object::clear_slot(dict);
    }
    if let Some(state) = take_payload(obj) {
        state.release();
    }
    object_dealloc(obj);
}

/// Visit payload references
///
/// # Safety
/// `obj` must be a live payload-carrying object.
pub unsafe extern "C" fn payload_traverse(
    obj: ObjPtr,
    visit: typeobj::VisitProc,
    arg: *mut std::ffi::c_void,
) -> std::ffi::c_int {
    if let Some(state) = payload(obj) {
        for item in state.referents() {
            if item.is_null() {
                continue;
            }
            let rc = visit(item, arg);
            if rc != 0 {
                return rc;
            }
        }
    }
    0
}

/// Drop payload references that may form cycles
///
/// # Safety
/// `obj` must be a live payload-carrying object.
pub unsafe extern "C" fn payload_clear(obj: ObjPtr) -> std::ffi::c_int {
    if let Some(state) = payload(obj) {
        let detached = match state {
            Payload::List(items) => Payload::List(std::mem::take(items)),
            Payload::Dict(entries) => Payload::Dict(std::mem::take(entries)),
            _ => return 0,
        };
        detached.release();
    }
    0
}
