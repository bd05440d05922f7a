//! module - named namespace with an attribute dict

use super::payload::{payload, payload_dealloc, set_payload, Payload};
use super::{dict, module_type, string};
use crate::errors::{ptr_or_null, RtResult};
use crate::layout::{offsets, PAYLOAD_OFFSET, WORD};
use crate::object::{decref, type_of, ObjPtr};
use crate::typeobj::{self, set, subtype_clear, subtype_traverse};

/// Header, name payload, attribute dict
pub const MODULE_BASICSIZE: usize = PAYLOAD_OFFSET + 2 * WORD;
const MODULE_DICTOFFSET: usize = PAYLOAD_OFFSET + WORD;

/// New module named `name` with an empty dict holding `__name__`
///
/// # Safety
/// The global lock must be held.
pub unsafe fn new(name: &str) -> RtResult<ObjPtr> {
    new_of(module_type(), name)
}

/// New instance of a module subtype
///
/// # Safety
/// `tp` must be `module` or a ready subtype of it; the global lock must
/// be held.
pub unsafe fn new_of(tp: ObjPtr, name: &str) -> RtResult<ObjPtr> {
    let obj = typeobj::generic_alloc(tp, 0)?;
    set_payload(obj, Payload::Module(name.to_string()));
    let result = init_dict(obj, name);
    if let Err(err) = result {
        decref(obj);
        return Err(err);
    }
    Ok(obj)
}

unsafe fn init_dict(obj: ObjPtr, name: &str) -> RtResult<()> {
    let d = typeobj::instance_dict(obj, true)?;
    let name_obj = string::new(name)?;
    let result = dict::set_item_str(d, "__name__", name_obj);
    decref(name_obj);
    result
}

/// # Safety
/// `obj` must be a live object.
pub unsafe fn is_module(obj: ObjPtr) -> bool {
    !obj.is_null() && typeobj::is_subtype(type_of(obj), module_type())
}

/// Module name
///
/// # Safety
/// `obj` must be a live module.
pub unsafe fn name(obj: ObjPtr) -> Option<String> {
    if !is_module(obj) {
        return None;
    }
    match payload(obj) {
        Some(Payload::Module(name)) => Some(name.clone()),
        _ => None,
    }
}

/// Attribute dict (borrowed)
///
/// # Safety
/// `obj` must be a live module; the global lock must be held.
pub unsafe fn dict(obj: ObjPtr) -> RtResult<ObjPtr> {
    typeobj::instance_dict(obj, true)
}

unsafe extern "C" fn module_repr(obj: ObjPtr) -> ObjPtr {
    let shown = format!("<module '{}'>", name(obj).unwrap_or_else(|| String::from("?")));
    ptr_or_null(string::new(&shown))
}

pub(super) unsafe fn configure(tp: ObjPtr) {
    let off = offsets();
    set(tp, off.tp_dictoffset, MODULE_DICTOFFSET);
    set(tp, off.tp_dealloc, payload_dealloc as usize);
    set(tp, off.tp_traverse, subtype_traverse as usize);
    set(tp, off.tp_clear, subtype_clear as usize);
    set(tp, off.tp_repr, module_repr as usize);
}
