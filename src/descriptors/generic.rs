//! Open generic definitions
//!
//! A definition cannot be instantiated; subscripting it with type
//! arguments (`Box[int]`) closes it and returns the produced class of the
//! closed type. Closed types are memoized by the host, so the same
//! arguments always yield the same foreign type.

use super::{context, descriptor_for_type, Variant};
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{self, HostTypeRef};
use crate::interop::{guard_object, SlotFn, SlotLevel};
use hostbridge_runtime::builtins::{self, tuple};
use hostbridge_runtime::object::{new_ref, ObjPtr};
use hostbridge_runtime::typeobj;

pub const LEVEL: SlotLevel = SlotLevel {
    name: "generic",
    slots: &[("tp_new", SlotFn::Ternary(generic_new))],
};

unsafe extern "C" fn generic_new(tp: ObjPtr, _args: ObjPtr, _kwargs: ObjPtr) -> ObjPtr {
    guard_object("tp_new", || {
        Err(BridgeError::Binding(format!(
            "cannot instantiate generic type definition '{}'; bind its type arguments first",
            typeobj::name(tp)
        )))
    })
}

/// Host type named by a foreign type argument
unsafe fn type_argument(arg: ObjPtr) -> BridgeResult<HostTypeRef> {
    if !typeobj::is_type(arg) {
        return Err(BridgeError::Binding(String::from("type arguments must be types")));
    }
    if let Some(desc) = descriptor_for_type(arg).filter(|d| d.type_ptr() == arg) {
        return Ok(desc.host.clone());
    }
    let builtin = if arg == builtins::bool_type() {
        host::boolean_type()
    } else if arg == builtins::int_type() {
        host::int32_type()
    } else if arg == builtins::float_type() {
        host::float64_type()
    } else if arg == builtins::str_type() {
        host::string_type()
    } else if arg == builtins::object_type() {
        host::object_type()
    } else {
        return Err(BridgeError::Binding(format!(
            "'{}' cannot be used as a host type argument",
            typeobj::name(arg)
        )));
    };
    Ok(builtin)
}

/// Produced class of `definition` closed over the foreign type arguments
///
/// # Safety
/// The global lock must be held; `key` is borrowed.
pub(crate) unsafe fn close(bridge: &Bridge, definition: &HostTypeRef, key: ObjPtr) -> BridgeResult<ObjPtr> {
    let keys: Vec<ObjPtr> = if tuple::is_tuple(key) {
        tuple::items(key).to_vec()
    } else {
        vec![key]
    };
    let mut args = Vec::with_capacity(keys.len());
    for k in keys {
        args.push(type_argument(k)?);
    }
    let closed = definition
        .make_generic(&args)
        .map_err(|exc| bridge.raise_host_exception(&exc))?;
    let tp = bridge.get_class(&closed)?;
    Ok(new_ref(tp))
}

/// `mp_subscript` of the metatype
pub(crate) unsafe extern "C" fn generic_subscript(tp: ObjPtr, key: ObjPtr) -> ObjPtr {
    guard_object("mp_subscript", || {
        let (bridge, desc) = context(tp)?;
        if desc.variant != Variant::GenericDefinition || desc.type_ptr() != tp {
            return Err(BridgeError::Binding(format!(
                "'{}' is not a generic type definition",
                typeobj::name(tp)
            )));
        }
        close(&bridge, &desc.host, key)
    })
}
