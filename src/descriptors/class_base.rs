//! Slots shared by every produced class

use super::{context, descriptor_for_instance, host_object_of, instantiate, ClassDescriptor};
use crate::binder::{self, MethodSet};
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::handles;
use crate::host::{HostObject, HostValue};
use crate::interop::{guard_hash, guard_object, guard_unit, SlotFn, SlotLevel};
use crate::logging::debug;
use crate::type_manager::metatype;
use hostbridge_runtime::builtins::{self, string, tuple};
use hostbridge_runtime::errors::{self, ExcKind};
use hostbridge_runtime::object::{clear_slot, decref, type_of, ObjPtr};
use hostbridge_runtime::protocol::CompareOp;
use hostbridge_runtime::typeobj;
use std::ffi::c_int;
use std::sync::Arc;

pub const LEVEL: SlotLevel = SlotLevel {
    name: "class",
    slots: &[
        ("tp_dealloc", SlotFn::Destructor(class_dealloc)),
        ("tp_new", SlotFn::Ternary(class_new)),
        ("tp_repr", SlotFn::Unary(class_repr)),
        ("tp_str", SlotFn::Unary(class_str)),
        ("tp_hash", SlotFn::Hash(class_hash)),
        ("tp_richcompare", SlotFn::RichCompare(class_richcompare)),
    ],
};

const ADD_LEVEL: SlotLevel = SlotLevel {
    name: "op_add",
    slots: &[("nb_add", SlotFn::Binary(nb_add))],
};

const SUBTRACT_LEVEL: SlotLevel = SlotLevel {
    name: "op_subtract",
    slots: &[("nb_subtract", SlotFn::Binary(nb_subtract))],
};

const MULTIPLY_LEVEL: SlotLevel = SlotLevel {
    name: "op_multiply",
    slots: &[("nb_multiply", SlotFn::Binary(nb_multiply))],
};

const DIVIDE_LEVEL: SlotLevel = SlotLevel {
    name: "op_divide",
    slots: &[("nb_true_divide", SlotFn::Binary(nb_true_divide))],
};

const NEGATE_LEVEL: SlotLevel = SlotLevel {
    name: "op_negate",
    slots: &[("nb_negative", SlotFn::Unary(nb_negative))],
};

/// Single-slot level for an operator slot the class overloads
pub(crate) fn operator_level(slot: &str) -> Option<SlotLevel> {
    Some(match slot {
        "nb_add" => ADD_LEVEL,
        "nb_subtract" => SUBTRACT_LEVEL,
        "nb_multiply" => MULTIPLY_LEVEL,
        "nb_true_divide" => DIVIDE_LEVEL,
        "nb_negative" => NEGATE_LEVEL,
        _ => return None,
    })
}

// ============================================================================
// Lifetime
// ============================================================================

/// Free the instance handle and the memory of a bridged instance
///
/// # Safety
/// `obj` must be an instance whose refcount just reached zero.
pub(crate) unsafe fn release_instance(obj: ObjPtr) {
    let tp = type_of(obj);
    if let Some(handle) = metatype::take_instance_handle(obj) {
        // Freed already if the bridge was torn down first
        if let Err(err) = handles::free(handle) {
            debug!(event = "instance_handle_stale", error = %err);
        }
    }
    let slot = typeobj::dict_slot(obj);
    if !slot.is_null() {
        clear_slot(slot);
    }
    typeobj::native_base_dealloc(obj);
    if typeobj::is_heap_type(tp) {
        decref(tp);
    }
}

unsafe extern "C" fn class_dealloc(obj: ObjPtr) {
    guard_unit("tp_dealloc", || {
        release_instance(obj);
        Ok(())
    })
}

/// Run the constructors of a class on foreign arguments
///
/// # Safety
/// The global lock must be held; `args` are borrowed.
pub(crate) unsafe fn construct(
    bridge: &Bridge,
    desc: &ClassDescriptor,
    args: &[ObjPtr],
) -> BridgeResult<Arc<HostObject>> {
    if desc.host.is_abstract() {
        return Err(BridgeError::Binding(format!(
            "cannot instantiate abstract class '{}'",
            desc.host.name()
        )));
    }
    let ctors = desc.ctors();
    if ctors.is_empty() {
        if args.is_empty() {
            return Ok(HostObject::new(&desc.host));
        }
        return Err(BridgeError::Binding(format!(
            "{}() takes no arguments",
            desc.host.name()
        )));
    }
    let outcome = binder::bind_and_call(bridge, &ctors, None, args)?;
    match outcome.ret {
        HostValue::Object(obj) => Ok(obj),
        other => Err(BridgeError::Binding(format!(
            "constructor of {} returned {}",
            desc.host.name(),
            other.type_name()
        ))),
    }
}

unsafe extern "C" fn class_new(tp: ObjPtr, args: ObjPtr, _kwargs: ObjPtr) -> ObjPtr {
    guard_object("tp_new", || {
        let (bridge, desc) = context(tp)?;
        let host_obj = construct(&bridge, &desc, tuple::items(args))?;
        instantiate(&bridge, &desc, tp, &host_obj)
    })
}

// ============================================================================
// Text and identity
// ============================================================================

unsafe fn receiver(obj: ObjPtr) -> BridgeResult<Arc<HostObject>> {
    host_object_of(obj).ok_or_else(|| {
        BridgeError::Binding(format!(
            "'{}' instance is not bound to a host object",
            typeobj::name(type_of(obj))
        ))
    })
}

/// Call a virtual member, raising host exceptions into the foreign indicator
unsafe fn virtual_call(
    bridge: &Bridge,
    this: &Arc<HostObject>,
    name: &str,
    args: &mut [HostValue],
) -> BridgeResult<Option<HostValue>> {
    match binder::call_virtual(this, name, args) {
        None => Ok(None),
        Some(Ok(value)) => Ok(Some(value)),
        Some(Err(exc)) => Err(bridge.raise_host_exception(&exc)),
    }
}

unsafe extern "C" fn class_repr(obj: ObjPtr) -> ObjPtr {
    guard_object("tp_repr", || {
        let this = receiver(obj)?;
        let text = format!("<{} object at {:#x}>", this.host_type().full_name(), obj as usize);
        Ok(string::new(&text)?)
    })
}

unsafe extern "C" fn class_str(obj: ObjPtr) -> ObjPtr {
    guard_object("tp_str", || {
        let (bridge, _) = context(type_of(obj))?;
        let this = receiver(obj)?;
        match virtual_call(&bridge, &this, "ToString", &mut [])? {
            Some(HostValue::Str(text)) => Ok(string::new(&text)?),
            _ => Ok(string::new(&this.host_type().full_name())?),
        }
    })
}

unsafe extern "C" fn class_hash(obj: ObjPtr) -> isize {
    guard_hash("tp_hash", || {
        let (bridge, _) = context(type_of(obj))?;
        let this = receiver(obj)?;
        match virtual_call(&bridge, &this, "GetHashCode", &mut [])? {
            Some(HostValue::Int(h)) => Ok(h as isize),
            _ => Ok((Arc::as_ptr(&this) as usize >> 4) as isize),
        }
    })
}

/// Try `set` on the operands; a binding miss is not an error
unsafe fn try_operator(bridge: &Bridge, set: &MethodSet, args: &[ObjPtr]) -> BridgeResult<Option<ObjPtr>> {
    match binder::invoke(bridge, set, None, args) {
        Ok(result) => Ok(Some(result)),
        Err(BridgeError::Binding(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

unsafe fn compare(a: ObjPtr, b: ObjPtr, op: CompareOp) -> BridgeResult<ObjPtr> {
    let (bridge, desc) = context(type_of(a))?;
    if let Some(set) = desc.operators().compare(op) {
        if let Some(result) = try_operator(&bridge, set, &[a, b])? {
            return Ok(result);
        }
    }
    let (Some(this), Some(other)) = (host_object_of(a), host_object_of(b)) else {
        return Ok(builtins::not_implemented());
    };
    let mut args = [HostValue::Object(other)];
    match op {
        CompareOp::Eq | CompareOp::Ne => match virtual_call(&bridge, &this, "Equals", &mut args)? {
            Some(HostValue::Bool(equal)) => Ok(builtins::bool_from(equal == (op == CompareOp::Eq))),
            _ => Ok(builtins::not_implemented()),
        },
        _ => match virtual_call(&bridge, &this, "CompareTo", &mut args)? {
            Some(HostValue::Int(sign)) => Ok(builtins::bool_from(op.matches(sign.cmp(&0)))),
            _ => Ok(builtins::not_implemented()),
        },
    }
}

unsafe extern "C" fn class_richcompare(a: ObjPtr, b: ObjPtr, op: c_int) -> ObjPtr {
    guard_object("tp_richcompare", || match CompareOp::from_raw(op) {
        Some(op) => compare(a, b, op),
        None => Ok(builtins::not_implemented()),
    })
}

// ============================================================================
// Operators
// ============================================================================

/// Left operand's forward overloads first, then the right operand's
/// reverse overloads; arguments keep their natural order
unsafe fn binary(slot: &str, a: ObjPtr, b: ObjPtr) -> BridgeResult<ObjPtr> {
    if let Some(desc) = descriptor_for_instance(a) {
        if let Some(set) = desc.operators().forward(slot) {
            let bridge = desc.bridge()?;
            if let Some(result) = try_operator(&bridge, set, &[a, b])? {
                return Ok(result);
            }
        }
    }
    if let Some(desc) = descriptor_for_instance(b) {
        if let Some(set) = desc.operators().reverse(slot) {
            let bridge = desc.bridge()?;
            if let Some(result) = try_operator(&bridge, set, &[a, b])? {
                return Ok(result);
            }
        }
    }
    Ok(builtins::not_implemented())
}

unsafe extern "C" fn nb_add(a: ObjPtr, b: ObjPtr) -> ObjPtr {
    guard_object("nb_add", || binary("nb_add", a, b))
}

unsafe extern "C" fn nb_subtract(a: ObjPtr, b: ObjPtr) -> ObjPtr {
    guard_object("nb_subtract", || binary("nb_subtract", a, b))
}

unsafe extern "C" fn nb_multiply(a: ObjPtr, b: ObjPtr) -> ObjPtr {
    guard_object("nb_multiply", || binary("nb_multiply", a, b))
}

unsafe extern "C" fn nb_true_divide(a: ObjPtr, b: ObjPtr) -> ObjPtr {
    guard_object("nb_true_divide", || binary("nb_true_divide", a, b))
}

unsafe extern "C" fn nb_negative(a: ObjPtr) -> ObjPtr {
    guard_object("nb_negative", || {
        let (bridge, desc) = context(type_of(a))?;
        if let Some(set) = desc.operators().unary("nb_negative") {
            if let Some(result) = try_operator(&bridge, set, &[a])? {
                return Ok(result);
            }
        }
        errors::raise(
            ExcKind::TypeError,
            &format!("bad operand type for unary -: '{}'", typeobj::name(type_of(a))),
        );
        Err(BridgeError::Pending)
    })
}
