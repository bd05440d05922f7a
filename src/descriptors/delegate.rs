//! Delegate types: built from foreign callables, callable from foreign code

use super::{context, host_object_of, instantiate};
use crate::binder::{self, CallOutcome};
use crate::error::{BridgeError, BridgeResult};
use crate::host::HostValue;
use crate::interop::{guard_object, SlotFn, SlotLevel};
use hostbridge_runtime::builtins::tuple;
use hostbridge_runtime::object::{type_of, ObjPtr};
use hostbridge_runtime::typeobj;

pub const LEVEL: SlotLevel = SlotLevel {
    name: "delegate",
    slots: &[
        ("tp_new", SlotFn::Ternary(delegate_new)),
        ("tp_call", SlotFn::Ternary(delegate_call)),
    ],
};

unsafe extern "C" fn delegate_new(tp: ObjPtr, args: ObjPtr, _kwargs: ObjPtr) -> ObjPtr {
    guard_object("tp_new", || {
        let (bridge, desc) = context(tp)?;
        let [callable] = tuple::items(args) else {
            return Err(BridgeError::Binding(format!(
                "{}() takes exactly one callable",
                desc.host.name()
            )));
        };
        let delegate = bridge.delegates().get_delegate(&bridge, &desc.host, *callable)?;
        instantiate(&bridge, &desc, tp, &delegate)
    })
}

unsafe fn call(obj: ObjPtr, args: &[ObjPtr]) -> BridgeResult<ObjPtr> {
    let (bridge, _) = context(type_of(obj))?;
    let delegate = host_object_of(obj).ok_or_else(|| {
        BridgeError::Binding(format!(
            "'{}' instance is not bound to a delegate",
            typeobj::name(type_of(obj))
        ))
    })?;
    let sig = delegate
        .host_type()
        .invoke_signature()
        .cloned()
        .ok_or_else(|| BridgeError::Binding(format!("{} has no signature", delegate.host_type().name())))?;
    if sig.arity() != args.len() {
        return Err(BridgeError::Binding(format!(
            "{} takes {} argument(s), {} given",
            sig.describe(delegate.host_type().name()),
            sig.arity(),
            args.len()
        )));
    }

    let converter = bridge.converter();
    let mut values = Vec::with_capacity(args.len());
    for (param, &arg) in sig.params.iter().zip(args) {
        values.push(converter.to_host(&bridge, arg, &param.ty, true)?.unwrap_or_default());
    }
    let ret = delegate
        .invoke(&mut values)
        .map_err(|exc| bridge.raise_host_exception(&exc))?;
    let by_ref: Vec<HostValue> = sig
        .by_ref_positions()
        .into_iter()
        .map(|i| values[i].clone())
        .collect();
    binder::outcome_to_foreign(&bridge, &CallOutcome { ret, by_ref, sig })
}

unsafe extern "C" fn delegate_call(obj: ObjPtr, args: ObjPtr, _kwargs: ObjPtr) -> ObjPtr {
    guard_object("tp_call", || call(obj, tuple::items(args)))
}
