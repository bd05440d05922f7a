//! Interface types
//!
//! Calling an interface type with one bridged object re-wraps that object
//! so only the interface's members are visible through it.

use super::{context, host_object_of, instantiate};
use crate::error::BridgeError;
use crate::interop::{guard_object, SlotFn, SlotLevel};
use hostbridge_runtime::builtins::tuple;
use hostbridge_runtime::object::ObjPtr;

pub const LEVEL: SlotLevel = SlotLevel {
    name: "interface",
    slots: &[("tp_new", SlotFn::Ternary(interface_new))],
};

unsafe extern "C" fn interface_new(tp: ObjPtr, args: ObjPtr, _kwargs: ObjPtr) -> ObjPtr {
    guard_object("tp_new", || {
        let (bridge, desc) = context(tp)?;
        let [source] = tuple::items(args) else {
            return Err(BridgeError::Binding(format!(
                "interface {} takes exactly one argument",
                desc.host.name()
            )));
        };
        let host_obj = host_object_of(*source)
            .filter(|o| o.host_type().is_assignable_to(&desc.host))
            .ok_or_else(|| {
                BridgeError::Binding(format!(
                    "object does not implement {}",
                    desc.host.name()
                ))
            })?;
        instantiate(&bridge, &desc, tp, &host_obj)
    })
}
