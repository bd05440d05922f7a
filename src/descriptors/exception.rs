//! Host exception types
//!
//! Produced exception types derive from the foreign `Exception`, so their
//! instances carry the foreign exception payload next to the host object.

use super::class_base::construct;
use super::{context, host_object_of, instantiate};
use crate::host::HostObject;
use crate::interop::{guard_object, SlotFn, SlotLevel};
use hostbridge_runtime::builtins::{exceptions, string, tuple};
use hostbridge_runtime::object::ObjPtr;
use std::sync::Arc;

pub const LEVEL: SlotLevel = SlotLevel {
    name: "exception",
    slots: &[
        ("tp_new", SlotFn::Ternary(exception_new)),
        ("tp_str", SlotFn::Unary(exception_str)),
    ],
};

unsafe extern "C" fn exception_new(tp: ObjPtr, args: ObjPtr, _kwargs: ObjPtr) -> ObjPtr {
    guard_object("tp_new", || {
        let (bridge, desc) = context(tp)?;
        let args = tuple::items(args);
        let host_obj = if desc.ctors().is_empty() {
            let message = match args.first() {
                Some(&m) => string::as_str(m).unwrap_or_default().to_string(),
                None => String::new(),
            };
            HostObject::new_exception(&desc.host, &message, None)
        } else {
            construct(&bridge, &desc, args)?
        };
        instantiate(&bridge, &desc, tp, &host_obj)
    })
}

/// Message, then the host trace on its own lines
pub(crate) fn describe(host_obj: &Arc<HostObject>) -> String {
    match host_obj.exception_data() {
        Some(data) => match &data.trace {
            Some(trace) => format!("{}\n{}", data.message, trace),
            None => data.message.clone(),
        },
        None => host_obj.host_type().full_name(),
    }
}

unsafe extern "C" fn exception_str(obj: ObjPtr) -> ObjPtr {
    guard_object("tp_str", || {
        let text = match host_object_of(obj) {
            Some(host_obj) => describe(&host_obj),
            None => exceptions::message(obj).unwrap_or_default(),
        };
        Ok(string::new(&text)?)
    })
}
