//! Events: `obj.Changed += handler` and `obj.Changed -= handler`

use super::{expect_target, target_of, ExtensionKind};
use crate::bridge::Bridge;
use crate::delegates::Dispatcher;
use crate::descriptors::host_object_of;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{EventInfo, HostObject, HostTypeRef, HostValue};
use crate::interop::{guard_object, guard_status, SlotFn, SlotLevel};
use crate::logging::debug;
use crate::wrappers::ForeignObject;
use hostbridge_runtime::builtins::{self, string};
use hostbridge_runtime::object::{new_ref, type_of, ObjPtr};
use hostbridge_runtime::typeobj;
use std::ffi::c_int;
use std::fmt;
use std::sync::{Arc, Weak};

pub(super) const EVENT_LEVEL: SlotLevel = SlotLevel {
    name: "event",
    slots: &[
        ("tp_descr_get", SlotFn::Ternary(event_get)),
        ("tp_descr_set", SlotFn::ObjObjArg(event_set)),
    ],
};

pub(super) const BINDING_LEVEL: SlotLevel = SlotLevel {
    name: "event_binding",
    slots: &[
        ("nb_add", SlotFn::Binary(binding_add)),
        ("nb_subtract", SlotFn::Binary(binding_subtract)),
        ("tp_repr", SlotFn::Unary(binding_repr)),
    ],
};

pub struct EventObject {
    name: String,
    info: EventInfo,
    declaring: HostTypeRef,
    bridge: Weak<Bridge>,
}

impl fmt::Debug for EventObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventObject({}.{})", self.declaring.name(), self.name)
    }
}

impl EventObject {
    pub fn new(name: &str, info: EventInfo, declaring: HostTypeRef, bridge: Weak<Bridge>) -> Self {
        Self {
            name: name.to_string(),
            info,
            declaring,
            bridge,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn bridge(&self) -> BridgeResult<Arc<Bridge>> {
        self.bridge.upgrade().ok_or(BridgeError::NotRunning)
    }
}

/// An event read from one instance
#[derive(Debug)]
pub struct EventBinding {
    event: Arc<EventObject>,
    receiver: ForeignObject,
}

impl EventBinding {
    unsafe fn target(&self) -> BridgeResult<Arc<HostObject>> {
        host_object_of(self.receiver.as_ptr()).ok_or_else(|| {
            BridgeError::Binding(format!("event '{}' lost its instance", self.event.name))
        })
    }

    unsafe fn add(&self, handler: ObjPtr) -> BridgeResult<()> {
        let bridge = self.event.bridge()?;
        let target = self.target()?;
        let delegate = bridge
            .converter()
            .to_host(&bridge, handler, &self.event.info.handler, true)?
            .unwrap_or_default();
        if delegate.is_null() {
            return Err(BridgeError::Binding(format!(
                "event '{}' handler cannot be None",
                self.event.name
            )));
        }
        target.add_handler(&self.event.name, delegate);
        Ok(())
    }

    /// Unsubscribe a bridged delegate, or the delegate made for a callable
    unsafe fn remove(&self, handler: ObjPtr) -> BridgeResult<bool> {
        let target = self.target()?;
        if let Some(delegate) = host_object_of(handler) {
            return Ok(target.remove_handler(&self.event.name, &HostValue::Object(delegate)));
        }
        Ok(target.remove_handler_where(&self.event.name, |h| match h {
            HostValue::Object(delegate) => delegate
                .delegate_target()
                .and_then(|t| t.downcast_ref::<Dispatcher>())
                .is_some_and(|d| d.callable() == handler),
            _ => false,
        }))
    }
}

unsafe extern "C" fn event_get(descr: ObjPtr, obj: ObjPtr, _tp: ObjPtr) -> ObjPtr {
    guard_object("tp_descr_get", || {
        if obj.is_null() || builtins::is_none(obj) {
            return Ok(new_ref(descr));
        }
        let event = expect_target::<EventObject>(descr, ExtensionKind::Event)?;
        let bridge = event.bridge()?;
        let binding = EventBinding {
            receiver: ForeignObject::from_borrowed(obj, bridge.finalizer()),
            event,
        };
        bridge
            .types()
            .new_extension_instance(ExtensionKind::EventBinding, Arc::new(binding))
    })
}

/// Only the write-back of an in-place `+=`/`-=` is accepted
unsafe extern "C" fn event_set(descr: ObjPtr, obj: ObjPtr, value: ObjPtr) -> c_int {
    guard_status("tp_descr_set", || {
        let event = expect_target::<EventObject>(descr, ExtensionKind::Event)?;
        if let Some(binding) = target_of::<EventBinding>(value) {
            if Arc::ptr_eq(&binding.event, &event) && binding.receiver.as_ptr() == obj {
                return Ok(0);
            }
        }
        Err(BridgeError::Attribute(format!(
            "cannot assign to event '{}'; use += or -=",
            event.name
        )))
    })
}

unsafe fn binding_op(a: ObjPtr, b: ObjPtr, subscribe: bool) -> BridgeResult<ObjPtr> {
    let Some(binding) = target_of::<EventBinding>(a) else {
        return Ok(builtins::not_implemented());
    };
    if subscribe {
        binding.add(b)?;
    } else if !binding.remove(b)? {
        debug!(
            event = "handler_not_subscribed",
            name = %binding.event.name,
            handler = %typeobj::name(type_of(b))
        );
    }
    Ok(new_ref(a))
}

unsafe extern "C" fn binding_add(a: ObjPtr, b: ObjPtr) -> ObjPtr {
    guard_object("nb_add", || binding_op(a, b, true))
}

unsafe extern "C" fn binding_subtract(a: ObjPtr, b: ObjPtr) -> ObjPtr {
    guard_object("nb_subtract", || binding_op(a, b, false))
}

unsafe extern "C" fn binding_repr(obj: ObjPtr) -> ObjPtr {
    guard_object("tp_repr", || {
        let binding = expect_target::<EventBinding>(obj, ExtensionKind::EventBinding)?;
        let count = binding.target().map(|t| t.handler_count(&binding.event.name)).unwrap_or(0);
        Ok(string::new(&format!(
            "<event '{}' of '{}' with {} handler(s)>",
            binding.event.name,
            binding.event.declaring.name(),
            count
        ))?)
    })
}
