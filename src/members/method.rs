//! Method objects and their bindings

use super::{expect_target, ExtensionKind};
use crate::binder::{self, MethodSet};
use crate::bridge::Bridge;
use crate::descriptors::host_object_of;
use crate::error::{BridgeError, BridgeResult};
use crate::interop::{guard_object, SlotFn, SlotLevel};
use crate::wrappers::ForeignObject;
use hostbridge_runtime::builtins::{self, string, tuple};
use hostbridge_runtime::object::{new_ref, ObjPtr};
use std::fmt;
use std::sync::{Arc, Weak};

pub(super) const METHOD_LEVEL: SlotLevel = SlotLevel {
    name: "method",
    slots: &[
        ("tp_descr_get", SlotFn::Ternary(method_descr_get)),
        ("tp_call", SlotFn::Ternary(method_call)),
        ("tp_repr", SlotFn::Unary(method_repr)),
    ],
};

pub(super) const BINDING_LEVEL: SlotLevel = SlotLevel {
    name: "method_binding",
    slots: &[
        ("tp_call", SlotFn::Ternary(binding_call)),
        ("tp_repr", SlotFn::Unary(binding_repr)),
    ],
};

/// How a bound receiver joins the arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodMode {
    /// Receiver is `this`
    Normal,
    /// Static operator, receiver is the left operand
    Forward,
    /// Static operator, receiver is the right operand
    Reverse,
}

pub struct MethodObject {
    owner: String,
    set: MethodSet,
    mode: MethodMode,
    bridge: Weak<Bridge>,
}

impl fmt::Debug for MethodObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodObject")
            .field("name", &format_args!("{}.{}", self.owner, self.set.name()))
            .field("overloads", &self.set.len())
            .field("mode", &self.mode)
            .finish()
    }
}

impl MethodObject {
    pub fn new(owner: &str, set: MethodSet, mode: MethodMode, bridge: Weak<Bridge>) -> Self {
        Self {
            owner: owner.to_string(),
            set,
            mode,
            bridge,
        }
    }

    pub fn name(&self) -> &str {
        self.set.name()
    }

    pub fn set(&self) -> &MethodSet {
        &self.set
    }

    pub fn mode(&self) -> MethodMode {
        self.mode
    }

    fn bridge(&self) -> BridgeResult<Arc<Bridge>> {
        self.bridge.upgrade().ok_or(BridgeError::NotRunning)
    }

    /// Call through the type: an instance receiver, if any, comes first
    unsafe fn call_unbound(&self, args: &[ObjPtr]) -> BridgeResult<ObjPtr> {
        let bridge = self.bridge()?;
        if self.set.has_instance() {
            if let Some((&first, rest)) = args.split_first() {
                if let Some(receiver) = host_object_of(first) {
                    match binder::invoke(&bridge, &self.set, Some(&receiver), rest) {
                        Err(BridgeError::Binding(_)) if self.set.has_static() => {}
                        result => return result,
                    }
                }
            }
        }
        binder::invoke(&bridge, &self.set, None, args)
    }

    /// Call bound to `receiver`
    unsafe fn call_bound(&self, receiver: ObjPtr, args: &[ObjPtr]) -> BridgeResult<ObjPtr> {
        let bridge = self.bridge()?;
        match self.mode {
            MethodMode::Normal => {
                let this = host_object_of(receiver);
                binder::invoke(&bridge, &self.set, this.as_ref(), args)
            }
            MethodMode::Forward => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(receiver);
                full.extend_from_slice(args);
                binder::invoke(&bridge, &self.set, None, &full)
            }
            MethodMode::Reverse => {
                let mut full = args.to_vec();
                full.push(receiver);
                binder::invoke(&bridge, &self.set, None, &full)
            }
        }
    }
}

/// A method object together with the instance it was read from
#[derive(Debug)]
pub struct MethodBinding {
    method: Arc<MethodObject>,
    receiver: ForeignObject,
}

unsafe extern "C" fn method_descr_get(descr: ObjPtr, obj: ObjPtr, _tp: ObjPtr) -> ObjPtr {
    guard_object("tp_descr_get", || {
        if obj.is_null() || builtins::is_none(obj) {
            return Ok(new_ref(descr));
        }
        let method = expect_target::<MethodObject>(descr, ExtensionKind::Method)?;
        let bridge = method.bridge()?;
        let binding = MethodBinding {
            receiver: ForeignObject::from_borrowed(obj, bridge.finalizer()),
            method,
        };
        bridge
            .types()
            .new_extension_instance(ExtensionKind::MethodBinding, Arc::new(binding))
    })
}

unsafe extern "C" fn method_call(descr: ObjPtr, args: ObjPtr, _kwargs: ObjPtr) -> ObjPtr {
    guard_object("tp_call", || {
        let method = expect_target::<MethodObject>(descr, ExtensionKind::Method)?;
        method.call_unbound(tuple::items(args))
    })
}

unsafe extern "C" fn method_repr(descr: ObjPtr) -> ObjPtr {
    guard_object("tp_repr", || {
        let method = expect_target::<MethodObject>(descr, ExtensionKind::Method)?;
        Ok(string::new(&format!(
            "<method '{}' of '{}' objects>",
            method.name(),
            method.owner
        ))?)
    })
}

unsafe extern "C" fn binding_call(obj: ObjPtr, args: ObjPtr, _kwargs: ObjPtr) -> ObjPtr {
    guard_object("tp_call", || {
        let binding = expect_target::<MethodBinding>(obj, ExtensionKind::MethodBinding)?;
        binding
            .method
            .call_bound(binding.receiver.as_ptr(), tuple::items(args))
    })
}

unsafe extern "C" fn binding_repr(obj: ObjPtr) -> ObjPtr {
    guard_object("tp_repr", || {
        let binding = expect_target::<MethodBinding>(obj, ExtensionKind::MethodBinding)?;
        Ok(string::new(&format!(
            "<bound method '{}' of '{}' object at {:#x}>",
            binding.method.name(),
            binding.method.owner,
            binding.receiver.addr()
        ))?)
    })
}
