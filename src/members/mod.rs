//! Member objects placed in produced type namespaces
//!
//! Design: Methods, properties, fields and events are instances of small
//! extension types built on demand by the
//! [`TypeManager`](crate::type_manager::TypeManager). Each instance's handle
//! owns the host-side state (`MethodObject`, `PropertyObject`, ...); the
//! extension type's own handle names its [`ExtensionKind`], so any object
//! can be classified without touching its instance memory.

mod event;
mod field;
mod method;
mod module;
mod property;

#[cfg(test)]
mod tests;

pub use event::{EventBinding, EventObject};
pub use field::FieldObject;
pub use method::{MethodBinding, MethodMode, MethodObject};
pub use module::RootModule;
pub use property::PropertyObject;

use crate::descriptors::class_base::release_instance;
use crate::error::{BridgeError, BridgeResult};
use crate::handles;
use crate::interop::{guard_unit, SlotFn, SlotLevel};
use crate::type_manager::metatype;
use hostbridge_runtime::object::{type_of, ObjPtr};
use hostbridge_runtime::typeobj;
use std::any::Any;
use std::sync::Arc;

/// Extension types a bridge can build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    Method,
    MethodBinding,
    Property,
    Field,
    Event,
    EventBinding,
    RootModule,
}

impl ExtensionKind {
    pub const ALL: [ExtensionKind; 7] = [
        ExtensionKind::Method,
        ExtensionKind::MethodBinding,
        ExtensionKind::Property,
        ExtensionKind::Field,
        ExtensionKind::Event,
        ExtensionKind::EventBinding,
        ExtensionKind::RootModule,
    ];

    pub fn type_name(self) -> &'static str {
        match self {
            ExtensionKind::Method => "MethodObject",
            ExtensionKind::MethodBinding => "MethodBinding",
            ExtensionKind::Property => "PropertyObject",
            ExtensionKind::Field => "FieldObject",
            ExtensionKind::Event => "EventObject",
            ExtensionKind::EventBinding => "EventBinding",
            ExtensionKind::RootModule => "RootModule",
        }
    }

    /// Slot levels, most derived first
    pub fn levels(self) -> &'static [SlotLevel] {
        match self {
            ExtensionKind::Method => &[method::METHOD_LEVEL, EXTENSION_LEVEL],
            ExtensionKind::MethodBinding => &[method::BINDING_LEVEL, EXTENSION_LEVEL],
            ExtensionKind::Property => &[property::LEVEL, EXTENSION_LEVEL],
            ExtensionKind::Field => &[field::LEVEL, EXTENSION_LEVEL],
            ExtensionKind::Event => &[event::EVENT_LEVEL, EXTENSION_LEVEL],
            ExtensionKind::EventBinding => &[event::BINDING_LEVEL, EXTENSION_LEVEL],
            ExtensionKind::RootModule => &[module::LEVEL, EXTENSION_LEVEL],
        }
    }
}

/// What an extension type's handle points at
#[derive(Debug)]
pub struct ExtensionType {
    pub kind: ExtensionKind,
}

const EXTENSION_LEVEL: SlotLevel = SlotLevel {
    name: "extension",
    slots: &[("tp_dealloc", SlotFn::Destructor(extension_dealloc))],
};

unsafe extern "C" fn extension_dealloc(obj: ObjPtr) {
    guard_unit("tp_dealloc", || {
        release_instance(obj);
        Ok(())
    })
}

/// Kind of an extension instance, `None` for anything else
///
/// # Safety
/// `obj` must be null or a live object.
pub unsafe fn kind_of(obj: ObjPtr) -> Option<ExtensionKind> {
    if obj.is_null() {
        return None;
    }
    let tp = type_of(obj);
    if !metatype::is_bridge_type(tp) {
        return None;
    }
    handles::get_as::<ExtensionType>(metatype::type_handle(tp)?).map(|t| t.kind)
}

/// Host-side state of an extension instance
///
/// # Safety
/// `obj` must be null or a live object.
pub unsafe fn target_of<T: Any + Send + Sync>(obj: ObjPtr) -> Option<Arc<T>> {
    kind_of(obj)?;
    handles::get_as::<T>(metatype::instance_handle(obj)?)
}

/// State of `obj`, or a binding error naming the expected kind
pub(crate) unsafe fn expect_target<T: Any + Send + Sync>(obj: ObjPtr, kind: ExtensionKind) -> BridgeResult<Arc<T>> {
    target_of::<T>(obj).ok_or_else(|| {
        BridgeError::Binding(format!(
            "expected {} but got '{}'",
            kind.type_name(),
            typeobj::name(type_of(obj))
        ))
    })
}

/// Is `descr` a static property or field? Those are assigned through the
/// metatype instead of shadowing in the type dict.
///
/// # Safety
/// `descr` must be a live object.
pub unsafe fn is_static_data_descriptor(descr: ObjPtr) -> bool {
    match kind_of(descr) {
        Some(ExtensionKind::Property) => target_of::<PropertyObject>(descr).is_some_and(|p| p.is_static()),
        Some(ExtensionKind::Field) => target_of::<FieldObject>(descr).is_some_and(|f| f.is_static()),
        _ => false,
    }
}
