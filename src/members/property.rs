//! Property descriptors

use super::{expect_target, ExtensionKind};
use crate::binder::{resolve_body, Overload};
use crate::bridge::Bridge;
use crate::descriptors::host_object_of;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{HostObject, HostTypeRef, MethodInfo, PropertyInfo};
use crate::interop::{guard_object, guard_status, SlotFn, SlotLevel};
use hostbridge_runtime::builtins;
use hostbridge_runtime::object::{new_ref, type_of, ObjPtr};
use hostbridge_runtime::typeobj;
use std::ffi::c_int;
use std::fmt;
use std::sync::{Arc, Weak};

pub(super) const LEVEL: SlotLevel = SlotLevel {
    name: "property",
    slots: &[
        ("tp_descr_get", SlotFn::Ternary(property_get)),
        ("tp_descr_set", SlotFn::ObjObjArg(property_set)),
    ],
};

pub struct PropertyObject {
    name: String,
    info: PropertyInfo,
    is_static: bool,
    declaring: HostTypeRef,
    bridge: Weak<Bridge>,
}

impl fmt::Debug for PropertyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyObject")
            .field("name", &format_args!("{}.{}", self.declaring.name(), self.name))
            .field("static", &self.is_static)
            .finish()
    }
}

impl PropertyObject {
    pub fn new(name: &str, info: PropertyInfo, is_static: bool, declaring: HostTypeRef, bridge: Weak<Bridge>) -> Self {
        Self {
            name: name.to_string(),
            info,
            is_static,
            declaring,
            bridge,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    fn bridge(&self) -> BridgeResult<Arc<Bridge>> {
        self.bridge.upgrade().ok_or(BridgeError::NotRunning)
    }

    /// Receiver for an accessor call; static properties take none
    unsafe fn receiver(&self, obj: ObjPtr) -> BridgeResult<Option<Arc<HostObject>>> {
        if self.is_static {
            return Ok(None);
        }
        host_object_of(obj).map(Some).ok_or_else(|| {
            BridgeError::Binding(format!(
                "property '{}' requires a {} instance, got '{}'",
                self.name,
                self.declaring.name(),
                typeobj::name(type_of(obj))
            ))
        })
    }

    unsafe fn get(&self, obj: ObjPtr) -> BridgeResult<ObjPtr> {
        let bridge = self.bridge()?;
        let getter = self.info.getter.as_ref().ok_or_else(|| {
            BridgeError::Attribute(format!("property '{}' is write-only", self.name))
        })?;
        let this = self.receiver(obj)?;
        let body = resolve_body(&self.overload_of(getter), this.as_ref())
            .map_err(|exc| bridge.raise_host_exception(&exc))?;
        let value = body(this.as_ref(), &mut [])
            .map_err(|exc| bridge.raise_host_exception(&exc))?;
        bridge.converter().to_foreign(&bridge, &value, Some(&self.info.ty))
    }

    unsafe fn set(&self, obj: ObjPtr, value: ObjPtr) -> BridgeResult<()> {
        let bridge = self.bridge()?;
        if value.is_null() {
            return Err(BridgeError::Attribute(format!("cannot delete property '{}'", self.name)));
        }
        let setter = self.info.setter.as_ref().ok_or_else(|| {
            BridgeError::Attribute(format!("property '{}' is read-only", self.name))
        })?;
        let this = self.receiver(obj)?;
        let converted = bridge
            .converter()
            .to_host(&bridge, value, &self.info.ty, true)?
            .unwrap_or_default();
        let body = resolve_body(&self.overload_of(setter), this.as_ref())
            .map_err(|exc| bridge.raise_host_exception(&exc))?;
        let mut args = [converted];
        body(this.as_ref(), &mut args).map_err(|exc| bridge.raise_host_exception(&exc))?;
        Ok(())
    }

    fn overload_of(&self, info: &MethodInfo) -> Overload {
        Overload {
            name: self.name.clone(),
            info: info.clone(),
            is_static: self.is_static,
            is_ctor: false,
            declaring: self.declaring.clone(),
        }
    }
}

unsafe extern "C" fn property_get(descr: ObjPtr, obj: ObjPtr, _tp: ObjPtr) -> ObjPtr {
    guard_object("tp_descr_get", || {
        let property = expect_target::<PropertyObject>(descr, ExtensionKind::Property)?;
        if obj.is_null() || builtins::is_none(obj) {
            if property.is_static {
                return property.get(obj);
            }
            return Ok(new_ref(descr));
        }
        property.get(obj)
    })
}

unsafe extern "C" fn property_set(descr: ObjPtr, obj: ObjPtr, value: ObjPtr) -> c_int {
    guard_status("tp_descr_set", || {
        let property = expect_target::<PropertyObject>(descr, ExtensionKind::Property)?;
        property.set(obj, value)?;
        Ok(0)
    })
}
