//! Field descriptors

use super::{expect_target, ExtensionKind};
use crate::bridge::Bridge;
use crate::descriptors::host_object_of;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{FieldInfo, HostTypeRef};
use crate::interop::{guard_object, guard_status, SlotFn, SlotLevel};
use hostbridge_runtime::builtins;
use hostbridge_runtime::object::{new_ref, type_of, ObjPtr};
use hostbridge_runtime::typeobj;
use std::ffi::c_int;
use std::fmt;
use std::sync::{Arc, Weak};

pub(super) const LEVEL: SlotLevel = SlotLevel {
    name: "field",
    slots: &[
        ("tp_descr_get", SlotFn::Ternary(field_get)),
        ("tp_descr_set", SlotFn::ObjObjArg(field_set)),
    ],
};

pub struct FieldObject {
    name: String,
    info: FieldInfo,
    is_static: bool,
    declaring: HostTypeRef,
    bridge: Weak<Bridge>,
}

impl fmt::Debug for FieldObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldObject")
            .field("name", &format_args!("{}.{}", self.declaring.name(), self.name))
            .field("static", &self.is_static)
            .field("read_only", &self.info.read_only)
            .finish()
    }
}

impl FieldObject {
    pub fn new(name: &str, info: FieldInfo, is_static: bool, declaring: HostTypeRef, bridge: Weak<Bridge>) -> Self {
        Self {
            name: name.to_string(),
            info,
            is_static,
            declaring,
            bridge,
        }
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    fn bridge(&self) -> BridgeResult<Arc<Bridge>> {
        self.bridge.upgrade().ok_or(BridgeError::NotRunning)
    }

    unsafe fn instance_error(&self, obj: ObjPtr) -> BridgeError {
        BridgeError::Binding(format!(
            "field '{}' requires a {} instance, got '{}'",
            self.name,
            self.declaring.name(),
            typeobj::name(type_of(obj))
        ))
    }

    unsafe fn get(&self, obj: ObjPtr) -> BridgeResult<ObjPtr> {
        let bridge = self.bridge()?;
        let value = if self.is_static {
            self.declaring.static_value(&self.name, &self.info.ty)
        } else {
            let this = host_object_of(obj).ok_or_else(|| self.instance_error(obj))?;
            this.field_or_default(&self.name, &self.info.ty)
        };
        bridge.converter().to_foreign(&bridge, &value, Some(&self.info.ty))
    }

    unsafe fn set(&self, obj: ObjPtr, value: ObjPtr) -> BridgeResult<()> {
        if value.is_null() {
            return Err(BridgeError::Attribute(format!("cannot delete field '{}'", self.name)));
        }
        if self.info.read_only {
            return Err(BridgeError::Attribute(format!("field '{}' is read-only", self.name)));
        }
        let bridge = self.bridge()?;
        let converted = bridge
            .converter()
            .to_host(&bridge, value, &self.info.ty, true)?
            .unwrap_or_default();
        if self.is_static {
            self.declaring.set_static_value(&self.name, converted);
        } else {
            let this = host_object_of(obj).ok_or_else(|| self.instance_error(obj))?;
            this.set_field(&self.name, converted);
        }
        Ok(())
    }
}

unsafe extern "C" fn field_get(descr: ObjPtr, obj: ObjPtr, _tp: ObjPtr) -> ObjPtr {
    guard_object("tp_descr_get", || {
        let field = expect_target::<FieldObject>(descr, ExtensionKind::Field)?;
        if !field.is_static && (obj.is_null() || builtins::is_none(obj)) {
            return Ok(new_ref(descr));
        }
        field.get(obj)
    })
}

unsafe extern "C" fn field_set(descr: ObjPtr, obj: ObjPtr, value: ObjPtr) -> c_int {
    guard_status("tp_descr_set", || {
        let field = expect_target::<FieldObject>(descr, ExtensionKind::Field)?;
        field.set(obj, value)?;
        Ok(0)
    })
}
