//! The root namespace module
//!
//! Exported host types appear as attributes of the root module. They are
//! produced on first access and then cached in the module dict.

use super::ExtensionKind;
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::handles::{self, Target};
use crate::interop::{guard_object, SlotFn, SlotLevel};
use crate::logging::{trace, warn};
use crate::type_manager::metatype;
use hostbridge_runtime::builtins::{dict, module, string};
use hostbridge_runtime::errors::{self, ExcKind};
use hostbridge_runtime::object::{decref, new_ref, ObjPtr};
use hostbridge_runtime::typeobj;
use std::sync::{Arc, Weak};

pub(super) const LEVEL: SlotLevel = SlotLevel {
    name: "root_module",
    slots: &[("tp_getattro", SlotFn::Binary(root_getattro))],
};

#[derive(Debug)]
pub struct RootModule {
    bridge: Weak<Bridge>,
}

impl RootModule {
    /// New root module named `name`
    ///
    /// # Safety
    /// The global lock must be held.
    pub(crate) unsafe fn create(bridge: &Arc<Bridge>, name: &str) -> BridgeResult<ObjPtr> {
        let tp = bridge.types().create_type(ExtensionKind::RootModule)?;
        let obj = module::new_of(tp, name)?;
        let target: Target = Arc::new(RootModule {
            bridge: Arc::downgrade(bridge),
        });
        let handle = handles::alloc_strong(bridge.owner(), target);
        if let Err(err) = metatype::set_instance_handle(obj, Some(handle)) {
            if let Err(free_err) = handles::free(handle) {
                warn!(event = "handle_free_failed", error = %free_err, "Module handle was already released");
            }
            decref(obj);
            return Err(err);
        }
        Ok(obj)
    }

    /// Produce an exported type and cache it in the module dict
    unsafe fn resolve(&self, obj: ObjPtr, name: &str) -> BridgeResult<Option<ObjPtr>> {
        let bridge = self.bridge.upgrade().ok_or(BridgeError::NotRunning)?;
        let Some(host) = bridge.exported(name) else {
            return Ok(None);
        };
        let tp = bridge.get_class(&host)?;
        dict::set_item_str(module::dict(obj)?, name, tp)?;
        trace!(event = "export_resolved", name, "Exported type produced on first access");
        Ok(Some(new_ref(tp)))
    }
}

unsafe extern "C" fn root_getattro(obj: ObjPtr, attr: ObjPtr) -> ObjPtr {
    let found = typeobj::generic_getattr(obj, attr);
    if !found.is_null() {
        return found;
    }
    let Some(state) = errors::fetch() else {
        return found;
    };
    let name = match string::as_str(attr) {
        Some(name) if state.matches(ExcKind::AttributeError) => name.to_string(),
        _ => {
            errors::restore(Some(state));
            return found;
        }
    };
    guard_object("tp_getattro", || {
        let resolved = match super::target_of::<RootModule>(obj) {
            Some(root) => root.resolve(obj, &name),
            None => Ok(None),
        };
        match resolved {
            Ok(Some(tp)) => {
                state.release();
                Ok(tp)
            }
            Ok(None) => {
                errors::restore(Some(state));
                Err(BridgeError::Pending)
            }
            Err(err) => {
                state.release();
                Err(err)
            }
        }
    })
}
