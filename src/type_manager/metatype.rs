//! The bridge metatype
//!
//! Every produced type is an instance of one heap subtype of `type` that
//! carries two extra words:
//!
//! | offset                  | contents                                  |
//! |-------------------------|-------------------------------------------|
//! | `type_basicsize`        | offset of the instance handle in instances |
//! | `type_basicsize + WORD` | the type's own [`OwnershipHandle`]         |
//!
//! The metatype's deallocator is never reset, so a type that outlives the
//! bridge still frees its handle word (zero after a reset) on the way out.

use crate::descriptors::{self, generic};
use crate::error::{BridgeError, BridgeResult};
use crate::handles::{self, OwnershipHandle};
use crate::interop::{guard_object, guard_status, thunk, SlotDefaults, SlotFn, SlotsHolder};
use crate::members;
use crate::logging::{debug, warn};
use hostbridge_runtime::allocator::{mem_alloc, mem_free};
use hostbridge_runtime::builtins::function::{MethodDef, METH_O};
use hostbridge_runtime::builtins::{self, dict, string};
use hostbridge_runtime::errors::{self, ExcKind};
use hostbridge_runtime::layout::{offsets, WORD};
use hostbridge_runtime::object::{decref, incref, read_word, type_of, write_word, ObjPtr};
use hostbridge_runtime::typeobj::{self, ObjObjArgProc, TypeFlags};
use std::ffi::{c_char, c_int};
use std::ptr;
use std::sync::Arc;

const LEVEL: &str = "metatype";

static INSTANCECHECK: &[u8] = b"__instancecheck__\0";
static SUBCLASSCHECK: &[u8] = b"__subclasscheck__\0";

/// Word holding the instance-handle offset of a produced type
pub fn instance_offset_field() -> usize {
    offsets().type_basicsize
}

/// Word holding a produced type's own handle
pub fn type_handle_field() -> usize {
    offsets().type_basicsize + WORD
}

/// Basic size of the metatype's instances
pub fn basicsize() -> usize {
    offsets().type_basicsize + 2 * WORD
}

/// Build and ready the metatype; the holder tracks its overridden slots
///
/// # Safety
/// The global lock must be held.
pub(crate) unsafe fn create(name: &str) -> BridgeResult<(ObjPtr, Arc<SlotsHolder>)> {
    let off = offsets();
    let type_type = builtins::type_type();
    let meta = typeobj::alloc_type_object(type_type).map_err(BridgeError::from)?;
    if let Err(err) = init_layout(meta, name) {
        decref(meta);
        return Err(err);
    }

    let holder = Arc::new(SlotsHolder::new(
        meta,
        SlotDefaults::of_type(type_type),
        None,
        &["tp_dealloc"],
    ));
    let slots: [(&'static str, SlotFn); 3] = [
        ("tp_dealloc", SlotFn::Destructor(meta_dealloc)),
        ("mp_subscript", SlotFn::Binary(generic::generic_subscript)),
        ("tp_setattro", SlotFn::ObjObjArg(meta_setattro)),
    ];
    for (slot, func) in slots {
        let built = thunk::get_or_create(LEVEL, slot, func).and_then(|t| holder.set(slot, t));
        if let Err(err) = built {
            decref(meta);
            return Err(err);
        }
    }

    let table = method_table();
    if table.is_null() {
        decref(meta);
        return Err(errors::raise(ExcKind::MemoryError, "out of memory").into());
    }
    typeobj::set(meta, off.tp_methods, table as usize);
    let table_addr = table as usize;
    holder.add_deallocator(Box::new(move |tp| {
        let dict_obj = typeobj::type_dict(tp);
        if !dict_obj.is_null() {
            dict::del_item_str(dict_obj, "__instancecheck__");
            dict::del_item_str(dict_obj, "__subclasscheck__");
        }
        typeobj::set(tp, offsets().tp_methods, 0);
        mem_free(table_addr as *mut u8);
    }));

    if let Err(err) = typeobj::type_ready(meta) {
        holder.reset();
        decref(meta);
        return Err(err.into());
    }
    debug!(event = "metatype_ready", name, basicsize = basicsize());
    Ok((meta, holder))
}

unsafe fn init_layout(meta: ObjPtr, name: &str) -> BridgeResult<()> {
    let off = offsets();
    let type_type = builtins::type_type();
    typeobj::set_heap_name(meta, name)?;
    incref(type_type);
    typeobj::set(meta, off.tp_base, type_type as usize);
    typeobj::set(meta, off.tp_basicsize, basicsize());
    typeobj::set_flags(meta, TypeFlags::HEAPTYPE | TypeFlags::BASETYPE);
    Ok(())
}

/// Method table allocated with the foreign allocator
unsafe fn method_table() -> *mut MethodDef {
    let table = mem_alloc(3 * std::mem::size_of::<MethodDef>()) as *mut MethodDef;
    if table.is_null() {
        return table;
    }
    table.write(MethodDef {
        ml_name: INSTANCECHECK.as_ptr() as *const c_char,
        ml_meth: Some(instancecheck),
        ml_flags: METH_O,
        ml_doc: ptr::null(),
    });
    table.add(1).write(MethodDef {
        ml_name: SUBCLASSCHECK.as_ptr() as *const c_char,
        ml_meth: Some(subclasscheck),
        ml_flags: METH_O,
        ml_doc: ptr::null(),
    });
    table.add(2).write(MethodDef::SENTINEL);
    table
}

// ============================================================================
// Type inspection
// ============================================================================

/// Is `tp` produced by a bridge (its metatype frees type handles)?
///
/// # Safety
/// `tp` must be a live type object.
pub unsafe fn is_bridge_type(tp: ObjPtr) -> bool {
    let meta = type_of(tp);
    typeobj::get(meta, offsets().tp_dealloc) == meta_dealloc as usize
}

/// `tp` itself or its closest base produced by a bridge
///
/// # Safety
/// `tp` must be a live type object.
pub unsafe fn nearest_bridge_type(tp: ObjPtr) -> Option<ObjPtr> {
    let mut cur = tp;
    while !cur.is_null() {
        if is_bridge_type(cur) {
            return Some(cur);
        }
        cur = typeobj::base(cur);
    }
    None
}

/// Handle stored in a produced type
///
/// # Safety
/// `tp` must be a live bridge type.
pub unsafe fn type_handle(tp: ObjPtr) -> Option<OwnershipHandle> {
    OwnershipHandle::from_raw(read_word(tp, type_handle_field()))
}

/// # Safety
/// `tp` must be a live bridge type.
pub unsafe fn set_type_handle(tp: ObjPtr, handle: Option<OwnershipHandle>) {
    write_word(tp, type_handle_field(), handle.map_or(0, OwnershipHandle::to_raw));
}

/// Offset of the instance handle word in instances of `tp`, if any
///
/// # Safety
/// `tp` must be a live type object.
pub unsafe fn instance_handle_offset(tp: ObjPtr) -> Option<usize> {
    let bridge_tp = nearest_bridge_type(tp)?;
    match read_word(bridge_tp, instance_offset_field()) {
        0 => None,
        offset => Some(offset),
    }
}

/// Handle of a bridged instance
///
/// # Safety
/// `obj` must be a live object.
pub unsafe fn instance_handle(obj: ObjPtr) -> Option<OwnershipHandle> {
    let offset = instance_handle_offset(type_of(obj))?;
    OwnershipHandle::from_raw(read_word(obj, offset))
}

/// Store (or clear) the handle of a bridged instance
///
/// # Safety
/// `obj` must be a live instance of a bridge type.
pub unsafe fn set_instance_handle(obj: ObjPtr, handle: Option<OwnershipHandle>) -> BridgeResult<()> {
    let offset = instance_handle_offset(type_of(obj)).ok_or_else(|| {
        BridgeError::Binding(format!(
            "'{}' instances have no handle",
            typeobj::name(type_of(obj))
        ))
    })?;
    write_word(obj, offset, handle.map_or(0, OwnershipHandle::to_raw));
    Ok(())
}

/// Take the instance handle out of `obj`, leaving zero
///
/// # Safety
/// `obj` must be a live object.
pub unsafe fn take_instance_handle(obj: ObjPtr) -> Option<OwnershipHandle> {
    let offset = instance_handle_offset(type_of(obj))?;
    let handle = OwnershipHandle::from_raw(read_word(obj, offset));
    write_word(obj, offset, 0);
    handle
}

// ============================================================================
// Slots
// ============================================================================

/// Deallocator of produced types
unsafe extern "C" fn meta_dealloc(tp: ObjPtr) {
    if let Some(handle) = type_handle(tp) {
        set_type_handle(tp, None);
        if let Err(err) = handles::free(handle) {
            warn!(event = "type_handle_free", type_name = %typeobj::name(tp), error = %err);
        }
    }
    typeobj::type_dealloc(tp);
}

/// Static properties and fields are assigned through their descriptor
unsafe extern "C" fn meta_setattro(tp: ObjPtr, attr: ObjPtr, value: ObjPtr) -> c_int {
    guard_status("tp_setattro", || {
        if let Some(key) = string::as_str(attr) {
            let descr = typeobj::lookup(tp, key);
            if !descr.is_null() && members::is_static_data_descriptor(descr) {
                let setter: Option<ObjObjArgProc> =
                    typeobj::slot(type_of(descr), offsets().tp_descr_set);
                if let Some(set) = setter {
                    if value.is_null() {
                        return Err(BridgeError::Binding(format!(
                            "cannot delete static member '{}'",
                            key
                        )));
                    }
                    return Ok(set(descr, ptr::null_mut(), value));
                }
            }
        }
        Ok(typeobj::type_setattro(tp, attr, value))
    })
}

unsafe fn check_assignable(cls: ObjPtr, candidate_type: ObjPtr, host_obj: Option<ObjPtr>) -> bool {
    if let (Some(obj), Some(desc)) = (host_obj, descriptors::descriptor_of(cls)) {
        if let Some(host) = descriptors::host_object_of(obj) {
            return host.host_type().is_assignable_to(&desc.host);
        }
    }
    if let (Some(cls_desc), Some(sub_desc)) = (
        descriptors::descriptor_of(cls),
        nearest_bridge_type(candidate_type).and_then(|t| descriptors::descriptor_of(t)),
    ) {
        if sub_desc.host.is_assignable_to(&cls_desc.host) {
            return true;
        }
    }
    typeobj::is_subtype(candidate_type, cls)
}

/// `cls.__instancecheck__(obj)`: host assignability for bridged objects
unsafe extern "C" fn instancecheck(cls: ObjPtr, obj: ObjPtr) -> ObjPtr {
    guard_object("__instancecheck__", || {
        Ok(builtins::bool_from(check_assignable(cls, type_of(obj), Some(obj))))
    })
}

/// `cls.__subclasscheck__(sub)`
unsafe extern "C" fn subclasscheck(cls: ObjPtr, sub: ObjPtr) -> ObjPtr {
    guard_object("__subclasscheck__", || {
        if !typeobj::is_type(sub) {
            return Err(BridgeError::Binding(String::from(
                "issubclass() arg 1 must be a class",
            )));
        }
        Ok(builtins::bool_from(check_assignable(cls, sub, None)))
    })
}
