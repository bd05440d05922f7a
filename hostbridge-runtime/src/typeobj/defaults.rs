//! Default slot implementations
//!
//! These are the values an ordinary subclass receives and the values a
//! type is restored to when an embedder withdraws its own slots.

use super::{
    base, dealloc_slot, dictoffset, flags, free_slot, get, is_heap_type, lookup, name, slot,
    type_dict, type_modified, AllocFunc, Inquiry, ObjObjArgProc, TernaryFunc, TypeFlags,
    UnaryFunc, VisitProc,
};
use crate::allocator::mem_free;
use crate::builtins::{self, dict, string};
use crate::errors::{self, ptr_or_null, status, ExcKind, RtResult};
use crate::layout::offsets;
use crate::object::{clear_slot, decref, field_slot, new_ref, type_of, ObjPtr};
use std::ffi::{c_int, c_void};
use std::ptr;

// ============================================================================
// Instance dict helpers
// ============================================================================

/// Address of the instance dict slot, null when the type has none
///
/// # Safety
/// `obj` must be a live object.
pub unsafe fn dict_slot(obj: ObjPtr) -> *mut ObjPtr {
    let offset = dictoffset(type_of(obj));
    if offset == 0 {
        ptr::null_mut()
    } else {
        field_slot(obj, offset)
    }
}

/// Instance dict (borrowed), created on demand
///
/// # Safety
/// `obj` must be a live object.
pub unsafe fn instance_dict(obj: ObjPtr, create: bool) -> RtResult<ObjPtr> {
    let slot = dict_slot(obj);
    if slot.is_null() {
        return Ok(ptr::null_mut());
    }
    if (*slot).is_null() && create {
        *slot = dict::new()?;
    }
    Ok(*slot)
}

fn attr_name<'a>(name: ObjPtr) -> RtResult<&'a str> {
    unsafe { string::as_str(name) }
        .ok_or_else(|| errors::raise(ExcKind::TypeError, "attribute name must be string"))
}

// ============================================================================
// Lifetime
// ============================================================================

/// Return instance memory to the allocator
///
/// # Safety
/// `p` must be an object allocated by the runtime allocator.
pub unsafe extern "C" fn object_free(p: *mut c_void) {
    mem_free(p as *mut u8);
}

/// Deallocation for the root object type
///
/// # Safety
/// `obj` must be an object whose refcount just reached zero.
pub unsafe extern "C" fn object_dealloc(obj: ObjPtr) {
    match free_slot(type_of(obj)) {
        Some(free) => free(obj as *mut c_void),
        None => object_free(obj as *mut c_void),
    }
}

/// Run the teardown of the nearest builtin ancestor
///
/// Heap types never add native state of their own, so skipping them is
/// what keeps chained subtype deallocation from re-entering itself.
///
/// # Safety
/// `obj` must be an object being destroyed.
pub unsafe fn native_base_dealloc(obj: ObjPtr) {
    let mut tp = type_of(obj);
    while is_heap_type(tp) && !base(tp).is_null() {
        tp = base(tp);
    }
    match dealloc_slot(tp) {
        Some(f) if f as usize != subtype_dealloc as usize => f(obj),
        _ => object_dealloc(obj),
    }
}

/// Deallocation for heap subtypes: drop the dict, run the builtin base
/// teardown, release the type reference
///
/// # Safety
/// `obj` must be an object whose refcount just reached zero.
pub unsafe extern "C" fn subtype_dealloc(obj: ObjPtr) {
    let tp = type_of(obj);
    let slot = dict_slot(obj);
    if !slot.is_null() {
        clear_slot(slot);
    }
    native_base_dealloc(obj);
    if is_heap_type(tp) {
        decref(tp);
    }
}

/// Visit the instance dict and the heap type
///
/// # Safety
/// `obj` must be a live object.
pub unsafe extern "C" fn subtype_traverse(obj: ObjPtr, visit: VisitProc, arg: *mut c_void) -> c_int {
    let slot = dict_slot(obj);
    if !slot.is_null() && !(*slot).is_null() {
        let rc = visit(*slot, arg);
        if rc != 0 {
            return rc;
        }
    }
    let tp = type_of(obj);
    if is_heap_type(tp) {
        return visit(tp, arg);
    }
    0
}

/// Drop references that could form cycles (the instance dict)
///
/// # Safety
/// `obj` must be a live object.
pub unsafe extern "C" fn subtype_clear(obj: ObjPtr) -> c_int {
    let slot = dict_slot(obj);
    if !slot.is_null() {
        clear_slot(slot);
    }
    0
}

// ============================================================================
// Construction
// ============================================================================

/// # Safety
/// `tp` must be a ready type object.
pub unsafe extern "C" fn generic_alloc_slot(tp: ObjPtr, nitems: isize) -> ObjPtr {
    ptr_or_null(super::generic_alloc(tp, nitems))
}

/// Allocate through the type's `tp_alloc`, ignoring arguments
///
/// # Safety
/// `tp` must be a ready type object.
pub unsafe extern "C" fn generic_new(tp: ObjPtr, _args: ObjPtr, _kwargs: ObjPtr) -> ObjPtr {
    match slot::<AllocFunc>(tp, offsets().tp_alloc) {
        Some(alloc) => alloc(tp, 0),
        None => generic_alloc_slot(tp, 0),
    }
}

/// # Safety
/// Accepts any object.
pub unsafe extern "C" fn object_init(_obj: ObjPtr, _args: ObjPtr, _kwargs: ObjPtr) -> c_int {
    0
}

/// `tp_call` of `type`: allocate through `tp_new`, then run `tp_init`
///
/// # Safety
/// `tp` must be a ready type object; `args` a tuple.
pub unsafe extern "C" fn type_call(tp: ObjPtr, args: ObjPtr, kwargs: ObjPtr) -> ObjPtr {
    let off = offsets();
    let Some(new) = slot::<TernaryFunc>(tp, off.tp_new) else {
        errors::raise(
            ExcKind::TypeError,
            &format!("cannot create '{}' instances", name(tp)),
        );
        return ptr::null_mut();
    };
    let obj = new(tp, args, kwargs);
    if obj.is_null() {
        return obj;
    }
    if !super::is_subtype(type_of(obj), tp) {
        return obj;
    }
    if let Some(init) = slot::<ObjObjArgProc>(type_of(obj), off.tp_init) {
        if init(obj, args, kwargs) < 0 {
            decref(obj);
            return ptr::null_mut();
        }
    }
    obj
}

/// Deallocation for heap type objects
///
/// # Safety
/// `tp` must be a heap type whose refcount just reached zero.
pub unsafe extern "C" fn type_dealloc(tp: ObjPtr) {
    let off = offsets();
    debug_assert!(is_heap_type(tp), "static types are immortal");
    for field in [
        off.ht_name,
        off.ht_qualname,
        off.tp_dict,
        off.tp_bases,
        off.tp_mro,
        off.tp_base,
    ] {
        clear_slot(field_slot(tp, field));
    }
    let meta = type_of(tp);
    match free_slot(meta) {
        Some(free) => free(tp as *mut c_void),
        None => object_free(tp as *mut c_void),
    }
    if is_heap_type(meta) {
        decref(meta);
    }
}

// ============================================================================
// Attribute access
// ============================================================================

unsafe fn descr_get_of(descr: ObjPtr) -> Option<TernaryFunc> {
    slot::<TernaryFunc>(type_of(descr), offsets().tp_descr_get)
}

unsafe fn is_data_descriptor(descr: ObjPtr) -> bool {
    get(type_of(descr), offsets().tp_descr_set) != 0
}

unsafe fn getattr_impl(obj: ObjPtr, attr: ObjPtr) -> RtResult<ObjPtr> {
    let key = attr_name(attr)?;
    let tp = type_of(obj);
    let descr = lookup(tp, key);

    let mut getter = None;
    if !descr.is_null() {
        getter = descr_get_of(descr);
        if let Some(f) = getter {
            if is_data_descriptor(descr) {
                return errors::check_ptr(f(descr, obj, tp));
            }
        }
    }

    let dict = instance_dict(obj, false)?;
    if !dict.is_null() {
        let value = dict::get_item_str(dict, key);
        if !value.is_null() {
            return Ok(new_ref(value));
        }
    }

    if let Some(f) = getter {
        return errors::check_ptr(f(descr, obj, tp));
    }
    if !descr.is_null() {
        return Ok(new_ref(descr));
    }

    Err(errors::raise(
        ExcKind::AttributeError,
        &format!("'{}' object has no attribute '{}'", name(tp), key),
    ))
}

/// Standard attribute lookup: data descriptors, instance dict, then
/// non-data descriptors and plain class attributes
///
/// # Safety
/// `obj` must be a live object, `attr` a string.
pub unsafe extern "C" fn generic_getattr(obj: ObjPtr, attr: ObjPtr) -> ObjPtr {
    ptr_or_null(getattr_impl(obj, attr))
}

unsafe fn setattr_impl(obj: ObjPtr, attr: ObjPtr, value: ObjPtr) -> RtResult<()> {
    let key = attr_name(attr)?;
    let tp = type_of(obj);
    let descr = lookup(tp, key);
    if !descr.is_null() {
        if let Some(set) = slot::<ObjObjArgProc>(type_of(descr), offsets().tp_descr_set) {
            return errors::check_status(set(descr, obj, value));
        }
    }

    let dict = instance_dict(obj, true)?;
    if dict.is_null() {
        return Err(errors::raise(
            ExcKind::AttributeError,
            &format!("'{}' object attribute '{}' is read-only", name(tp), key),
        ));
    }
    if value.is_null() {
        if !dict::del_item_str(dict, key) {
            return Err(errors::raise(
                ExcKind::AttributeError,
                &format!("'{}' object has no attribute '{}'", name(tp), key),
            ));
        }
        Ok(())
    } else {
        dict::set_item_str(dict, key, value)
    }
}

/// Standard attribute assignment (null `value` deletes)
///
/// # Safety
/// `obj` must be a live object, `attr` a string.
pub unsafe extern "C" fn generic_setattr(obj: ObjPtr, attr: ObjPtr, value: ObjPtr) -> c_int {
    status(setattr_impl(obj, attr, value))
}

unsafe fn type_getattr_impl(tp: ObjPtr, attr: ObjPtr) -> RtResult<ObjPtr> {
    let key = attr_name(attr)?;
    let meta = type_of(tp);

    let meta_attr = lookup(meta, key);
    let mut meta_get = None;
    if !meta_attr.is_null() {
        meta_get = descr_get_of(meta_attr);
        if let Some(f) = meta_get {
            if is_data_descriptor(meta_attr) {
                return errors::check_ptr(f(meta_attr, tp, meta));
            }
        }
    }

    let attr_obj = lookup(tp, key);
    if !attr_obj.is_null() {
        if let Some(f) = descr_get_of(attr_obj) {
            return errors::check_ptr(f(attr_obj, ptr::null_mut(), tp));
        }
        return Ok(new_ref(attr_obj));
    }

    if let Some(f) = meta_get {
        return errors::check_ptr(f(meta_attr, tp, meta));
    }
    if !meta_attr.is_null() {
        return Ok(new_ref(meta_attr));
    }

    Err(errors::raise(
        ExcKind::AttributeError,
        &format!("type object '{}' has no attribute '{}'", name(tp), key),
    ))
}

/// Attribute lookup on type objects
///
/// # Safety
/// `tp` must be a live type object, `attr` a string.
pub unsafe extern "C" fn type_getattro(tp: ObjPtr, attr: ObjPtr) -> ObjPtr {
    ptr_or_null(type_getattr_impl(tp, attr))
}

unsafe fn type_setattr_impl(tp: ObjPtr, attr: ObjPtr, value: ObjPtr) -> RtResult<()> {
    let key = attr_name(attr)?;
    if !flags(tp).contains(TypeFlags::HEAPTYPE) {
        return Err(errors::raise(
            ExcKind::TypeError,
            &format!(
                "cannot set '{}' attribute of immutable type '{}'",
                key,
                name(tp)
            ),
        ));
    }
    let dict = type_dict(tp);
    if value.is_null() {
        if !dict::del_item_str(dict, key) {
            return Err(errors::raise(
                ExcKind::AttributeError,
                &format!("type object '{}' has no attribute '{}'", name(tp), key),
            ));
        }
    } else {
        dict::set_item_str(dict, key, value)?;
    }
    type_modified(tp);
    Ok(())
}

/// Attribute assignment on heap type objects
///
/// # Safety
/// `tp` must be a live type object, `attr` a string.
pub unsafe extern "C" fn type_setattro(tp: ObjPtr, attr: ObjPtr, value: ObjPtr) -> c_int {
    status(type_setattr_impl(tp, attr, value))
}

// ============================================================================
// Representation and comparison
// ============================================================================

/// # Safety
/// `obj` must be a live object.
pub unsafe extern "C" fn object_repr(obj: ObjPtr) -> ObjPtr {
    let text = format!("<{} object at {:#x}>", name(type_of(obj)), obj as usize);
    ptr_or_null(string::new(&text))
}

/// `str()` falls back to the type's `repr`
///
/// # Safety
/// `obj` must be a live object.
pub unsafe extern "C" fn object_str(obj: ObjPtr) -> ObjPtr {
    match slot::<UnaryFunc>(type_of(obj), offsets().tp_repr) {
        Some(repr) => repr(obj),
        None => object_repr(obj),
    }
}

/// # Safety
/// `tp` must be a live type object.
pub unsafe extern "C" fn type_repr(tp: ObjPtr) -> ObjPtr {
    ptr_or_null(string::new(&format!("<class '{}'>", name(tp))))
}

/// Identity hash
///
/// # Safety
/// Accepts any pointer.
pub unsafe extern "C" fn object_hash(obj: ObjPtr) -> isize {
    ((obj as usize) >> 4) as isize
}

/// Identity equality; everything else is left to the other operand
///
/// # Safety
/// Accepts any pair of live objects.
pub unsafe extern "C" fn object_richcompare(a: ObjPtr, b: ObjPtr, op: c_int) -> ObjPtr {
    use crate::protocol::CompareOp;
    match CompareOp::from_raw(op) {
        Some(CompareOp::Eq) if a == b => builtins::bool_from(true),
        Some(CompareOp::Ne) if a == b => builtins::bool_from(false),
        _ => builtins::not_implemented(),
    }
}

/// Read the `tp_clear` of a type
///
/// # Safety
/// `tp` must be a live type object.
pub unsafe fn clear_slot_of(tp: ObjPtr) -> Option<Inquiry> {
    slot::<Inquiry>(tp, offsets().tp_clear)
}
