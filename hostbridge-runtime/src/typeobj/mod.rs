//! Type objects - field access, allocation, readiness and lookup
//!
//! Design: A type object is a run of words laid out by
//! [`crate::layout::TypeOffsets`]. Nothing in here hardcodes an offset;
//! every access goes through the installed layout so the same code serves
//! every ABI revision.

mod defaults;
mod slots;

#[cfg(test)]
mod tests;

pub use defaults::*;
pub use slots::*;

use crate::allocator::mem_alloc;
use crate::builtins::{self, dict, function, string, tuple};
use crate::errors::{self, ExcKind, RtResult};
use crate::layout::{offsets, WORD};
use crate::logging::{debug, log_type_ready};
use crate::object::{decref, incref, read_word, write_word, ObjPtr, IMMORTAL_REFCNT};
use bitflags::bitflags;
use std::ffi::{c_char, CStr};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

bitflags! {
    /// Type flags stored in `tp_flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeFlags: usize {
        /// Allocated on the heap and reference counted
        const HEAPTYPE = 1 << 9;
        /// May be used as a base type
        const BASETYPE = 1 << 10;
        /// `type_ready` has completed
        const READY = 1 << 12;
        /// `type_ready` is running
        const READYING = 1 << 13;
        /// Instances participate in traversal and must have traverse/clear
        const HAVE_GC = 1 << 14;
        /// Instances are exceptions
        const BASE_EXC_SUBCLASS = 1 << 30;
        /// Instances are type objects
        const TYPE_SUBCLASS = 1 << 31;
    }
}

impl TypeFlags {
    /// Flags every type carries before readiness
    pub const DEFAULT: TypeFlags = TypeFlags::empty();
}

static VERSION_TAG: AtomicUsize = AtomicUsize::new(1);

// ============================================================================
// Field access
// ============================================================================

/// Read a type field
///
/// # Safety
/// `tp` must be a live type object.
#[inline(always)]
pub unsafe fn get(tp: ObjPtr, offset: usize) -> usize {
    read_word(tp, offset)
}

/// Write a type field
///
/// # Safety
/// `tp` must be a live type object.
#[inline(always)]
pub unsafe fn set(tp: ObjPtr, offset: usize, value: usize) {
    write_word(tp, offset, value)
}

/// # Safety
/// `tp` must be a live type object.
#[inline]
pub unsafe fn get_ptr(tp: ObjPtr, offset: usize) -> ObjPtr {
    read_word(tp, offset) as ObjPtr
}

/// # Safety
/// `tp` must be a live type object.
#[inline]
pub unsafe fn flags(tp: ObjPtr) -> TypeFlags {
    TypeFlags::from_bits_retain(get(tp, offsets().tp_flags))
}

/// # Safety
/// `tp` must be a live type object.
#[inline]
pub unsafe fn set_flags(tp: ObjPtr, flags: TypeFlags) {
    set(tp, offsets().tp_flags, flags.bits())
}

/// # Safety
/// `tp` must be a live type object.
#[inline]
pub unsafe fn basicsize(tp: ObjPtr) -> usize {
    get(tp, offsets().tp_basicsize)
}

/// # Safety
/// `tp` must be a live type object.
#[inline]
pub unsafe fn base(tp: ObjPtr) -> ObjPtr {
    get_ptr(tp, offsets().tp_base)
}

/// # Safety
/// `tp` must be a live type object.
#[inline]
pub unsafe fn type_dict(tp: ObjPtr) -> ObjPtr {
    get_ptr(tp, offsets().tp_dict)
}

/// # Safety
/// `tp` must be a live type object.
#[inline]
pub unsafe fn dictoffset(tp: ObjPtr) -> usize {
    get(tp, offsets().tp_dictoffset)
}

/// # Safety
/// `tp` must be a live type object.
#[inline]
pub unsafe fn is_heap_type(tp: ObjPtr) -> bool {
    flags(tp).contains(TypeFlags::HEAPTYPE)
}

/// Name of a type as text
///
/// # Safety
/// `tp` must be a live type object.
pub unsafe fn name(tp: ObjPtr) -> String {
    let raw = get(tp, offsets().tp_name) as *const c_char;
    if raw.is_null() {
        return String::from("?");
    }
    CStr::from_ptr(raw).to_string_lossy().into_owned()
}

/// Version tag, bumped by [`type_modified`]
///
/// # Safety
/// `tp` must be a live type object.
pub unsafe fn version_tag(tp: ObjPtr) -> usize {
    get(tp, offsets().tp_version_tag)
}

/// Bases of a type as a vector of borrowed pointers
///
/// # Safety
/// `tp` must be a live type object.
pub unsafe fn bases(tp: ObjPtr) -> Vec<ObjPtr> {
    let bases = get_ptr(tp, offsets().tp_bases);
    if !bases.is_null() {
        return tuple::items(bases).to_vec();
    }
    let b = base(tp);
    if b.is_null() {
        Vec::new()
    } else {
        vec![b]
    }
}

/// Method resolution order as borrowed pointers
///
/// # Safety
/// `tp` must be a live type object.
pub unsafe fn mro(tp: ObjPtr) -> Vec<ObjPtr> {
    let mro = get_ptr(tp, offsets().tp_mro);
    if mro.is_null() {
        vec![tp]
    } else {
        tuple::items(mro).to_vec()
    }
}

/// Point the embedded protocol tables at their own storage
///
/// # Safety
/// `tp` must be a type object at least `type_basicsize` long.
pub unsafe fn wire_protocol_tables(tp: ObjPtr) {
    let off = offsets();
    let base = tp as usize;
    set(tp, off.tp_as_number, base + off.as_number);
    set(tp, off.tp_as_sequence, base + off.as_sequence);
    set(tp, off.tp_as_mapping, base + off.as_mapping);
    set(tp, off.tp_as_buffer, base + off.as_buffer);
}

// ============================================================================
// Subtype checks and lookup
// ============================================================================

/// True if `a` is `b` or derives from it
///
/// # Safety
/// Both must be live type objects.
pub unsafe fn is_subtype(a: ObjPtr, b: ObjPtr) -> bool {
    if a == b {
        return true;
    }
    let mro = get_ptr(a, offsets().tp_mro);
    if !mro.is_null() {
        return tuple::items(mro).contains(&b);
    }
    let mut cur = base(a);
    while !cur.is_null() {
        if cur == b {
            return true;
        }
        cur = base(cur);
    }
    false
}

/// True if `tp` is a type object (its metatype derives from `type`)
///
/// # Safety
/// `obj` must be a live object.
pub unsafe fn is_type(obj: ObjPtr) -> bool {
    let meta = crate::object::type_of(obj);
    meta == builtins::type_type() || flags(meta).contains(TypeFlags::TYPE_SUBCLASS)
}

/// Look `name` up along the MRO of `tp` (borrowed result, null if absent)
///
/// # Safety
/// `tp` must be a live type object.
pub unsafe fn lookup(tp: ObjPtr, name: &str) -> ObjPtr {
    for t in mro(tp) {
        let dict = type_dict(t);
        if dict.is_null() {
            continue;
        }
        let found = dict::get_item_str(dict, name);
        if !found.is_null() {
            return found;
        }
    }
    ptr::null_mut()
}

// ============================================================================
// Allocation
// ============================================================================

/// Allocate an instance of `tp` with `nitems` trailing items
///
/// # Safety
/// `tp` must be a live, ready type object.
pub unsafe fn generic_alloc(tp: ObjPtr, nitems: isize) -> RtResult<ObjPtr> {
    let off = offsets();
    let itemsize = get(tp, off.tp_itemsize);
    let size = basicsize(tp) + itemsize * nitems.max(0) as usize;
    let obj = mem_alloc(size) as ObjPtr;
    if obj.is_null() {
        return Err(errors::raise(ExcKind::MemoryError, "out of memory"));
    }
    (*obj).ob_refcnt = 1;
    (*obj).ob_type = tp;
    if is_heap_type(tp) {
        incref(tp);
    }
    Ok(obj)
}

/// Allocate a blank type object whose metatype is `meta`
///
/// The caller fills in name, base and sizes before calling [`type_ready`].
///
/// # Safety
/// `meta` must be `type` or a ready subtype of it.
pub unsafe fn alloc_type_object(meta: ObjPtr) -> RtResult<ObjPtr> {
    let tp = generic_alloc(meta, 0)?;
    wire_protocol_tables(tp);
    Ok(tp)
}

/// Allocate an immortal builtin type object
///
/// # Safety
/// Used during bootstrap only; `meta` may be null for `type` itself.
pub(crate) unsafe fn alloc_static_type(meta: ObjPtr, type_name: &'static str) -> ObjPtr {
    let off = offsets();
    let tp = mem_alloc(off.type_basicsize) as ObjPtr;
    assert!(!tp.is_null(), "bootstrap allocation failed");
    (*tp).ob_refcnt = IMMORTAL_REFCNT;
    (*tp).ob_type = if meta.is_null() { tp } else { meta };
    let c_name = std::ffi::CString::new(type_name).unwrap_or_default();
    set(tp, off.tp_name, c_name.into_raw() as usize);
    wire_protocol_tables(tp);
    tp
}

/// Give a heap type its name, stored in the type itself
///
/// `tp_name` points into the string object held by `ht_name`, so the
/// name lives exactly as long as the type.
///
/// # Safety
/// `tp` must be a heap type object without a name yet.
pub unsafe fn set_heap_name(tp: ObjPtr, type_name: &str) -> RtResult<()> {
    let off = offsets();
    let name_obj = string::new(type_name)?;
    set(tp, off.tp_name, string::as_c_ptr(name_obj) as usize);
    set(tp, off.ht_name, name_obj as usize);
    incref(name_obj);
    set(tp, off.ht_qualname, name_obj as usize);
    Ok(())
}

/// Create and ready a plain heap type deriving from `base_tp`
///
/// Reserves an instance dict the way a class statement would. Used to
/// observe the slot values the runtime gives an ordinary subclass.
///
/// # Safety
/// `base_tp` must be a ready type carrying `BASETYPE`.
pub unsafe fn new_heap_type(type_name: &str, base_tp: ObjPtr) -> RtResult<ObjPtr> {
    if !flags(base_tp).contains(TypeFlags::BASETYPE) {
        return Err(errors::raise(
            ExcKind::TypeError,
            &format!("type '{}' is not an acceptable base type", name(base_tp)),
        ));
    }

    let off = offsets();
    let tp = alloc_type_object(builtins::type_type())?;
    set_heap_name(tp, type_name)?;
    incref(base_tp);
    set(tp, off.tp_base, base_tp as usize);

    let mut size = basicsize(base_tp);
    if dictoffset(base_tp) == 0 {
        set(tp, off.tp_dictoffset, size);
        size += WORD;
    }
    set(tp, off.tp_basicsize, size);
    set(tp, off.tp_dealloc, subtype_dealloc as usize);
    set(tp, off.tp_traverse, subtype_traverse as usize);
    set(tp, off.tp_clear, subtype_clear as usize);
    set_flags(
        tp,
        TypeFlags::HEAPTYPE | TypeFlags::BASETYPE | TypeFlags::HAVE_GC,
    );

    if let Err(err) = type_ready(tp) {
        decref(tp);
        return Err(err);
    }
    Ok(tp)
}

// ============================================================================
// Readiness
// ============================================================================

/// Finish a type: inherit from its base, build the MRO and method table
///
/// Safe to call twice. A type with a pre-populated `tp_dict` keeps it.
///
/// # Safety
/// `tp` must be a type object whose layout fields are final.
pub unsafe fn type_ready(tp: ObjPtr) -> RtResult<()> {
    let off = offsets();
    let fl = flags(tp);
    if fl.contains(TypeFlags::READY) {
        return Ok(());
    }
    debug_assert!(!fl.contains(TypeFlags::READYING), "recursive type_ready");
    set_flags(tp, fl | TypeFlags::READYING);

    let result = ready_inner(tp);
    let fl = flags(tp) - TypeFlags::READYING;
    match result {
        Ok(()) => {
            set_flags(tp, fl | TypeFlags::READY);
            set(tp, off.tp_version_tag, VERSION_TAG.fetch_add(1, Ordering::Relaxed));
            log_type_ready(&name(tp), basicsize(tp));
            Ok(())
        }
        Err(err) => {
            set_flags(tp, fl);
            Err(err)
        }
    }
}

unsafe fn ready_inner(tp: ObjPtr) -> RtResult<()> {
    let off = offsets();
    let object = builtins::object_type();

    let mut base_tp = base(tp);
    if base_tp.is_null() && tp != object {
        base_tp = object;
        incref(base_tp);
        set(tp, off.tp_base, base_tp as usize);
    }
    if !base_tp.is_null() {
        type_ready(base_tp)?;
    }

    if get_ptr(tp, off.tp_bases).is_null() {
        let items = if base_tp.is_null() { vec![] } else { vec![base_tp] };
        set(tp, off.tp_bases, tuple::from_borrowed(&items)? as usize);
    }

    for b in bases(tp) {
        type_ready(b)?;
        if !flags(b).contains(TypeFlags::BASETYPE) {
            return Err(errors::raise(
                ExcKind::TypeError,
                &format!("type '{}' is not an acceptable base type", name(b)),
            ));
        }
    }

    if type_dict(tp).is_null() {
        set(tp, off.tp_dict, dict::new()? as usize);
    }
    add_methods(tp)?;

    if !base_tp.is_null() {
        inherit_layout(tp, base_tp)?;
        inherit_slots(tp, base_tp);
    }

    if flags(tp).contains(TypeFlags::HAVE_GC)
        && (get(tp, off.tp_traverse) == 0 || get(tp, off.tp_clear) == 0)
    {
        return Err(errors::raise(
            ExcKind::SystemError,
            &format!(
                "type '{}' has the GC flag but no traverse or clear slot",
                name(tp)
            ),
        ));
    }

    let order = compute_mro(tp)?;
    let mro_tuple = tuple::from_borrowed(&order)?;
    let old = get_ptr(tp, off.tp_mro);
    set(tp, off.tp_mro, mro_tuple as usize);
    decref(old);

    if is_heap_type(tp) && dict::get_item_str(type_dict(tp), "__doc__").is_null() {
        dict::set_item_str(type_dict(tp), "__doc__", builtins::none())?;
    }
    Ok(())
}

unsafe fn inherit_layout(tp: ObjPtr, base_tp: ObjPtr) -> RtResult<()> {
    let off = offsets();
    let base_size = basicsize(base_tp);
    let size = basicsize(tp);
    if size == 0 {
        set(tp, off.tp_basicsize, base_size);
    } else if size < base_size {
        return Err(errors::raise(
            ExcKind::TypeError,
            &format!(
                "type '{}' basicsize {} is smaller than base '{}' ({})",
                name(tp),
                size,
                name(base_tp),
                base_size
            ),
        ));
    }
    for field in [off.tp_itemsize, off.tp_dictoffset, off.tp_weaklistoffset] {
        if get(tp, field) == 0 {
            set(tp, field, get(base_tp, field));
        }
    }
    let inherited = flags(base_tp) & (TypeFlags::HAVE_GC | TypeFlags::BASE_EXC_SUBCLASS | TypeFlags::TYPE_SUBCLASS);
    set_flags(tp, flags(tp) | inherited);
    Ok(())
}

unsafe fn inherit_slots(tp: ObjPtr, base_tp: ObjPtr) {
    for (_, offset) in offsets().slot_offsets() {
        if get(tp, offset) == 0 {
            set(tp, offset, get(base_tp, offset));
        }
    }
}

unsafe fn add_methods(tp: ObjPtr) -> RtResult<()> {
    let table = get(tp, offsets().tp_methods) as *const function::MethodDef;
    if table.is_null() {
        return Ok(());
    }
    let dict = type_dict(tp);
    let mut def = table;
    while !(*def).ml_name.is_null() {
        let method_name = CStr::from_ptr((*def).ml_name).to_string_lossy().into_owned();
        if dict::get_item_str(dict, &method_name).is_null() {
            let descr = function::new_method_descriptor(def)?;
            let result = dict::set_item_str(dict, &method_name, descr);
            decref(descr);
            result?;
        }
        def = def.add(1);
    }
    Ok(())
}

/// C3 linearization of `tp` over its bases
unsafe fn compute_mro(tp: ObjPtr) -> RtResult<Vec<ObjPtr>> {
    let direct = bases(tp);
    let mut seqs: Vec<Vec<ObjPtr>> = direct.iter().map(|b| mro(*b)).collect();
    seqs.push(direct);

    let mut result = vec![tp];
    loop {
        seqs.retain(|s| !s.is_empty());
        if seqs.is_empty() {
            return Ok(result);
        }
        let candidate = seqs
            .iter()
            .map(|s| s[0])
            .find(|head| !seqs.iter().any(|s| s[1..].contains(head)));
        let Some(next) = candidate else {
            return Err(errors::raise(
                ExcKind::TypeError,
                "Cannot create a consistent method resolution order (MRO)",
            ));
        };
        result.push(next);
        for s in seqs.iter_mut() {
            if s[0] == next {
                s.remove(0);
            }
        }
    }
}

/// Invalidate cached lookups after a type was changed in place
///
/// # Safety
/// `tp` must be a live type object.
pub unsafe fn type_modified(tp: ObjPtr) {
    let tag = VERSION_TAG.fetch_add(1, Ordering::Relaxed);
    set(tp, offsets().tp_version_tag, tag);
    debug!(event = "type_modified", type_name = %name(tp), version = tag);
}
