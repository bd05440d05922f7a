//! Builtin types and singletons
//!
//! Design: All builtin type objects are immortal and allocated once.
//! Bootstrap runs in two phases: allocate and configure every type, then
//! publish the registry and ready them. Readying needs tuples, dicts and
//! strings, so the registry must be visible before the first `type_ready`.

pub mod dict;
pub mod exceptions;
pub mod function;
pub mod list;
pub mod module;
pub mod numbers;
pub mod payload;
pub mod string;
pub mod tuple;

#[cfg(test)]
mod tests;

pub use payload::{payload, payload_dealloc, set_payload, Payload};

use crate::allocator::mem_alloc;
use crate::errors::{ptr_or_null, ExcKind};
use crate::layout::{offsets, OBJECT_HEADER_SIZE};
use crate::logging::{debug, error};
use crate::object::{new_ref, ObjPtr, RawObject, SharedPtr, IMMORTAL_REFCNT};
use crate::typeobj::{self, set, TypeFlags};
use once_cell::sync::OnceCell;
use std::ffi::c_int;
use std::sync::Once;

/// Registry of builtin types and singletons
pub struct Builtins {
    pub object: SharedPtr,
    pub type_: SharedPtr,
    pub none_type: SharedPtr,
    pub not_implemented_type: SharedPtr,
    pub int: SharedPtr,
    pub bool_: SharedPtr,
    pub float: SharedPtr,
    pub str_: SharedPtr,
    pub tuple: SharedPtr,
    pub list: SharedPtr,
    pub dict: SharedPtr,
    pub function: SharedPtr,
    pub method_descriptor: SharedPtr,
    pub module: SharedPtr,
    pub none: SharedPtr,
    pub not_implemented: SharedPtr,
    pub true_: SharedPtr,
    pub false_: SharedPtr,
    pub exceptions: Vec<(ExcKind, SharedPtr)>,
}

static BUILTINS: OnceCell<Builtins> = OnceCell::new();
static BOOT: Once = Once::new();
static BOOT_FAILURE: OnceCell<String> = OnceCell::new();

/// Registry access, bootstrapping on first use
pub fn registry() -> &'static Builtins {
    if let Some(b) = BUILTINS.get() {
        return b;
    }
    BOOT.call_once(|| unsafe {
        if let Err(reason) = bootstrap() {
            let _ = BOOT_FAILURE.set(reason);
        }
    });
    match BUILTINS.get() {
        Some(b) => b,
        None => unreachable!("bootstrap publishes the registry"),
    }
}

/// Why bootstrap failed, if it did
pub fn bootstrap_failure() -> Option<&'static str> {
    registry();
    BOOT_FAILURE.get().map(String::as_str)
}

/// Allocate an immortal builtin type
unsafe fn static_type(
    name: &'static str,
    meta: ObjPtr,
    base: ObjPtr,
    basicsize: usize,
    flags: TypeFlags,
) -> ObjPtr {
    let off = offsets();
    let tp = typeobj::alloc_static_type(meta, name);
    set(tp, off.tp_base, base as usize);
    set(tp, off.tp_basicsize, basicsize);
    typeobj::set_flags(tp, flags);
    tp
}

/// Allocate an immortal singleton instance of `tp`
unsafe fn static_instance(tp: ObjPtr, payload: Option<Payload>) -> ObjPtr {
    let obj = mem_alloc(typeobj::basicsize(tp)) as *mut RawObject;
    assert!(!obj.is_null(), "bootstrap allocation failed");
    (*obj).ob_refcnt = IMMORTAL_REFCNT;
    (*obj).ob_type = tp;
    if let Some(p) = payload {
        set_payload(obj, p);
    }
    obj
}

unsafe fn bootstrap() -> Result<(), String> {
    let off = offsets();
    let header = OBJECT_HEADER_SIZE;
    let with_payload = header + crate::layout::WORD;

    let type_t = typeobj::alloc_static_type(std::ptr::null_mut(), "type");
    let object_t = static_type("object", type_t, std::ptr::null_mut(), header, TypeFlags::BASETYPE);
    set(type_t, off.tp_base, object_t as usize);
    set(type_t, off.tp_basicsize, off.type_basicsize);
    typeobj::set_flags(type_t, TypeFlags::BASETYPE | TypeFlags::TYPE_SUBCLASS);

    configure_object(object_t);
    configure_type(type_t);

    let none_t = static_type("NoneType", type_t, object_t, header, TypeFlags::DEFAULT);
    set(none_t, off.tp_repr, none_repr as usize);
    set(none_t, off.nb_bool, none_bool as usize);
    let not_impl_t = static_type("NotImplementedType", type_t, object_t, header, TypeFlags::DEFAULT);
    set(not_impl_t, off.tp_repr, not_implemented_repr as usize);

    let int_t = static_type("int", type_t, object_t, with_payload, TypeFlags::BASETYPE);
    numbers::configure_int(int_t);
    let bool_t = static_type("bool", type_t, int_t, with_payload, TypeFlags::DEFAULT);
    numbers::configure_bool(bool_t);
    let float_t = static_type("float", type_t, object_t, with_payload, TypeFlags::DEFAULT);
    numbers::configure_float(float_t);
    let str_t = static_type("str", type_t, object_t, with_payload, TypeFlags::DEFAULT);
    string::configure(str_t);
    let tuple_t = static_type("tuple", type_t, object_t, with_payload, TypeFlags::HAVE_GC);
    tuple::configure(tuple_t);
    let list_t = static_type("list", type_t, object_t, with_payload, TypeFlags::HAVE_GC);
    list::configure(list_t);
    let dict_t = static_type("dict", type_t, object_t, with_payload, TypeFlags::HAVE_GC);
    dict::configure(dict_t);
    let function_t = static_type(
        "builtin_function_or_method",
        type_t,
        object_t,
        with_payload,
        TypeFlags::HAVE_GC,
    );
    function::configure_function(function_t);
    let descr_t = static_type("method_descriptor", type_t, object_t, with_payload, TypeFlags::HAVE_GC);
    function::configure_descriptor(descr_t);
    let module_t = static_type(
        "module",
        type_t,
        object_t,
        module::MODULE_BASICSIZE,
        TypeFlags::BASETYPE | TypeFlags::HAVE_GC,
    );
    module::configure(module_t);

    let exception_types = exceptions::allocate(type_t, object_t);

    let registry = Builtins {
        object: object_t.into(),
        type_: type_t.into(),
        none_type: none_t.into(),
        not_implemented_type: not_impl_t.into(),
        int: int_t.into(),
        bool_: bool_t.into(),
        float: float_t.into(),
        str_: str_t.into(),
        tuple: tuple_t.into(),
        list: list_t.into(),
        dict: dict_t.into(),
        function: function_t.into(),
        method_descriptor: descr_t.into(),
        module: module_t.into(),
        none: static_instance(none_t, None).into(),
        not_implemented: static_instance(not_impl_t, None).into(),
        true_: static_instance(bool_t, Some(Payload::Int(1))).into(),
        false_: static_instance(bool_t, Some(Payload::Int(0))).into(),
        exceptions: exception_types
            .iter()
            .map(|(kind, tp)| (*kind, SharedPtr(*tp)))
            .collect(),
    };
    if BUILTINS.set(registry).is_err() {
        return Err(String::from("builtin registry published twice"));
    }

    let mut all = vec![
        object_t, type_t, none_t, not_impl_t, int_t, bool_t, float_t, str_t, tuple_t, list_t,
        dict_t, function_t, descr_t, module_t,
    ];
    all.extend(exception_types.iter().map(|(_, tp)| *tp));
    for tp in all {
        if typeobj::type_ready(tp).is_err() {
            crate::errors::clear();
            let type_name = typeobj::name(tp);
            error!(event = "builtin_not_ready", type_name = %type_name, "Builtin type failed to ready");
            return Err(format!("builtin type '{}' failed to ready", type_name));
        }
    }
    debug!(event = "builtins_ready", "Builtin types ready");
    Ok(())
}

unsafe fn configure_object(tp: ObjPtr) {
    let off = offsets();
    set(tp, off.tp_dealloc, typeobj::object_dealloc as usize);
    set(tp, off.tp_repr, typeobj::object_repr as usize);
    set(tp, off.tp_str, typeobj::object_str as usize);
    set(tp, off.tp_hash, typeobj::object_hash as usize);
    set(tp, off.tp_getattro, typeobj::generic_getattr as usize);
    set(tp, off.tp_setattro, typeobj::generic_setattr as usize);
    set(tp, off.tp_richcompare, typeobj::object_richcompare as usize);
    set(tp, off.tp_init, typeobj::object_init as usize);
    set(tp, off.tp_alloc, typeobj::generic_alloc_slot as usize);
    set(tp, off.tp_new, typeobj::generic_new as usize);
    set(tp, off.tp_free, typeobj::object_free as usize);
}

unsafe fn configure_type(tp: ObjPtr) {
    let off = offsets();
    set(tp, off.tp_dealloc, typeobj::type_dealloc as usize);
    set(tp, off.tp_repr, typeobj::type_repr as usize);
    set(tp, off.tp_call, typeobj::type_call as usize);
    set(tp, off.tp_getattro, typeobj::type_getattro as usize);
    set(tp, off.tp_setattro, typeobj::type_setattro as usize);
    set(tp, off.tp_alloc, typeobj::generic_alloc_slot as usize);
    set(tp, off.tp_free, typeobj::object_free as usize);
}

unsafe extern "C" fn none_repr(_obj: ObjPtr) -> ObjPtr {
    ptr_or_null(string::new("None"))
}

unsafe extern "C" fn none_bool(_obj: ObjPtr) -> c_int {
    0
}

unsafe extern "C" fn not_implemented_repr(_obj: ObjPtr) -> ObjPtr {
    ptr_or_null(string::new("NotImplemented"))
}

// ============================================================================
// Accessors
// ============================================================================

pub fn object_type() -> ObjPtr {
    registry().object.get()
}

pub fn type_type() -> ObjPtr {
    registry().type_.get()
}

pub fn none_type() -> ObjPtr {
    registry().none_type.get()
}

pub fn int_type() -> ObjPtr {
    registry().int.get()
}

pub fn bool_type() -> ObjPtr {
    registry().bool_.get()
}

pub fn float_type() -> ObjPtr {
    registry().float.get()
}

pub fn str_type() -> ObjPtr {
    registry().str_.get()
}

pub fn tuple_type() -> ObjPtr {
    registry().tuple.get()
}

pub fn list_type() -> ObjPtr {
    registry().list.get()
}

pub fn dict_type() -> ObjPtr {
    registry().dict.get()
}

pub fn function_type() -> ObjPtr {
    registry().function.get()
}

pub fn method_descriptor_type() -> ObjPtr {
    registry().method_descriptor.get()
}

pub fn module_type() -> ObjPtr {
    registry().module.get()
}

/// The `None` singleton (borrowed)
pub fn none() -> ObjPtr {
    registry().none.get()
}

/// New reference to `None`
///
/// # Safety
/// The global lock must be held.
pub unsafe fn none_ref() -> ObjPtr {
    new_ref(none())
}

/// New reference to `True` or `False`
///
/// # Safety
/// The global lock must be held.
pub unsafe fn bool_from(value: bool) -> ObjPtr {
    let b = registry();
    new_ref(if value { b.true_.get() } else { b.false_.get() })
}

/// New reference to `NotImplemented`
///
/// # Safety
/// The global lock must be held.
pub unsafe fn not_implemented() -> ObjPtr {
    new_ref(registry().not_implemented.get())
}

pub fn is_none(obj: ObjPtr) -> bool {
    obj == none()
}

pub fn is_not_implemented(obj: ObjPtr) -> bool {
    obj == registry().not_implemented.get()
}
