//! Callable builtins: native functions, closures and method descriptors
//!
//! A `MethodDef` table hangs off `tp_methods`; `type_ready` turns each row
//! into a method descriptor in the type dict. Binding a descriptor to an
//! instance yields a builtin function that carries the receiver.

use super::payload::{payload, payload_dealloc, set_payload, Payload};
use super::{function_type, method_descriptor_type, string, tuple};
use crate::errors::{self, ptr_or_null, ExcKind, RtResult};
use crate::layout::offsets;
use crate::object::{decref, incref, new_ref, type_of, ObjPtr};
use crate::typeobj::{self, set, BinaryFunc, VisitProc};
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::fmt;
use std::ptr;
use std::sync::Arc;

/// Arguments arrive packed in a tuple
pub const METH_VARARGS: c_int = 0x0001;
/// Exactly one argument, passed unpacked
pub const METH_O: c_int = 0x0008;

/// One row of a `tp_methods` table; a row with a null name terminates it
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MethodDef {
    pub ml_name: *const c_char,
    pub ml_meth: Option<BinaryFunc>,
    pub ml_flags: c_int,
    pub ml_doc: *const c_char,
}

impl MethodDef {
    /// Table terminator
    pub const SENTINEL: MethodDef = MethodDef {
        ml_name: ptr::null(),
        ml_meth: None,
        ml_flags: 0,
        ml_doc: ptr::null(),
    };
}

/// Rust-side callable body
pub type ClosureFn = dyn Fn(&[ObjPtr]) -> RtResult<ObjPtr> + Send + Sync;

/// What a function object runs when called
pub enum FunctionBody {
    Native {
        name: CString,
        meth: BinaryFunc,
        flags: c_int,
        receiver: ObjPtr,
    },
    Closure {
        name: String,
        f: Arc<ClosureFn>,
    },
}

impl fmt::Debug for FunctionBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionBody").field("name", &self.name()).finish()
    }
}

impl FunctionBody {
    pub fn name(&self) -> String {
        match self {
            FunctionBody::Native { name, .. } => name.to_string_lossy().into_owned(),
            FunctionBody::Closure { name, .. } => name.clone(),
        }
    }

    /// # Safety
    /// The global lock must be held.
    pub unsafe fn release(self) {
        if let FunctionBody::Native { receiver, .. } = self {
            decref(receiver);
        }
    }

    pub fn referents(&self) -> Vec<ObjPtr> {
        match self {
            FunctionBody::Native { receiver, .. } if !receiver.is_null() => vec![*receiver],
            _ => Vec::new(),
        }
    }
}

unsafe fn body<'a>(obj: ObjPtr) -> Option<&'a FunctionBody> {
    match payload(obj) {
        Some(Payload::Function(body)) => Some(body),
        _ => None,
    }
}

/// Method descriptor for one `MethodDef` row
///
/// Name and function pointer are copied; the table may be freed later.
///
/// # Safety
/// `def` must point at a valid, non-terminator row.
pub unsafe fn new_method_descriptor(def: *const MethodDef) -> RtResult<ObjPtr> {
    let name = CStr::from_ptr((*def).ml_name).to_owned();
    let Some(meth) = (*def).ml_meth else {
        return Err(errors::raise(
            ExcKind::SystemError,
            &format!("method '{}' has no implementation", name.to_string_lossy()),
        ));
    };
    let obj = typeobj::generic_alloc(method_descriptor_type(), 0)?;
    set_payload(
        obj,
        Payload::Function(FunctionBody::Native {
            name,
            meth,
            flags: (*def).ml_flags,
            receiver: ptr::null_mut(),
        }),
    );
    Ok(obj)
}

/// Function object running a Rust closure
///
/// # Safety
/// The global lock must be held.
pub unsafe fn new_closure<F>(name: &str, f: F) -> RtResult<ObjPtr>
where
    F: Fn(&[ObjPtr]) -> RtResult<ObjPtr> + Send + Sync + 'static,
{
    let obj = typeobj::generic_alloc(function_type(), 0)?;
    set_payload(
        obj,
        Payload::Function(FunctionBody::Closure {
            name: name.to_string(),
            f: Arc::new(f),
        }),
    );
    Ok(obj)
}

unsafe fn bind_native(descr: ObjPtr, receiver: ObjPtr) -> RtResult<ObjPtr> {
    let Some(FunctionBody::Native { name, meth, flags, .. }) = body(descr) else {
        return Err(errors::raise(ExcKind::TypeError, "descriptor has no native body"));
    };
    let obj = typeobj::generic_alloc(function_type(), 0)?;
    incref(receiver);
    set_payload(
        obj,
        Payload::Function(FunctionBody::Native {
            name: name.clone(),
            meth: *meth,
            flags: *flags,
            receiver,
        }),
    );
    Ok(obj)
}

unsafe fn invoke_native(meth: BinaryFunc, flags: c_int, receiver: ObjPtr, args: &[ObjPtr], name: &CStr) -> RtResult<ObjPtr> {
    if flags & METH_O != 0 {
        if args.len() != 1 {
            return Err(errors::raise(
                ExcKind::TypeError,
                &format!(
                    "{}() takes exactly one argument ({} given)",
                    name.to_string_lossy(),
                    args.len()
                ),
            ));
        }
        return errors::check_ptr(meth(receiver, args[0]));
    }
    let packed = tuple::from_borrowed(args)?;
    let result = meth(receiver, packed);
    decref(packed);
    errors::check_ptr(result)
}

/// Call a function object with borrowed arguments
///
/// # Safety
/// `func` must be a live function object; the global lock must be held.
pub unsafe fn call(func: ObjPtr, args: &[ObjPtr]) -> RtResult<ObjPtr> {
    match body(func) {
        Some(FunctionBody::Native { name, meth, flags, receiver }) => {
            invoke_native(*meth, *flags, *receiver, args, name)
        }
        Some(FunctionBody::Closure { f, .. }) => {
            // Clone so the body survives the call even if `func` dies in it
            let f = Arc::clone(f);
            f(args)
        }
        None => Err(errors::raise(ExcKind::TypeError, "object is not callable")),
    }
}

unsafe extern "C" fn function_call(func: ObjPtr, args: ObjPtr, _kwargs: ObjPtr) -> ObjPtr {
    ptr_or_null(call(func, tuple::items(args)))
}

unsafe extern "C" fn function_repr(func: ObjPtr) -> ObjPtr {
    let text = match body(func) {
        Some(FunctionBody::Native { name, receiver, .. }) if !receiver.is_null() => format!(
            "<built-in method {} of {} object at {:#x}>",
            name.to_string_lossy(),
            typeobj::name(type_of(*receiver)),
            *receiver as usize
        ),
        Some(b) => format!("<built-in function {}>", b.name()),
        None => String::from("<built-in function ?>"),
    };
    ptr_or_null(string::new(&text))
}

unsafe extern "C" fn descriptor_get(descr: ObjPtr, obj: ObjPtr, _tp: ObjPtr) -> ObjPtr {
    if obj.is_null() {
        return new_ref(descr);
    }
    ptr_or_null(bind_native(descr, obj))
}

unsafe extern "C" fn descriptor_call(descr: ObjPtr, args: ObjPtr, _kwargs: ObjPtr) -> ObjPtr {
    let args = tuple::items(args);
    let Some((receiver, rest)) = args.split_first() else {
        let name = body(descr).map(FunctionBody::name).unwrap_or_default();
        errors::raise(
            ExcKind::TypeError,
            &format!("descriptor '{name}' needs an argument"),
        );
        return ptr::null_mut();
    };
    match body(descr) {
        Some(FunctionBody::Native { name, meth, flags, .. }) => {
            ptr_or_null(invoke_native(*meth, *flags, *receiver, rest, name))
        }
        _ => ptr_or_null(Err(errors::raise(ExcKind::TypeError, "descriptor has no native body"))),
    }
}

unsafe extern "C" fn descriptor_repr(descr: ObjPtr) -> ObjPtr {
    let name = body(descr).map(FunctionBody::name).unwrap_or_default();
    ptr_or_null(string::new(&format!("<method '{name}'>")))
}

unsafe extern "C" fn function_traverse(obj: ObjPtr, visit: VisitProc, arg: *mut c_void) -> c_int {
    for item in body(obj).map(FunctionBody::referents).unwrap_or_default() {
        let rc = visit(item, arg);
        if rc != 0 {
            return rc;
        }
    }
    0
}

unsafe extern "C" fn function_clear(_obj: ObjPtr) -> c_int {
    0
}

pub(super) unsafe fn configure_function(tp: ObjPtr) {
    let off = offsets();
    set(tp, off.tp_dealloc, payload_dealloc as usize);
    set(tp, off.tp_traverse, function_traverse as usize);
    set(tp, off.tp_clear, function_clear as usize);
    set(tp, off.tp_call, function_call as usize);
    set(tp, off.tp_repr, function_repr as usize);
}

pub(super) unsafe fn configure_descriptor(tp: ObjPtr) {
    let off = offsets();
    set(tp, off.tp_dealloc, payload_dealloc as usize);
    set(tp, off.tp_traverse, function_traverse as usize);
    set(tp, off.tp_clear, function_clear as usize);
    set(tp, off.tp_call, descriptor_call as usize);
    set(tp, off.tp_repr, descriptor_repr as usize);
    set(tp, off.tp_descr_get, descriptor_get as usize);
}
