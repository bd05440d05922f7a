//! Abstract object protocol
//!
//! Design: Everything here dispatches through type slots, so builtin and
//! embedder-defined types behave the same. Results are owned references
//! wrapped in `RtResult`; failure leaves the error indicator set.

mod buffer;

#[cfg(test)]
mod tests;

pub use buffer::*;

use crate::builtins::{self, numbers, string, tuple};
use crate::errors::{self, ExcKind, RtResult};
use crate::layout::offsets;
use crate::object::{decref, type_of, ObjPtr};
use crate::typeobj::{
    self, slot, BinaryFunc, HashFunc, Inquiry, LenFunc, ObjObjArgProc, ObjObjProc, RichCmpFunc,
    TernaryFunc, TraverseProc, UnaryFunc,
};
use std::cmp::Ordering;
use std::ffi::{c_int, c_void};

/// Rich comparison operators, numbered as the `tp_richcompare` slot expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CompareOp {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
}

impl CompareOp {
    pub fn from_raw(op: c_int) -> Option<Self> {
        Some(match op {
            0 => CompareOp::Lt,
            1 => CompareOp::Le,
            2 => CompareOp::Eq,
            3 => CompareOp::Ne,
            4 => CompareOp::Gt,
            5 => CompareOp::Ge,
            _ => return None,
        })
    }

    #[inline]
    pub fn as_raw(self) -> c_int {
        self as c_int
    }

    /// Does `ordering` satisfy this operator?
    pub fn matches(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }

    /// Operator to try on the right operand with swapped arguments
    pub fn reflected(self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::Ne => CompareOp::Ne,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

unsafe fn type_name_of(obj: ObjPtr) -> String {
    typeobj::name(type_of(obj))
}

// ============================================================================
// Calls and attributes
// ============================================================================

/// Call `callable(*args)` with borrowed arguments
///
/// # Safety
/// All pointers must be live; the global lock must be held.
pub unsafe fn call(callable: ObjPtr, args: &[ObjPtr]) -> RtResult<ObjPtr> {
    let packed = tuple::from_borrowed(args)?;
    let result = call_tuple(callable, packed);
    decref(packed);
    result
}

/// Call with an already packed argument tuple (borrowed)
///
/// # Safety
/// All pointers must be live; the global lock must be held.
pub unsafe fn call_tuple(callable: ObjPtr, args: ObjPtr) -> RtResult<ObjPtr> {
    let Some(f) = slot::<TernaryFunc>(type_of(callable), offsets().tp_call) else {
        return Err(errors::raise(
            ExcKind::TypeError,
            &format!("'{}' object is not callable", type_name_of(callable)),
        ));
    };
    errors::check_ptr(f(callable, args, std::ptr::null_mut()))
}

/// Call `obj.name(*args)`
///
/// # Safety
/// All pointers must be live; the global lock must be held.
pub unsafe fn call_method(obj: ObjPtr, name: &str, args: &[ObjPtr]) -> RtResult<ObjPtr> {
    let method = getattr(obj, name)?;
    let result = call(method, args);
    decref(method);
    result
}

/// # Safety
/// `obj` must be live; the global lock must be held.
pub unsafe fn getattr(obj: ObjPtr, name: &str) -> RtResult<ObjPtr> {
    let key = string::new(name)?;
    let result = getattr_obj(obj, key);
    decref(key);
    result
}

/// # Safety
/// `obj` must be live and `key` a str; the global lock must be held.
pub unsafe fn getattr_obj(obj: ObjPtr, key: ObjPtr) -> RtResult<ObjPtr> {
    match slot::<BinaryFunc>(type_of(obj), offsets().tp_getattro) {
        Some(f) => errors::check_ptr(f(obj, key)),
        None => Err(errors::raise(
            ExcKind::AttributeError,
            &format!("'{}' object has no attributes", type_name_of(obj)),
        )),
    }
}

/// Set (or with a null `value`, delete) an attribute
///
/// # Safety
/// `obj` must be live; the global lock must be held.
pub unsafe fn setattr(obj: ObjPtr, name: &str, value: ObjPtr) -> RtResult<()> {
    let key = string::new(name)?;
    let result = match slot::<ObjObjArgProc>(type_of(obj), offsets().tp_setattro) {
        Some(f) => errors::check_status(f(obj, key, value)),
        None => Err(errors::raise(
            ExcKind::AttributeError,
            &format!("'{}' object attributes are read-only", type_name_of(obj)),
        )),
    };
    decref(key);
    result
}

/// # Safety
/// `obj` must be live; the global lock must be held.
pub unsafe fn delattr(obj: ObjPtr, name: &str) -> RtResult<()> {
    setattr(obj, name, std::ptr::null_mut())
}

/// True if the attribute resolves; only `AttributeError` counts as absent
///
/// # Safety
/// `obj` must be live; the global lock must be held.
pub unsafe fn hasattr(obj: ObjPtr, name: &str) -> RtResult<bool> {
    match getattr(obj, name) {
        Ok(value) => {
            decref(value);
            Ok(true)
        }
        Err(err) => {
            let state = errors::fetch();
            match state {
                Some(s) if s.matches(ExcKind::AttributeError) => {
                    s.release();
                    Ok(false)
                }
                other => {
                    errors::restore(other);
                    Err(err)
                }
            }
        }
    }
}

// ============================================================================
// Items
// ============================================================================

/// # Safety
/// Both must be live; the global lock must be held.
pub unsafe fn getitem(obj: ObjPtr, key: ObjPtr) -> RtResult<ObjPtr> {
    match slot::<BinaryFunc>(type_of(obj), offsets().mp_subscript) {
        Some(f) => errors::check_ptr(f(obj, key)),
        None => Err(errors::raise(
            ExcKind::TypeError,
            &format!("'{}' object is not subscriptable", type_name_of(obj)),
        )),
    }
}

/// # Safety
/// All must be live; the global lock must be held.
pub unsafe fn setitem(obj: ObjPtr, key: ObjPtr, value: ObjPtr) -> RtResult<()> {
    match slot::<ObjObjArgProc>(type_of(obj), offsets().mp_ass_subscript) {
        Some(f) => errors::check_status(f(obj, key, value)),
        None => Err(errors::raise(
            ExcKind::TypeError,
            &format!(
                "'{}' object does not support item assignment",
                type_name_of(obj)
            ),
        )),
    }
}

/// # Safety
/// Both must be live; the global lock must be held.
pub unsafe fn delitem(obj: ObjPtr, key: ObjPtr) -> RtResult<()> {
    match slot::<ObjObjArgProc>(type_of(obj), offsets().mp_ass_subscript) {
        Some(f) => errors::check_status(f(obj, key, std::ptr::null_mut())),
        None => Err(errors::raise(
            ExcKind::TypeError,
            &format!(
                "'{}' object does not support item deletion",
                type_name_of(obj)
            ),
        )),
    }
}

// ============================================================================
// Text
// ============================================================================

unsafe fn text_via(obj: ObjPtr, offset: usize, fallback: UnaryFunc) -> RtResult<String> {
    let f = slot::<UnaryFunc>(type_of(obj), offset).unwrap_or(fallback);
    let result = errors::check_ptr(f(obj))?;
    let text = string::as_str(result).map(str::to_string);
    decref(result);
    text.ok_or_else(|| errors::raise(ExcKind::TypeError, "__repr__ returned non-string"))
}

/// `repr(obj)` as Rust text
///
/// # Safety
/// `obj` must be live; the global lock must be held.
pub unsafe fn repr_string(obj: ObjPtr) -> RtResult<String> {
    if obj.is_null() {
        return Ok(String::from("<NULL>"));
    }
    text_via(obj, offsets().tp_repr, typeobj::object_repr)
}

/// `str(obj)` as Rust text
///
/// # Safety
/// `obj` must be live; the global lock must be held.
pub unsafe fn str_string(obj: ObjPtr) -> RtResult<String> {
    if let Some(text) = string::as_str(obj) {
        return Ok(text.to_string());
    }
    text_via(obj, offsets().tp_str, typeobj::object_str)
}

// ============================================================================
// Comparison
// ============================================================================

unsafe fn try_compare(a: ObjPtr, b: ObjPtr, op: CompareOp) -> RtResult<Option<ObjPtr>> {
    let Some(f) = slot::<RichCmpFunc>(type_of(a), offsets().tp_richcompare) else {
        return Ok(None);
    };
    let result = errors::check_ptr(f(a, b, op.as_raw()))?;
    if builtins::is_not_implemented(result) {
        decref(result);
        return Ok(None);
    }
    Ok(Some(result))
}

/// `a <op> b`, trying the reflected operation on `b` when `a` declines
///
/// # Safety
/// Both must be live; the global lock must be held.
pub unsafe fn richcompare(a: ObjPtr, b: ObjPtr, op: CompareOp) -> RtResult<ObjPtr> {
    if let Some(result) = try_compare(a, b, op)? {
        return Ok(result);
    }
    if let Some(result) = try_compare(b, a, op.reflected())? {
        return Ok(result);
    }
    match op {
        CompareOp::Eq => Ok(builtins::bool_from(a == b)),
        CompareOp::Ne => Ok(builtins::bool_from(a != b)),
        _ => Err(errors::raise(
            ExcKind::TypeError,
            &format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op.symbol(),
                type_name_of(a),
                type_name_of(b)
            ),
        )),
    }
}

/// Comparison reduced to a bool; identical objects are equal
///
/// # Safety
/// Both must be live; the global lock must be held.
pub unsafe fn richcompare_bool(a: ObjPtr, b: ObjPtr, op: CompareOp) -> RtResult<bool> {
    if a == b {
        match op {
            CompareOp::Eq => return Ok(true),
            CompareOp::Ne => return Ok(false),
            _ => {}
        }
    }
    let result = richcompare(a, b, op)?;
    let truth = is_true(result);
    decref(result);
    truth
}

// ============================================================================
// Sizes, membership, hashing, truth
// ============================================================================

/// # Safety
/// `obj` must be live; the global lock must be held.
pub unsafe fn len(obj: ObjPtr) -> RtResult<usize> {
    let off = offsets();
    let tp = type_of(obj);
    let f = slot::<LenFunc>(tp, off.sq_length).or_else(|| slot::<LenFunc>(tp, off.mp_length));
    let Some(f) = f else {
        return Err(errors::raise(
            ExcKind::TypeError,
            &format!("object of type '{}' has no len()", type_name_of(obj)),
        ));
    };
    let n = f(obj);
    if n < 0 {
        errors::check_status(-1)?;
    }
    Ok(n as usize)
}

/// `item in container`
///
/// # Safety
/// Both must be live; the global lock must be held.
pub unsafe fn contains(container: ObjPtr, item: ObjPtr) -> RtResult<bool> {
    match slot::<ObjObjProc>(type_of(container), offsets().sq_contains) {
        Some(f) => {
            let rc = f(container, item);
            errors::check_status(rc)?;
            Ok(rc > 0)
        }
        None => Err(errors::raise(
            ExcKind::TypeError,
            &format!(
                "argument of type '{}' is not iterable",
                type_name_of(container)
            ),
        )),
    }
}

/// # Safety
/// `obj` must be live; the global lock must be held.
pub unsafe fn hash(obj: ObjPtr) -> RtResult<isize> {
    let Some(f) = slot::<HashFunc>(type_of(obj), offsets().tp_hash) else {
        return Err(errors::raise(
            ExcKind::TypeError,
            &format!("unhashable type: '{}'", type_name_of(obj)),
        ));
    };
    let h = f(obj);
    if h == -1 && errors::occurred() {
        return Err(errors::ErrorSet);
    }
    Ok(h)
}

/// Truth value: `nb_bool`, then length, then true
///
/// # Safety
/// `obj` must be live; the global lock must be held.
pub unsafe fn is_true(obj: ObjPtr) -> RtResult<bool> {
    if builtins::is_none(obj) {
        return Ok(false);
    }
    let off = offsets();
    let tp = type_of(obj);
    if let Some(f) = slot::<Inquiry>(tp, off.nb_bool) {
        let rc = f(obj);
        errors::check_status(rc)?;
        return Ok(rc > 0);
    }
    if slot::<LenFunc>(tp, off.sq_length).is_some() || slot::<LenFunc>(tp, off.mp_length).is_some() {
        return Ok(len(obj)? > 0);
    }
    Ok(true)
}

// ============================================================================
// Numbers
// ============================================================================

unsafe fn binary_op(a: ObjPtr, b: ObjPtr, offset: usize, symbol: &str) -> RtResult<ObjPtr> {
    let slot_a = slot::<BinaryFunc>(type_of(a), offset);
    let slot_b = slot::<BinaryFunc>(type_of(b), offset);
    if let Some(f) = slot_a {
        let result = errors::check_ptr(f(a, b))?;
        if !builtins::is_not_implemented(result) {
            return Ok(result);
        }
        decref(result);
    }
    if let Some(f) = slot_b {
        if slot_b.map(|f| f as usize) != slot_a.map(|f| f as usize) {
            let result = errors::check_ptr(f(a, b))?;
            if !builtins::is_not_implemented(result) {
                return Ok(result);
            }
            decref(result);
        }
    }
    Err(errors::raise(
        ExcKind::TypeError,
        &format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            symbol,
            type_name_of(a),
            type_name_of(b)
        ),
    ))
}

/// # Safety
/// Both must be live; the global lock must be held.
pub unsafe fn add(a: ObjPtr, b: ObjPtr) -> RtResult<ObjPtr> {
    binary_op(a, b, offsets().nb_add, "+")
}

/// # Safety
/// Both must be live; the global lock must be held.
pub unsafe fn subtract(a: ObjPtr, b: ObjPtr) -> RtResult<ObjPtr> {
    binary_op(a, b, offsets().nb_subtract, "-")
}

/// # Safety
/// Both must be live; the global lock must be held.
pub unsafe fn multiply(a: ObjPtr, b: ObjPtr) -> RtResult<ObjPtr> {
    binary_op(a, b, offsets().nb_multiply, "*")
}

/// # Safety
/// Both must be live; the global lock must be held.
pub unsafe fn true_divide(a: ObjPtr, b: ObjPtr) -> RtResult<ObjPtr> {
    binary_op(a, b, offsets().nb_true_divide, "/")
}

/// # Safety
/// `a` must be live; the global lock must be held.
pub unsafe fn negative(a: ObjPtr) -> RtResult<ObjPtr> {
    if let Some(f) = slot::<UnaryFunc>(type_of(a), offsets().nb_negative) {
        let result = errors::check_ptr(f(a))?;
        if !builtins::is_not_implemented(result) {
            return Ok(result);
        }
        decref(result);
    }
    Err(errors::raise(
        ExcKind::TypeError,
        &format!("bad operand type for unary -: '{}'", type_name_of(a)),
    ))
}

/// Integer value of an int-like object
///
/// # Safety
/// `obj` must be live.
pub unsafe fn as_i64(obj: ObjPtr) -> RtResult<i64> {
    numbers::as_i64(obj).ok_or_else(|| {
        errors::raise(
            ExcKind::TypeError,
            &format!("an integer is required (got type {})", type_name_of(obj)),
        )
    })
}

// ============================================================================
// Type checks
// ============================================================================

unsafe fn meta_hook(cls: ObjPtr, hook: &str, arg: ObjPtr) -> RtResult<Option<bool>> {
    let meta = type_of(cls);
    let found = typeobj::lookup(meta, hook);
    if found.is_null() {
        return Ok(None);
    }
    let bound = match slot::<TernaryFunc>(type_of(found), offsets().tp_descr_get) {
        Some(get) => errors::check_ptr(get(found, cls, meta))?,
        None => crate::object::new_ref(found),
    };
    let result = call(bound, &[arg]);
    decref(bound);
    let result = result?;
    let truth = is_true(result);
    decref(result);
    truth.map(Some)
}

/// `isinstance(obj, cls)`, honoring `__instancecheck__` on the metatype
///
/// # Safety
/// Both must be live; `cls` a type; the global lock must be held.
pub unsafe fn is_instance(obj: ObjPtr, cls: ObjPtr) -> RtResult<bool> {
    if type_of(obj) == cls {
        return Ok(true);
    }
    if let Some(answer) = meta_hook(cls, "__instancecheck__", obj)? {
        return Ok(answer);
    }
    Ok(typeobj::is_subtype(type_of(obj), cls))
}

/// `issubclass(sub, cls)`, honoring `__subclasscheck__` on the metatype
///
/// # Safety
/// Both must be live types; the global lock must be held.
pub unsafe fn is_subclass(sub: ObjPtr, cls: ObjPtr) -> RtResult<bool> {
    if sub == cls {
        return Ok(true);
    }
    if let Some(answer) = meta_hook(cls, "__subclasscheck__", sub)? {
        return Ok(answer);
    }
    Ok(typeobj::is_subtype(sub, cls))
}

// ============================================================================
// Traversal
// ============================================================================

unsafe extern "C" fn collect_visit(obj: ObjPtr, arg: *mut c_void) -> c_int {
    let out = &mut *(arg as *mut Vec<ObjPtr>);
    out.push(obj);
    0
}

/// Objects `obj` reports through `tp_traverse` (borrowed)
///
/// # Safety
/// `obj` must be live; the global lock must be held.
pub unsafe fn referents(obj: ObjPtr) -> Vec<ObjPtr> {
    let mut out: Vec<ObjPtr> = Vec::new();
    if let Some(traverse) = slot::<TraverseProc>(type_of(obj), offsets().tp_traverse) {
        traverse(obj, collect_visit, &mut out as *mut Vec<ObjPtr> as *mut c_void);
    }
    out
}

/// Run `tp_clear` on `obj`
///
/// # Safety
/// `obj` must be live; the global lock must be held.
pub unsafe fn clear(obj: ObjPtr) -> RtResult<()> {
    match typeobj::clear_slot_of(type_of(obj)) {
        Some(f) => errors::check_status(f(obj)),
        None => Ok(()),
    }
}
