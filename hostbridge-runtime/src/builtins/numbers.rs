//! int, bool and float

use super::payload::{payload, payload_dealloc, set_payload, Payload};
use super::{bool_from, bool_type, float_type, int_type, not_implemented, string};
use crate::errors::{self, ptr_or_null, ExcKind, RtResult};
use crate::layout::offsets;
use crate::object::{type_of, ObjPtr};
use crate::protocol::CompareOp;
use crate::typeobj::{self, set};
use std::ffi::c_int;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    I(i64),
    F(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::I(i) => i as f64,
            Num::F(f) => f,
        }
    }
}

unsafe fn num_of(obj: ObjPtr) -> Option<Num> {
    if obj.is_null() {
        return None;
    }
    let tp = type_of(obj);
    if tp == int_type() || tp == bool_type() {
        if let Some(Payload::Int(i)) = payload(obj) {
            return Some(Num::I(*i));
        }
    } else if tp == float_type() {
        if let Some(Payload::Float(f)) = payload(obj) {
            return Some(Num::F(*f));
        }
    }
    None
}

/// New int object
///
/// # Safety
/// The global lock must be held.
pub unsafe fn int_new(value: i64) -> RtResult<ObjPtr> {
    let obj = typeobj::generic_alloc(int_type(), 0)?;
    set_payload(obj, Payload::Int(value));
    Ok(obj)
}

/// New float object
///
/// # Safety
/// The global lock must be held.
pub unsafe fn float_new(value: f64) -> RtResult<ObjPtr> {
    let obj = typeobj::generic_alloc(float_type(), 0)?;
    set_payload(obj, Payload::Float(value));
    Ok(obj)
}

/// Integer value of an int or bool
///
/// # Safety
/// `obj` must be a live object.
pub unsafe fn as_i64(obj: ObjPtr) -> Option<i64> {
    match num_of(obj)? {
        Num::I(i) => Some(i),
        Num::F(_) => None,
    }
}

/// Numeric value of an int, bool or float
///
/// # Safety
/// `obj` must be a live object.
pub unsafe fn as_f64(obj: ObjPtr) -> Option<f64> {
    num_of(obj).map(Num::as_f64)
}

/// # Safety
/// `obj` must be a live object.
pub unsafe fn is_int(obj: ObjPtr) -> bool {
    type_of(obj) == int_type()
}

/// # Safety
/// `obj` must be a live object.
pub unsafe fn is_bool(obj: ObjPtr) -> bool {
    type_of(obj) == bool_type()
}

/// # Safety
/// `obj` must be a live object.
pub unsafe fn is_float(obj: ObjPtr) -> bool {
    type_of(obj) == float_type()
}

unsafe fn num_new(value: Num) -> RtResult<ObjPtr> {
    match value {
        Num::I(i) => int_new(i),
        Num::F(f) => float_new(f),
    }
}

unsafe fn binary(a: ObjPtr, b: ObjPtr, op: fn(Num, Num) -> RtResult<Num>) -> ObjPtr {
    match (num_of(a), num_of(b)) {
        (Some(x), Some(y)) => ptr_or_null(op(x, y).and_then(|n| num_new(n))),
        _ => not_implemented(),
    }
}

fn overflow() -> errors::ErrorSet {
    errors::raise(ExcKind::OverflowError, "integer overflow")
}

fn add(x: Num, y: Num) -> RtResult<Num> {
    match (x, y) {
        (Num::I(a), Num::I(b)) => a.checked_add(b).map(Num::I).ok_or_else(overflow),
        _ => Ok(Num::F(x.as_f64() + y.as_f64())),
    }
}

fn subtract(x: Num, y: Num) -> RtResult<Num> {
    match (x, y) {
        (Num::I(a), Num::I(b)) => a.checked_sub(b).map(Num::I).ok_or_else(overflow),
        _ => Ok(Num::F(x.as_f64() - y.as_f64())),
    }
}

fn multiply(x: Num, y: Num) -> RtResult<Num> {
    match (x, y) {
        (Num::I(a), Num::I(b)) => a.checked_mul(b).map(Num::I).ok_or_else(overflow),
        _ => Ok(Num::F(x.as_f64() * y.as_f64())),
    }
}

fn true_divide(x: Num, y: Num) -> RtResult<Num> {
    let divisor = y.as_f64();
    if divisor == 0.0 {
        return Err(errors::raise(ExcKind::ValueError, "division by zero"));
    }
    Ok(Num::F(x.as_f64() / divisor))
}

unsafe extern "C" fn num_add(a: ObjPtr, b: ObjPtr) -> ObjPtr {
    binary(a, b, add)
}

unsafe extern "C" fn num_subtract(a: ObjPtr, b: ObjPtr) -> ObjPtr {
    binary(a, b, subtract)
}

unsafe extern "C" fn num_multiply(a: ObjPtr, b: ObjPtr) -> ObjPtr {
    binary(a, b, multiply)
}

unsafe extern "C" fn num_true_divide(a: ObjPtr, b: ObjPtr) -> ObjPtr {
    binary(a, b, true_divide)
}

unsafe extern "C" fn num_negative(a: ObjPtr) -> ObjPtr {
    match num_of(a) {
        Some(Num::I(i)) => ptr_or_null(i.checked_neg().ok_or_else(overflow).and_then(|v| int_new(v))),
        Some(Num::F(f)) => ptr_or_null(float_new(-f)),
        None => not_implemented(),
    }
}

unsafe extern "C" fn num_bool(a: ObjPtr) -> c_int {
    match num_of(a) {
        Some(n) => (n.as_f64() != 0.0) as c_int,
        None => 1,
    }
}

unsafe extern "C" fn num_hash(a: ObjPtr) -> isize {
    match num_of(a) {
        Some(Num::I(i)) => i as isize,
        Some(Num::F(f)) if f.fract() == 0.0 => f as i64 as isize,
        Some(Num::F(f)) => f.to_bits() as isize,
        None => -1,
    }
}

unsafe extern "C" fn num_richcompare(a: ObjPtr, b: ObjPtr, op: c_int) -> ObjPtr {
    let (Some(x), Some(y), Some(op)) = (num_of(a), num_of(b), CompareOp::from_raw(op)) else {
        return not_implemented();
    };
    let ordering = match (x, y) {
        (Num::I(l), Num::I(r)) => Some(l.cmp(&r)),
        _ => x.as_f64().partial_cmp(&y.as_f64()),
    };
    match ordering {
        Some(ord) => bool_from(op.matches(ord)),
        None => bool_from(op == CompareOp::Ne),
    }
}

unsafe extern "C" fn int_repr(a: ObjPtr) -> ObjPtr {
    match num_of(a) {
        Some(Num::I(i)) => ptr_or_null(string::new(&i.to_string())),
        _ => ptr_or_null(Err(errors::raise(ExcKind::TypeError, "expected int"))),
    }
}

unsafe extern "C" fn bool_repr(a: ObjPtr) -> ObjPtr {
    let text = if as_i64(a).unwrap_or(0) != 0 { "True" } else { "False" };
    ptr_or_null(string::new(text))
}

unsafe extern "C" fn float_repr(a: ObjPtr) -> ObjPtr {
    match num_of(a) {
        Some(Num::F(f)) => {
            let text = if f.fract() == 0.0 && f.is_finite() {
                format!("{:.1}", f)
            } else {
                f.to_string()
            };
            ptr_or_null(string::new(&text))
        }
        _ => ptr_or_null(Err(errors::raise(ExcKind::TypeError, "expected float"))),
    }
}

unsafe fn configure_numeric(tp: ObjPtr) {
    let off = offsets();
    set(tp, off.tp_dealloc, payload_dealloc as usize);
    set(tp, off.tp_hash, num_hash as usize);
    set(tp, off.tp_richcompare, num_richcompare as usize);
    set(tp, off.nb_add, num_add as usize);
    set(tp, off.nb_subtract, num_subtract as usize);
    set(tp, off.nb_multiply, num_multiply as usize);
    set(tp, off.nb_true_divide, num_true_divide as usize);
    set(tp, off.nb_negative, num_negative as usize);
    set(tp, off.nb_bool, num_bool as usize);
}

pub(super) unsafe fn configure_int(tp: ObjPtr) {
    configure_numeric(tp);
    set(tp, offsets().tp_repr, int_repr as usize);
}

pub(super) unsafe fn configure_bool(tp: ObjPtr) {
    configure_numeric(tp);
    set(tp, offsets().tp_repr, bool_repr as usize);
}

pub(super) unsafe fn configure_float(tp: ObjPtr) {
    configure_numeric(tp);
    set(tp, offsets().tp_repr, float_repr as usize);
}
