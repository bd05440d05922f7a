//! Value conversion across the boundary
//!
//! Design: Conversion sits behind the [`Converter`] trait so embedders can
//! swap the policy; [`DefaultConverter`] implements the strict rules:
//! - `bool` never converts to an integer parameter
//! - integers narrow only when they fit; floats accept integers
//! - `None` maps to host null for reference types only
//! - foreign callables convert to delegate types through dispatchers
//! - foreign lists and tuples convert element-wise to rank-1 arrays

use crate::bridge::Bridge;
use crate::delegates::Dispatcher;
use crate::descriptors;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{HostObject, HostTypeRef, HostValue, TypeCode, TypeKind};
use crate::wrappers::ForeignObject;
use hostbridge_runtime::builtins::{self, list, numbers, string, tuple};
use hostbridge_runtime::layout::offsets;
use hostbridge_runtime::object::{decref, incref, type_of, ObjPtr};
use hostbridge_runtime::typeobj;

/// Conversion policy used by every binding path
pub trait Converter: Send + Sync {
    /// New foreign reference for `value`
    ///
    /// `declared` is the host type the value was declared as; interface
    /// declarations wrap through the interface's foreign type.
    ///
    /// # Safety
    /// The global lock must be held.
    unsafe fn to_foreign(
        &self,
        bridge: &Bridge,
        value: &HostValue,
        declared: Option<&HostTypeRef>,
    ) -> BridgeResult<ObjPtr>;

    /// Host value of `obj` as `target`
    ///
    /// Returns `Ok(None)` for a mismatch when `throw` is false, and a
    /// marshaling error otherwise.
    ///
    /// # Safety
    /// The global lock must be held; `obj` is borrowed.
    unsafe fn to_host(
        &self,
        bridge: &Bridge,
        obj: ObjPtr,
        target: &HostTypeRef,
        throw: bool,
    ) -> BridgeResult<Option<HostValue>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConverter;

fn mismatch(target: &HostTypeRef, actual: &str, throw: bool) -> BridgeResult<Option<HostValue>> {
    if throw {
        Err(BridgeError::marshal(target.name(), actual))
    } else {
        Ok(None)
    }
}

pub(crate) unsafe fn is_callable(obj: ObjPtr) -> bool {
    typeobj::get(type_of(obj), offsets().tp_call) != 0
}

/// Host integer of a foreign int (not a bool) within `lo..=hi`
unsafe fn integer(obj: ObjPtr, lo: i64, hi: i64) -> Option<Result<i64, ()>> {
    if !numbers::is_int(obj) || numbers::is_bool(obj) {
        return None;
    }
    Some(match numbers::as_i64(obj) {
        Some(v) if (lo..=hi).contains(&v) => Ok(v),
        _ => Err(()),
    })
}

impl DefaultConverter {
    unsafe fn primitive(&self, obj: ObjPtr, target: &HostTypeRef, throw: bool) -> BridgeResult<Option<HostValue>> {
        let actual = typeobj::name(type_of(obj));
        let value = match target.code() {
            TypeCode::Boolean if numbers::is_bool(obj) => {
                Some(HostValue::Bool(numbers::as_i64(obj) == Some(1)))
            }
            TypeCode::Int32 => match integer(obj, i32::MIN as i64, i32::MAX as i64) {
                Some(Ok(v)) => Some(HostValue::Int(v)),
                Some(Err(())) if throw => {
                    return Err(BridgeError::marshal(target.name(), format!("{} (out of range)", actual)))
                }
                _ => None,
            },
            TypeCode::Int64 => match integer(obj, i64::MIN, i64::MAX) {
                Some(Ok(v)) => Some(HostValue::Int(v)),
                _ => None,
            },
            TypeCode::Float64 if numbers::is_float(obj) => numbers::as_f64(obj).map(HostValue::Float),
            TypeCode::Float64 => match integer(obj, i64::MIN, i64::MAX) {
                Some(Ok(v)) => Some(HostValue::Float(v as f64)),
                _ => None,
            },
            TypeCode::String if string::is_str(obj) => string::as_str(obj).map(|s| HostValue::Str(s.to_string())),
            _ => None,
        };
        match value {
            Some(v) => Ok(Some(v)),
            None => mismatch(target, &actual, throw),
        }
    }

    /// Anything goes for `Object`: bridged objects unwrap, primitives
    /// become host primitives, the rest stays an opaque foreign reference
    unsafe fn any(&self, bridge: &Bridge, obj: ObjPtr) -> HostValue {
        if let Some(host) = descriptors::host_object_of(obj) {
            return HostValue::Object(host);
        }
        if numbers::is_bool(obj) {
            return HostValue::Bool(numbers::as_i64(obj) == Some(1));
        }
        if numbers::is_int(obj) {
            if let Some(v) = numbers::as_i64(obj) {
                return HostValue::Int(v);
            }
        }
        if numbers::is_float(obj) {
            if let Some(v) = numbers::as_f64(obj) {
                return HostValue::Float(v);
            }
        }
        if let Some(s) = string::as_str(obj) {
            return HostValue::Str(s.to_string());
        }
        HostValue::Foreign(ForeignObject::from_borrowed(obj, bridge.finalizer()))
    }

    unsafe fn array(
        &self,
        bridge: &Bridge,
        obj: ObjPtr,
        target: &HostTypeRef,
        throw: bool,
    ) -> BridgeResult<Option<HostValue>> {
        let Some((element, rank)) = target.element() else {
            return mismatch(target, "array", throw);
        };
        let items: Vec<ObjPtr> = if list::is_list(obj) {
            list::items(obj)
        } else if tuple::is_tuple(obj) {
            tuple::items(obj).to_vec()
        } else {
            return mismatch(target, &typeobj::name(type_of(obj)), throw);
        };
        if rank != 1 {
            return mismatch(target, "sequence", throw);
        }
        let array = HostObject::new_array(element, &[items.len()]);
        let Some(storage) = array.array() else {
            return mismatch(target, "sequence", throw);
        };
        for (i, &item) in items.iter().enumerate() {
            let Some(value) = self.to_host(bridge, item, element, throw)? else {
                return Ok(None);
            };
            if let Err(exc) = storage.set(i, value) {
                return if throw { Err(BridgeError::Host(exc)) } else { Ok(None) };
            }
        }
        Ok(Some(HostValue::Object(array)))
    }
}

impl Converter for DefaultConverter {
    unsafe fn to_foreign(
        &self,
        bridge: &Bridge,
        value: &HostValue,
        declared: Option<&HostTypeRef>,
    ) -> BridgeResult<ObjPtr> {
        Ok(match value {
            HostValue::Null => builtins::none_ref(),
            HostValue::Bool(b) => builtins::bool_from(*b),
            HostValue::Int(i) => numbers::int_new(*i)?,
            HostValue::Float(x) => numbers::float_new(*x)?,
            HostValue::Str(s) => string::new(s)?,
            HostValue::Foreign(f) => {
                let ptr = f.as_ptr();
                incref(ptr);
                ptr
            }
            HostValue::Object(obj) => {
                // A delegate made from a foreign callable goes back as the callable
                if let Some(dispatcher) = obj
                    .delegate_target()
                    .and_then(|t| t.downcast_ref::<Dispatcher>())
                {
                    let callable = dispatcher.callable();
                    incref(callable);
                    return Ok(callable);
                }
                let as_interface = declared.filter(|d| d.is_interface() && !obj.host_type().same(d));
                bridge.wrap_ptr(obj, as_interface)?
            }
        })
    }

    unsafe fn to_host(
        &self,
        bridge: &Bridge,
        obj: ObjPtr,
        target: &HostTypeRef,
        throw: bool,
    ) -> BridgeResult<Option<HostValue>> {
        match target.code() {
            TypeCode::Object => return Ok(Some(self.any(bridge, obj))),
            TypeCode::Void => return Ok(Some(HostValue::Null)),
            TypeCode::String if builtins::is_none(obj) => return Ok(Some(HostValue::Null)),
            TypeCode::Other => {}
            _ => return self.primitive(obj, target, throw),
        }

        if builtins::is_none(obj) {
            if target.is_value_type() {
                return mismatch(target, "NoneType", throw);
            }
            return Ok(Some(HostValue::Null));
        }
        if let Some(host) = descriptors::host_object_of(obj) {
            if host.host_type().is_assignable_to(target) {
                return Ok(Some(HostValue::Object(host)));
            }
            return mismatch(target, host.host_type().name(), throw);
        }
        if target.kind() == TypeKind::Delegate && is_callable(obj) {
            let delegate = bridge.delegates().get_delegate(bridge, target, obj)?;
            return Ok(Some(HostValue::Object(delegate)));
        }
        if target.kind() == TypeKind::Array {
            return self.array(bridge, obj, target, throw);
        }
        mismatch(target, &typeobj::name(type_of(obj)), throw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host;
    use crate::test_support::runtime;

    #[test]
    fn test_integer_range_check() {
        let _gil = runtime();
        unsafe {
            let small = numbers::int_new(7).unwrap();
            let big = numbers::int_new(i64::from(i32::MAX) + 1).unwrap();
            let flag = builtins::bool_from(true);
            assert_eq!(integer(small, i32::MIN as i64, i32::MAX as i64), Some(Ok(7)));
            assert_eq!(integer(big, i32::MIN as i64, i32::MAX as i64), Some(Err(())));
            assert_eq!(integer(flag, i64::MIN, i64::MAX), None);
            decref(small);
            decref(big);
            decref(flag);
        }
    }

    #[test]
    fn test_mismatch_respects_throw() {
        let target = host::int32_type();
        assert!(matches!(mismatch(&target, "str", false), Ok(None)));
        let err = mismatch(&target, "str", true).unwrap_err();
        assert_eq!(err.to_string(), "cannot convert str to Int32");
    }
}
