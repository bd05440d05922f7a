//! Host arrays: sequence, mapping and buffer protocols
//!
//! Primitive arrays export their storage through the buffer protocol
//! without copying; the view keeps the foreign wrapper alive.

use super::{context, host_object_of, instantiate};
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{ArrayStorage, HostObject, HostTypeRef, HostValue};
use crate::interop::{guard_len, guard_object, guard_status, SlotFn, SlotLevel};
use hostbridge_runtime::builtins::{numbers, tuple};
use hostbridge_runtime::object::{incref, type_of, ObjPtr};
use hostbridge_runtime::protocol::{RawBuffer, BUF_FORMAT, BUF_ND, BUF_STRIDES};
use hostbridge_runtime::typeobj;
use std::ffi::{c_char, c_int, c_void};
use std::ptr;
use std::sync::Arc;

pub const LEVEL: SlotLevel = SlotLevel {
    name: "array",
    slots: &[
        ("tp_new", SlotFn::Ternary(array_new)),
        ("mp_length", SlotFn::Len(array_len)),
        ("sq_length", SlotFn::Len(array_len)),
        ("mp_subscript", SlotFn::Binary(array_subscript)),
        ("mp_ass_subscript", SlotFn::ObjObjArg(array_ass_subscript)),
        ("sq_contains", SlotFn::ObjObj(array_contains)),
        ("bf_getbuffer", SlotFn::GetBuffer(array_getbuffer)),
        ("bf_releasebuffer", SlotFn::ReleaseBuffer(array_releasebuffer)),
    ],
};

fn element_of(ty: &HostTypeRef) -> BridgeResult<(HostTypeRef, usize)> {
    ty.element()
        .map(|(element, rank)| (Arc::clone(element), rank))
        .ok_or_else(|| BridgeError::Binding(format!("{} is not an array type", ty.name())))
}

unsafe fn storage_of(obj: ObjPtr) -> BridgeResult<(Arc<HostObject>, HostTypeRef)> {
    let host = host_object_of(obj).ok_or_else(|| {
        BridgeError::Binding(format!(
            "'{}' instance is not bound to a host array",
            typeobj::name(type_of(obj))
        ))
    })?;
    let (element, _) = element_of(host.host_type())?;
    Ok((host, element))
}

fn storage(host: &HostObject) -> BridgeResult<&ArrayStorage> {
    host.array()
        .ok_or_else(|| BridgeError::Binding(format!("{} is not an array", host.host_type().name())))
}

/// Flat position of a subscript key: an int, or a tuple of ints
unsafe fn flat_index(storage: &ArrayStorage, key: ObjPtr) -> BridgeResult<usize> {
    let keys: Vec<ObjPtr> = if tuple::is_tuple(key) {
        tuple::items(key).to_vec()
    } else {
        vec![key]
    };
    let mut indices = Vec::with_capacity(keys.len());
    for k in keys {
        if !numbers::is_int(k) {
            return Err(BridgeError::Binding(String::from("array index must be an integer")));
        }
        indices.push(numbers::as_i64(k).unwrap_or(i64::MAX));
    }
    if indices.len() != storage.rank() {
        return Err(BridgeError::Index(format!(
            "array of rank {} indexed with {} indices",
            storage.rank(),
            indices.len()
        )));
    }
    storage
        .flat_index(&indices)
        .ok_or_else(|| BridgeError::Index(String::from("array index out of range")))
}

unsafe fn new_array(bridge: &Bridge, ty: &HostTypeRef, args: &[ObjPtr]) -> BridgeResult<Arc<HostObject>> {
    let (element, rank) = element_of(ty)?;
    if args.len() == rank && args.iter().all(|&a| numbers::is_int(a)) {
        let mut shape = Vec::with_capacity(rank);
        for &a in args {
            let n = numbers::as_i64(a).unwrap_or(-1);
            if n < 0 {
                return Err(BridgeError::Binding(String::from("array length must be non-negative")));
            }
            shape.push(n as usize);
        }
        return Ok(HostObject::new_array(&element, &shape));
    }
    if let [source] = args {
        if let Some(HostValue::Object(array)) = bridge.converter().to_host(bridge, *source, ty, true)? {
            return Ok(array);
        }
    }
    Err(BridgeError::Binding(format!(
        "{}() takes {} length(s) or one sequence",
        ty.name(),
        rank
    )))
}

unsafe extern "C" fn array_new(tp: ObjPtr, args: ObjPtr, _kwargs: ObjPtr) -> ObjPtr {
    guard_object("tp_new", || {
        let (bridge, desc) = context(tp)?;
        let array = new_array(&bridge, &desc.host, tuple::items(args))?;
        instantiate(&bridge, &desc, tp, &array)
    })
}

unsafe extern "C" fn array_len(obj: ObjPtr) -> isize {
    guard_len("mp_length", || {
        let (host, _) = storage_of(obj)?;
        Ok(storage(&host)?.len())
    })
}

unsafe extern "C" fn array_subscript(obj: ObjPtr, key: ObjPtr) -> ObjPtr {
    guard_object("mp_subscript", || {
        let (bridge, _) = context(type_of(obj))?;
        let (host, element) = storage_of(obj)?;
        let storage = storage(&host)?;
        let flat = flat_index(storage, key)?;
        let value = storage
            .get(flat)
            .ok_or_else(|| BridgeError::Index(String::from("array index out of range")))?;
        bridge.converter().to_foreign(&bridge, &value, Some(&element))
    })
}

unsafe extern "C" fn array_ass_subscript(obj: ObjPtr, key: ObjPtr, value: ObjPtr) -> c_int {
    guard_status("mp_ass_subscript", || {
        if value.is_null() {
            return Err(BridgeError::Binding(String::from("array elements cannot be deleted")));
        }
        let (bridge, _) = context(type_of(obj))?;
        let (host, element) = storage_of(obj)?;
        let storage = storage(&host)?;
        let flat = flat_index(storage, key)?;
        let converted = bridge
            .converter()
            .to_host(&bridge, value, &element, true)?
            .unwrap_or_default();
        storage.set(flat, converted).map_err(BridgeError::Host)?;
        Ok(0)
    })
}

unsafe extern "C" fn array_contains(obj: ObjPtr, item: ObjPtr) -> c_int {
    guard_status("sq_contains", || {
        let (bridge, _) = context(type_of(obj))?;
        let (host, element) = storage_of(obj)?;
        let Some(needle) = bridge.converter().to_host(&bridge, item, &element, false)? else {
            return Ok(0);
        };
        let storage = storage(&host)?;
        let found = (0..storage.len()).any(|i| storage.get(i).as_ref() == Some(&needle));
        Ok(c_int::from(found))
    })
}

/// Shape and strides handed out with a view, freed on release
struct ViewGeometry {
    shape: Vec<isize>,
    strides: Vec<isize>,
    format: &'static [u8],
}

fn format_bytes(format: &str) -> &'static [u8] {
    match format {
        "i" => b"i\0",
        "q" => b"q\0",
        "d" => b"d\0",
        _ => b"B\0",
    }
}

unsafe extern "C" fn array_getbuffer(obj: ObjPtr, view: *mut RawBuffer, flags: c_int) -> c_int {
    guard_status("bf_getbuffer", || {
        let (host, _) = storage_of(obj)?;
        let storage = storage(&host)?;
        let (data, itemsize, format) = storage.raw_parts().ok_or_else(|| {
            BridgeError::Binding(format!(
                "{} does not expose contiguous memory",
                host.host_type().name()
            ))
        })?;

        let shape: Vec<isize> = storage.shape().iter().map(|&d| d as isize).collect();
        let mut strides = vec![itemsize as isize; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        let mut geometry = Box::new(ViewGeometry {
            shape,
            strides,
            format: format_bytes(format),
        });

        let view = &mut *view;
        incref(obj);
        view.obj = obj;
        view.buf = data as *mut c_void;
        view.len = (storage.len() * itemsize) as isize;
        view.itemsize = itemsize as isize;
        view.readonly = 0;
        view.ndim = storage.rank() as c_int;
        view.format = if flags & BUF_FORMAT != 0 {
            geometry.format.as_ptr() as *const c_char
        } else {
            ptr::null()
        };
        view.shape = if flags & BUF_ND != 0 {
            geometry.shape.as_mut_ptr()
        } else {
            ptr::null_mut()
        };
        view.strides = if flags & BUF_STRIDES == BUF_STRIDES {
            geometry.strides.as_mut_ptr()
        } else {
            ptr::null_mut()
        };
        view.internal = Box::into_raw(geometry) as *mut c_void;
        Ok(0)
    })
}

unsafe extern "C" fn array_releasebuffer(_obj: ObjPtr, view: *mut RawBuffer) {
    let view = &mut *view;
    if !view.internal.is_null() {
        drop(Box::from_raw(view.internal as *mut ViewGeometry));
        view.internal = ptr::null_mut();
    }
    view.shape = ptr::null_mut();
    view.strides = ptr::null_mut();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_are_terminated() {
        assert_eq!(format_bytes("i"), b"i\0");
        assert_eq!(format_bytes("?"), b"B\0");
    }
}
