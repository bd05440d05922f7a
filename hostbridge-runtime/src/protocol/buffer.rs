//! Buffer protocol: raw views of object memory

use crate::errors::{self, ExcKind, RtResult};
use crate::layout::offsets;
use crate::object::{decref, type_of, ObjPtr};
use crate::typeobj::{self, slot, GetBufferProc, ReleaseBufferProc};
use std::ffi::{c_char, c_int, c_void, CStr};
use std::ptr;

/// Request a writable view
pub const BUF_WRITABLE: c_int = 0x0001;
/// Request the format string
pub const BUF_FORMAT: c_int = 0x0004;
/// Request shape information
pub const BUF_ND: c_int = 0x0008;
/// Request strides
pub const BUF_STRIDES: c_int = 0x0010 | BUF_ND;
/// Everything, read-only
pub const BUF_FULL_RO: c_int = BUF_STRIDES | BUF_FORMAT;

/// View filled in by `bf_getbuffer`
///
/// `obj` is an owned reference once the view is filled; releasing the
/// view drops it.
#[repr(C)]
#[derive(Debug)]
pub struct RawBuffer {
    pub buf: *mut c_void,
    pub obj: ObjPtr,
    pub len: isize,
    pub itemsize: isize,
    pub readonly: c_int,
    pub ndim: c_int,
    pub format: *const c_char,
    pub shape: *mut isize,
    pub strides: *mut isize,
    pub internal: *mut c_void,
}

impl Default for RawBuffer {
    fn default() -> Self {
        Self {
            buf: ptr::null_mut(),
            obj: ptr::null_mut(),
            len: 0,
            itemsize: 0,
            readonly: 1,
            ndim: 0,
            format: ptr::null(),
            shape: ptr::null_mut(),
            strides: ptr::null_mut(),
            internal: ptr::null_mut(),
        }
    }
}

impl RawBuffer {
    /// Bytes covered by the view
    ///
    /// # Safety
    /// The view must be filled and not yet released.
    pub unsafe fn as_bytes(&self) -> &[u8] {
        if self.buf.is_null() || self.len <= 0 {
            return &[];
        }
        std::slice::from_raw_parts(self.buf as *const u8, self.len as usize)
    }

    /// Shape as a slice (empty for 0-d views)
    ///
    /// # Safety
    /// The view must be filled and not yet released.
    pub unsafe fn shape(&self) -> &[isize] {
        if self.shape.is_null() || self.ndim <= 0 {
            return &[];
        }
        std::slice::from_raw_parts(self.shape, self.ndim as usize)
    }

    /// Struct-style format string, `B` when unset
    ///
    /// # Safety
    /// The view must be filled and not yet released.
    pub unsafe fn format(&self) -> String {
        if self.format.is_null() {
            return String::from("B");
        }
        CStr::from_ptr(self.format).to_string_lossy().into_owned()
    }
}

/// Does `obj` export buffers?
///
/// # Safety
/// `obj` must be live.
pub unsafe fn has_buffer(obj: ObjPtr) -> bool {
    typeobj::get(type_of(obj), offsets().bf_getbuffer) != 0
}

/// Acquire a view of `obj`
///
/// # Safety
/// `obj` must be live; the global lock must be held.
pub unsafe fn get_buffer(obj: ObjPtr, flags: c_int) -> RtResult<Box<RawBuffer>> {
    let Some(get) = slot::<GetBufferProc>(type_of(obj), offsets().bf_getbuffer) else {
        return Err(errors::raise(
            ExcKind::TypeError,
            &format!(
                "a bytes-like object is required, not '{}'",
                typeobj::name(type_of(obj))
            ),
        ));
    };
    let mut view = Box::<RawBuffer>::default();
    errors::check_status(get(obj, &mut *view, flags))?;
    Ok(view)
}

/// Release a view obtained from [`get_buffer`]
///
/// # Safety
/// The global lock must be held.
pub unsafe fn release_buffer(mut view: Box<RawBuffer>) {
    let obj = view.obj;
    if obj.is_null() {
        return;
    }
    if let Some(release) = slot::<ReleaseBufferProc>(type_of(obj), offsets().bf_releasebuffer) {
        release(obj, &mut *view);
    }
    view.obj = ptr::null_mut();
    decref(obj);
}
