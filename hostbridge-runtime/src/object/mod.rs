//! Object header and reference counting
//!
//! Design: Every object starts with a refcount word and a type pointer.
//! Refcounts are plain integers: all mutation happens under the global
//! lock, so no atomics are needed on the hot path.

#[cfg(test)]
mod tests;

use crate::logging::trace;
use crate::typeobj;

/// Object header shared by every runtime object
#[repr(C)]
pub struct RawObject {
    pub ob_refcnt: isize,
    pub ob_type: *mut RawObject,
}

/// Raw object pointer, the currency of the runtime API
pub type ObjPtr = *mut RawObject;

/// Refcount given to statically allocated objects so they never die
pub const IMMORTAL_REFCNT: isize = isize::MAX / 2;

/// Object pointer that may cross threads
///
/// Safety: the pointee is only dereferenced while the global lock is
/// held, which is what serializes every access to runtime memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedPtr(pub ObjPtr);

unsafe impl Send for SharedPtr {}
unsafe impl Sync for SharedPtr {}

impl SharedPtr {
    pub const NULL: SharedPtr = SharedPtr(std::ptr::null_mut());

    #[inline]
    pub fn get(self) -> ObjPtr {
        self.0
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0 as usize
    }
}

impl From<ObjPtr> for SharedPtr {
    fn from(ptr: ObjPtr) -> Self {
        SharedPtr(ptr)
    }
}

/// Increment reference count (null-safe)
///
/// # Safety
/// `obj` must be null or a live object, and the global lock must be held.
#[inline(always)]
pub unsafe fn incref(obj: ObjPtr) {
    if obj.is_null() {
        return;
    }
    debug_assert!((*obj).ob_refcnt >= 0, "incref of dead object");
    (*obj).ob_refcnt += 1;
}

/// Decrement reference count, deallocating on zero (null-safe)
///
/// # Safety
/// `obj` must be null or a live object, and the global lock must be held.
#[inline(always)]
pub unsafe fn decref(obj: ObjPtr) {
    if obj.is_null() {
        return;
    }
    debug_assert!((*obj).ob_refcnt > 0, "refcount underflow");
    (*obj).ob_refcnt -= 1;
    if (*obj).ob_refcnt == 0 {
        dealloc(obj);
    }
}

/// Replace `*slot` with `value`, releasing the previous reference
///
/// # Safety
/// Same contract as [`decref`] for the old value.
#[inline]
pub unsafe fn clear_slot(slot: *mut ObjPtr) {
    let old = *slot;
    *slot = std::ptr::null_mut();
    decref(old);
}

/// Increment and return the same pointer
///
/// # Safety
/// Same contract as [`incref`].
#[inline]
pub unsafe fn new_ref(obj: ObjPtr) -> ObjPtr {
    incref(obj);
    obj
}

/// Current reference count (0 for null)
///
/// # Safety
/// `obj` must be null or point at readable object memory.
#[inline]
pub unsafe fn refcount(obj: ObjPtr) -> isize {
    if obj.is_null() {
        0
    } else {
        (*obj).ob_refcnt
    }
}

/// Overwrite the reference count (resurrection and teardown only)
///
/// # Safety
/// `obj` must point at object memory that has not been freed.
#[inline]
pub unsafe fn set_refcount(obj: ObjPtr, count: isize) {
    (*obj).ob_refcnt = count;
}

/// Type of an object (borrowed)
///
/// # Safety
/// `obj` must be a live object.
#[inline(always)]
pub unsafe fn type_of(obj: ObjPtr) -> ObjPtr {
    (*obj).ob_type
}

/// Read a word at a byte offset inside an object
///
/// # Safety
/// `offset` must be inside the object's allocation.
#[inline(always)]
pub unsafe fn read_word(obj: ObjPtr, offset: usize) -> usize {
    *((obj as *mut u8).add(offset) as *const usize)
}

/// Write a word at a byte offset inside an object
///
/// # Safety
/// `offset` must be inside the object's allocation.
#[inline(always)]
pub unsafe fn write_word(obj: ObjPtr, offset: usize, value: usize) {
    *((obj as *mut u8).add(offset) as *mut usize) = value;
}

/// Address of a field as an object-pointer slot
///
/// # Safety
/// `offset` must be inside the object's allocation.
#[inline(always)]
pub unsafe fn field_slot(obj: ObjPtr, offset: usize) -> *mut ObjPtr {
    (obj as *mut u8).add(offset) as *mut ObjPtr
}

/// Destroy object (cold path, separated for better code generation)
#[cold]
#[inline(never)]
unsafe fn dealloc(obj: ObjPtr) {
    trace!(event = "refcount_destroy", address = ?obj);
    let tp = type_of(obj);
    match typeobj::dealloc_slot(tp) {
        Some(dealloc_fn) => dealloc_fn(obj),
        None => typeobj::subtype_dealloc(obj),
    }
}
