//! Slot function prototypes
//!
//! Every function slot of a type object holds one of these native
//! prototypes (or zero). Reading a slot re-types the word as the
//! prototype its offset is documented to hold.

use crate::layout::offsets;
use crate::object::{read_word, ObjPtr};
use crate::protocol::RawBuffer;
use std::ffi::{c_int, c_void};

pub type Destructor = unsafe extern "C" fn(ObjPtr);
pub type UnaryFunc = unsafe extern "C" fn(ObjPtr) -> ObjPtr;
pub type BinaryFunc = unsafe extern "C" fn(ObjPtr, ObjPtr) -> ObjPtr;
pub type TernaryFunc = unsafe extern "C" fn(ObjPtr, ObjPtr, ObjPtr) -> ObjPtr;
pub type ObjObjArgProc = unsafe extern "C" fn(ObjPtr, ObjPtr, ObjPtr) -> c_int;
pub type ObjObjProc = unsafe extern "C" fn(ObjPtr, ObjPtr) -> c_int;
pub type LenFunc = unsafe extern "C" fn(ObjPtr) -> isize;
pub type HashFunc = unsafe extern "C" fn(ObjPtr) -> isize;
pub type Inquiry = unsafe extern "C" fn(ObjPtr) -> c_int;
pub type RichCmpFunc = unsafe extern "C" fn(ObjPtr, ObjPtr, c_int) -> ObjPtr;
pub type VisitProc = unsafe extern "C" fn(ObjPtr, *mut c_void) -> c_int;
pub type TraverseProc = unsafe extern "C" fn(ObjPtr, VisitProc, *mut c_void) -> c_int;
pub type AllocFunc = unsafe extern "C" fn(ObjPtr, isize) -> ObjPtr;
pub type FreeFunc = unsafe extern "C" fn(*mut c_void);
pub type GetBufferProc = unsafe extern "C" fn(ObjPtr, *mut RawBuffer, c_int) -> c_int;
pub type ReleaseBufferProc = unsafe extern "C" fn(ObjPtr, *mut RawBuffer);

/// Read the slot at `offset` as prototype `F`
///
/// # Safety
/// `tp` must be a live type object and `F` must be the function pointer
/// prototype that `offset` holds.
#[inline]
pub unsafe fn slot<F: Copy>(tp: ObjPtr, offset: usize) -> Option<F> {
    debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
    let word = read_word(tp, offset);
    if word == 0 {
        None
    } else {
        Some(std::mem::transmute_copy::<usize, F>(&word))
    }
}

/// # Safety
/// `tp` must be a live type object.
#[inline]
pub unsafe fn dealloc_slot(tp: ObjPtr) -> Option<Destructor> {
    slot::<Destructor>(tp, offsets().tp_dealloc)
}

/// # Safety
/// `tp` must be a live type object.
#[inline]
pub unsafe fn free_slot(tp: ObjPtr) -> Option<FreeFunc> {
    slot::<FreeFunc>(tp, offsets().tp_free)
}
