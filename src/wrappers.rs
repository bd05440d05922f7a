//! Host-side owners of foreign references
//!
//! Design: Dropping a wrapper is the host's finalizer. It may run on any
//! thread; when that thread already holds the global lock and the object
//! belongs to the running generation, the release happens on the spot,
//! otherwise it is queued on the [`Finalizer`] and performed by the next
//! drain.

use crate::error::{BridgeError, BridgeResult};
use crate::finalizer::Finalizer;
use hostbridge_runtime::gil;
use hostbridge_runtime::object::{self, ObjPtr, SharedPtr};
use hostbridge_runtime::protocol::{self, RawBuffer};
use std::ffi::c_int;
use std::fmt;
use std::sync::Arc;

/// Owned reference to a foreign object
pub struct ForeignObject {
    ptr: SharedPtr,
    generation: u64,
    finalizer: Arc<Finalizer>,
}

impl ForeignObject {
    /// Take ownership of a new reference
    ///
    /// # Safety
    /// `ptr` must be a live object whose reference the caller gives away.
    pub unsafe fn from_owned(ptr: ObjPtr, finalizer: &Arc<Finalizer>) -> Self {
        Self {
            ptr: SharedPtr(ptr),
            generation: hostbridge_runtime::generation(),
            finalizer: Arc::clone(finalizer),
        }
    }

    /// Add a reference to a borrowed object and own it
    ///
    /// # Safety
    /// `ptr` must be live and the global lock held.
    pub unsafe fn from_borrowed(ptr: ObjPtr, finalizer: &Arc<Finalizer>) -> Self {
        object::incref(ptr);
        Self::from_owned(ptr, finalizer)
    }

    /// Borrowed pointer; valid while `self` lives
    pub fn as_ptr(&self) -> ObjPtr {
        self.ptr.get()
    }

    pub fn addr(&self) -> usize {
        self.ptr.addr()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Is the object from the runtime that is running now?
    pub fn is_current(&self) -> bool {
        hostbridge_runtime::is_initialized() && self.generation == hostbridge_runtime::generation()
    }

    /// New reference for handing to foreign code
    pub fn to_owned_ptr(&self) -> BridgeResult<ObjPtr> {
        if !self.is_current() {
            return Err(BridgeError::StaleGeneration {
                address: self.addr(),
                enqueued: self.generation,
                current: hostbridge_runtime::generation(),
            });
        }
        let _gil = gil::acquire();
        unsafe { object::incref(self.ptr.get()) };
        Ok(self.ptr.get())
    }

    /// Give the reference back without releasing it
    pub fn into_raw(mut self) -> ObjPtr {
        let ptr = self.ptr.get();
        self.ptr = SharedPtr::NULL;
        ptr
    }
}

impl Clone for ForeignObject {
    fn clone(&self) -> Self {
        if self.is_current() {
            let _gil = gil::acquire();
            unsafe { object::incref(self.ptr.get()) };
        }
        Self {
            ptr: self.ptr,
            generation: self.generation,
            finalizer: Arc::clone(&self.finalizer),
        }
    }
}

impl fmt::Debug for ForeignObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignObject")
            .field("address", &format_args!("{:#x}", self.addr()))
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for ForeignObject {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        if gil::is_held() && self.is_current() {
            unsafe { object::decref(self.ptr.get()) };
        } else {
            self.finalizer.enqueue(self.ptr, self.generation);
        }
        self.ptr = SharedPtr::NULL;
    }
}

/// Exported buffer of a foreign object
pub struct BufferView {
    view: Option<SendBuffer>,
    generation: u64,
    finalizer: Arc<Finalizer>,
}

/// A filled buffer view that may be released from another thread
///
/// Safety: the view is only read or released under the global lock.
pub struct SendBuffer(pub Box<RawBuffer>);

unsafe impl Send for SendBuffer {}

impl BufferView {
    /// Request a buffer from `obj`
    pub fn acquire(obj: &ForeignObject, flags: c_int) -> BridgeResult<Self> {
        let _gil = gil::acquire();
        let view = unsafe { protocol::get_buffer(obj.as_ptr(), flags) }
            .map_err(|e| BridgeError::from(e).capture())?;
        Ok(Self {
            view: Some(SendBuffer(view)),
            generation: obj.generation(),
            finalizer: Arc::clone(&obj.finalizer),
        })
    }

    fn raw(&self) -> Option<&RawBuffer> {
        self.view.as_ref().map(|v| &*v.0)
    }

    /// Copy of the exported bytes
    pub fn to_vec(&self) -> Vec<u8> {
        let _gil = gil::acquire();
        self.raw()
            .map(|v| unsafe { v.as_bytes() }.to_vec())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.raw().map(|v| v.len.max(0) as usize).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn item_size(&self) -> usize {
        self.raw().map(|v| v.itemsize.max(0) as usize).unwrap_or(0)
    }

    pub fn shape(&self) -> Vec<usize> {
        let _gil = gil::acquire();
        self.raw()
            .map(|v| unsafe { v.shape() }.iter().map(|d| *d as usize).collect())
            .unwrap_or_default()
    }

    pub fn format(&self) -> String {
        let _gil = gil::acquire();
        self.raw()
            .map(|v| unsafe { v.format() })
            .unwrap_or_default()
    }

    pub fn is_readonly(&self) -> bool {
        self.raw().map(|v| v.readonly != 0).unwrap_or(true)
    }
}

impl Drop for BufferView {
    fn drop(&mut self) {
        let Some(view) = self.view.take() else {
            return;
        };
        let current = hostbridge_runtime::is_initialized()
            && self.generation == hostbridge_runtime::generation();
        if gil::is_held() && current {
            unsafe { protocol::release_buffer(view.0) };
        } else {
            self.finalizer.enqueue_buffer(view, self.generation);
        }
    }
}

/// Link from a host object to its foreign peer
///
/// While `owned` is false the peer keeps itself alive and the host only
/// points at it. After the peer's refcount reached zero with the host
/// object still referenced, the peer is resurrected and the link owns
/// its last reference.
pub struct PeerLink {
    peer: SharedPtr,
    generation: u64,
    owned: bool,
    finalizer: Arc<Finalizer>,
}

impl PeerLink {
    pub(crate) fn borrowed(peer: ObjPtr, finalizer: &Arc<Finalizer>) -> Self {
        Self {
            peer: SharedPtr(peer),
            generation: hostbridge_runtime::generation(),
            owned: false,
            finalizer: Arc::clone(finalizer),
        }
    }

    pub(crate) fn peer(&self) -> ObjPtr {
        self.peer.get()
    }

    pub(crate) fn is_owned(&self) -> bool {
        self.owned
    }

    pub(crate) fn is_current(&self) -> bool {
        hostbridge_runtime::is_initialized() && self.generation == hostbridge_runtime::generation()
    }

    pub(crate) fn set_owned(&mut self, owned: bool) {
        self.owned = owned;
    }

    /// Hand an owned peer to the finalizer's derived queue
    pub(crate) fn release(self) {
        if self.owned {
            self.finalizer.enqueue_derived(self.peer, self.generation);
        }
    }
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("peer", &format_args!("{:#x}", self.peer.addr()))
            .field("owned", &self.owned)
            .finish()
    }
}
