//! Host types whose instances keep a live foreign peer
//!
//! The peer normally owns the host object through a strong handle. When
//! the peer's refcount reaches zero while host code still references the
//! host object, the peer is resurrected: its handle turns weak and the
//! host-side [`PeerLink`](crate::wrappers::PeerLink) takes over the last
//! reference. Dropping the host object then queues the peer for
//! [`finalize_peer`] on the next drain.

use super::class_base::release_instance;
use super::host_object_of;
use crate::error::{BridgeError, BridgeResult};
use crate::handles;
use crate::interop::{guard_unit, SlotFn, SlotLevel};
use crate::logging::{debug, trace};
use crate::type_manager::metatype;
use hostbridge_runtime::object::{decref, set_refcount, ObjPtr};
use std::sync::Arc;

pub const LEVEL: SlotLevel = SlotLevel {
    name: "derived",
    slots: &[("tp_dealloc", SlotFn::Destructor(derived_dealloc))],
};

/// References to the host object held by the handle table and by the caller
const OWN_REFERENCES: usize = 2;

unsafe extern "C" fn derived_dealloc(obj: ObjPtr) {
    guard_unit("tp_dealloc", || {
        if let Some(host_obj) = host_object_of(obj) {
            if Arc::strong_count(&host_obj) > OWN_REFERENCES {
                let mut slot = host_obj.peer();
                if let (Some(link), Some(handle)) = (slot.as_mut(), metatype::instance_handle(obj)) {
                    set_refcount(obj, 1);
                    handles::make_weak(handle)?;
                    link.set_owned(true);
                    trace!(
                        event = "peer_resurrected",
                        address = obj as usize,
                        "Foreign peer kept alive by its host object"
                    );
                    return Ok(());
                }
            }
            host_obj.peer().take();
        }
        release_instance(obj);
        Ok(())
    })
}

/// Drop the last reference of a resurrected peer
///
/// # Safety
/// The global lock must be held; `ptr` must be a peer whose link was
/// owned by a host object that has since been dropped.
pub(crate) unsafe fn finalize_peer(ptr: ObjPtr) -> BridgeResult<()> {
    if ptr.is_null() {
        return Err(BridgeError::Binding(String::from("null peer queued for finalization")));
    }
    if let Some(handle) = metatype::take_instance_handle(ptr) {
        // Teardown frees every handle a bridge made; instances dropped later find theirs gone
        if let Err(err) = handles::free(handle) {
            debug!(event = "peer_handle_stale", error = %err);
        }
    }
    decref(ptr);
    Ok(())
}
