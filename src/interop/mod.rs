//! Slot plumbing between host code and foreign type objects
//!
//! Design: Every function the foreign runtime calls is an
//! `unsafe extern "C" fn` registered once as a thunk. Thunk bodies run
//! inside one of the guards below, which turn a [`BridgeError`] or a panic
//! into the foreign error indicator and the C-style failure value of the
//! slot's prototype. Nothing unwinds across the boundary.

pub mod slots;
pub mod slots_holder;
pub mod thunk;

#[cfg(test)]
mod tests;

pub use slots::{prototype_for, Prototype, SlotFn, SlotLevel};
pub use slots_holder::{SlotDefaults, SlotsHolder};
pub use thunk::Thunk;

use crate::error::{BridgeError, BridgeResult};
use crate::logging::error;
use hostbridge_runtime::errors::{self, ExcKind};
use hostbridge_runtime::object::ObjPtr;
use std::any::Any;
use std::ffi::c_int;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown panic")
    }
}

fn fail(slot: &str, outcome: std::thread::Result<BridgeError>) {
    match outcome {
        Ok(err) => err.restore(),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(event = "slot_panic", slot, message = %message, "Panic inside slot");
            errors::raise(
                ExcKind::SystemError,
                &format!("host panic in {}: {}", slot, message),
            );
        }
    }
}

fn run<T, F>(slot: &str, f: F) -> Option<T>
where
    F: FnOnce() -> BridgeResult<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            fail(slot, Ok(err));
            None
        }
        Err(payload) => {
            fail(slot, Err(payload));
            None
        }
    }
}

/// Object-returning slot: null on failure
pub(crate) fn guard_object<F>(slot: &str, f: F) -> ObjPtr
where
    F: FnOnce() -> BridgeResult<ObjPtr>,
{
    run(slot, f).unwrap_or(ptr::null_mut())
}

/// Status-returning slot: -1 on failure
pub(crate) fn guard_status<F>(slot: &str, f: F) -> c_int
where
    F: FnOnce() -> BridgeResult<c_int>,
{
    run(slot, f).unwrap_or(-1)
}

/// Length slot: -1 on failure
pub(crate) fn guard_len<F>(slot: &str, f: F) -> isize
where
    F: FnOnce() -> BridgeResult<usize>,
{
    run(slot, f).map(|n| n as isize).unwrap_or(-1)
}

/// Hash slot: -1 on failure, never -1 on success
pub(crate) fn guard_hash<F>(slot: &str, f: F) -> isize
where
    F: FnOnce() -> BridgeResult<isize>,
{
    match run(slot, f) {
        Some(-1) => -2,
        Some(h) => h,
        None => -1,
    }
}

/// Slot without a result (deallocators); failures stay in the indicator
pub(crate) fn guard_unit<F>(slot: &str, f: F)
where
    F: FnOnce() -> BridgeResult<()>,
{
    let _ = run(slot, f);
}
