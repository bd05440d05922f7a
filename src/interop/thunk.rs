//! Process-wide thunk registry
//!
//! A thunk is the pinned native entry point the foreign runtime calls for
//! one slot of one descriptor level. Entries are created once per
//! `level.slot` key and never removed, so an address written into any
//! type object stays callable for the life of the process.

use super::slots::{prototype_for, SlotFn};
use crate::error::{BridgeError, BridgeResult};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

#[derive(Debug)]
pub struct Thunk {
    pub key: String,
    pub slot: &'static str,
    pub func: SlotFn,
}

impl Thunk {
    pub fn address(&self) -> usize {
        self.func.address()
    }
}

static REGISTRY: Lazy<DashMap<String, Arc<Thunk>>> = Lazy::new(DashMap::new);

/// Fetch or build the thunk of `slot` at `level`
///
/// Fails when the slot name is unknown or the implementation has the
/// wrong prototype for it.
pub fn get_or_create(level: &str, slot: &'static str, func: SlotFn) -> BridgeResult<Arc<Thunk>> {
    let expected = prototype_for(slot)
        .ok_or_else(|| BridgeError::construction(level, format!("unknown slot '{}'", slot)))?;
    if expected != func.prototype() {
        return Err(BridgeError::construction(
            level,
            format!(
                "slot '{}' expects {:?} but got {:?}",
                slot,
                expected,
                func.prototype()
            ),
        ));
    }

    let key = format!("{}.{}", level, slot);
    if let Some(existing) = REGISTRY.get(&key) {
        return Ok(Arc::clone(existing.value()));
    }
    let thunk = REGISTRY
        .entry(key.clone())
        .or_insert_with(|| Arc::new(Thunk { key, slot, func }));
    Ok(Arc::clone(thunk.value()))
}

/// Thunk of `slot` whose native address is `address`
pub fn find_by_address(slot: &str, address: usize) -> Option<Arc<Thunk>> {
    REGISTRY
        .iter()
        .find(|entry| entry.slot == slot && entry.address() == address)
        .map(|entry| Arc::clone(entry.value()))
}

/// Number of thunks built in this process
pub fn count() -> usize {
    REGISTRY.len()
}
