//! Per-type record of installed slots
//!
//! Design: A holder remembers every slot the bridge wrote into one type
//! object, plus whatever has to outlive those slots. `reset` is the undo:
//! it puts back the values an ordinary subclass of the same foreign base
//! would have, releases the type's ownership handle and runs deferred
//! deallocators. After a reset the type keeps working on foreign defaults
//! and never calls into host code again.

use super::thunk::Thunk;
use crate::error::{BridgeError, BridgeResult};
use crate::handles::{self, OwnershipHandle, Target};
use crate::logging::{self, warn};
use dashmap::DashMap;
use hostbridge_runtime::layout::offsets;
use hostbridge_runtime::object::{decref, read_word, write_word, ObjPtr, SharedPtr};
use hostbridge_runtime::typeobj;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Slot name to default value
pub type SlotTable = HashMap<&'static str, usize>;

/// Runs against the type object during reset
pub type Deallocator = Box<dyn FnOnce(ObjPtr) + Send>;

/// Default slot values captured from probe classes, one per foreign base
#[derive(Default)]
pub struct SlotDefaults {
    by_base: DashMap<usize, Arc<SlotTable>>,
}

impl fmt::Debug for SlotDefaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotDefaults")
            .field("bases", &self.by_base.len())
            .finish()
    }
}

impl SlotDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots an ordinary subclass of `base` receives from the runtime
    ///
    /// # Safety
    /// `base` must be a ready foreign type carrying `BASETYPE`; the global
    /// lock must be held.
    pub unsafe fn for_base(&self, base: ObjPtr) -> BridgeResult<Arc<SlotTable>> {
        if let Some(table) = self.by_base.get(&(base as usize)) {
            return Ok(Arc::clone(table.value()));
        }
        let probe_name = format!("{}_slot_probe", typeobj::name(base));
        let probe = typeobj::new_heap_type(&probe_name, base).map_err(BridgeError::from)?;
        let table = Arc::new(read_slots(probe));
        decref(probe);
        self.by_base.insert(base as usize, Arc::clone(&table));
        Ok(table)
    }

    /// Current slots of `tp` itself, without probing
    ///
    /// # Safety
    /// `tp` must be a live type object.
    pub unsafe fn of_type(tp: ObjPtr) -> Arc<SlotTable> {
        Arc::new(read_slots(tp))
    }

    pub fn len(&self) -> usize {
        self.by_base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_base.is_empty()
    }
}

unsafe fn read_slots(tp: ObjPtr) -> SlotTable {
    offsets()
        .slot_offsets()
        .map(|(name, offset)| (name, typeobj::get(tp, offset)))
        .collect()
}

/// A slot written by the bridge
#[derive(Debug, Clone)]
pub struct InstalledSlot {
    pub name: &'static str,
    pub offset: usize,
    pub thunk: Arc<Thunk>,
}

#[derive(Default)]
struct HolderState {
    slots: Vec<InstalledSlot>,
    keep_alive: Vec<Target>,
    deallocators: Vec<Deallocator>,
    reset: bool,
}

pub struct SlotsHolder {
    type_ptr: SharedPtr,
    type_name: String,
    /// Offset of the type's own handle word, if it has one
    handle_offset: Option<usize>,
    /// Slots reset leaves alone
    preserved: Vec<&'static str>,
    defaults: Arc<SlotTable>,
    state: Mutex<HolderState>,
}

impl fmt::Debug for SlotsHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SlotsHolder")
            .field("type", &self.type_name)
            .field("slots", &state.slots.len())
            .field("reset", &state.reset)
            .finish()
    }
}

impl SlotsHolder {
    /// # Safety
    /// `tp` must be a live type object that outlives the holder's reset.
    pub unsafe fn new(
        tp: ObjPtr,
        defaults: Arc<SlotTable>,
        handle_offset: Option<usize>,
        preserved: &[&'static str],
    ) -> Self {
        Self {
            type_ptr: SharedPtr(tp),
            type_name: typeobj::name(tp),
            handle_offset,
            preserved: preserved.to_vec(),
            defaults,
            state: Mutex::new(HolderState::default()),
        }
    }

    pub fn type_ptr(&self) -> ObjPtr {
        self.type_ptr.get()
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Write `thunk` into slot `name` and remember it
    ///
    /// # Safety
    /// The global lock must be held and the type must still be live.
    pub unsafe fn set(&self, name: &'static str, thunk: Arc<Thunk>) -> BridgeResult<()> {
        let offset = offsets().slot(name).ok_or_else(|| {
            BridgeError::construction(&self.type_name, format!("unknown slot '{}'", name))
        })?;
        let mut state = self.state.lock();
        if state.reset {
            return Err(BridgeError::construction(
                &self.type_name,
                "slots were already reset",
            ));
        }
        typeobj::set(self.type_ptr.get(), offset, thunk.address());
        logging::log_slot_installed(&self.type_name, name, thunk.address());
        state.slots.retain(|s| s.offset != offset);
        state.slots.push(InstalledSlot {
            name,
            offset,
            thunk,
        });
        Ok(())
    }

    /// Track a thunk the type received without [`set`](Self::set), such as
    /// one inherited while readying
    pub fn adopt(&self, name: &'static str, offset: usize, thunk: Arc<Thunk>) {
        let mut state = self.state.lock();
        if state.reset || state.slots.iter().any(|s| s.offset == offset) {
            return;
        }
        state.slots.push(InstalledSlot {
            name,
            offset,
            thunk,
        });
    }

    /// Is slot `name` tracked by this holder?
    pub fn is_set(&self, name: &str) -> bool {
        self.state.lock().slots.iter().any(|s| s.name == name)
    }

    /// Installed slots in installation order
    pub fn installed(&self) -> Vec<InstalledSlot> {
        self.state.lock().slots.clone()
    }

    /// Default value reset writes for `name`
    pub fn default_for(&self, name: &str) -> usize {
        self.defaults.get(name).copied().unwrap_or(0)
    }

    /// Keep `target` alive until reset
    pub fn keep_alive(&self, target: Target) {
        self.state.lock().keep_alive.push(target);
    }

    /// Run `f` on the type object during reset
    pub fn add_deallocator(&self, f: Deallocator) {
        self.state.lock().deallocators.push(f);
    }

    pub fn is_reset(&self) -> bool {
        self.state.lock().reset
    }

    /// Restore foreign defaults; returns how many slots were rewritten
    ///
    /// Calling it again does nothing.
    ///
    /// # Safety
    /// The global lock must be held and the type must still be live.
    pub unsafe fn reset(&self) -> usize {
        let tp = self.type_ptr.get();
        let (slots, deallocators, keep_alive) = {
            let mut state = self.state.lock();
            if state.reset {
                return 0;
            }
            state.reset = true;
            (
                std::mem::take(&mut state.slots),
                std::mem::take(&mut state.deallocators),
                std::mem::take(&mut state.keep_alive),
            )
        };

        let mut rewritten = 0;
        for slot in &slots {
            if self.preserved.contains(&slot.name) {
                continue;
            }
            typeobj::set(tp, slot.offset, self.default_for(slot.name));
            rewritten += 1;
        }

        if let Some(offset) = self.handle_offset {
            let raw = read_word(tp, offset);
            write_word(tp, offset, 0);
            if let Some(handle) = OwnershipHandle::from_raw(raw) {
                if let Err(err) = handles::free(handle) {
                    warn!(event = "type_handle_free", type_name = %self.type_name, error = %err);
                }
            }
        }

        for dealloc in deallocators {
            dealloc(tp);
        }
        drop(keep_alive);

        typeobj::type_modified(tp);
        logging::log_slots_reset(&self.type_name, rewritten);
        rewritten
    }
}
