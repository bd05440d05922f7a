//! Synthesis of foreign type objects
//!
//! Design: Types are built in two phases. Phase one fixes the binary
//! layout and stores the type's handle before any instance memory exists;
//! phase two installs slots and readies the type, after which the
//! runtime's own inheritance sees a frozen layout.
//! - Slot levels install most-derived first; a bound slot name is never
//!   overwritten by a base level
//! - Every produced type gets one [`SlotsHolder`] that can undo the work
//! - Extension types (method objects, properties, ...) are built lazily,
//!   once per kind

pub mod metatype;

#[cfg(test)]
mod tests;

use crate::descriptors::ClassDescriptor;
use crate::error::{BridgeError, BridgeResult};
use crate::handles::{self, OwnerTag, Target};
use crate::interop::slots_holder::SlotTable;
use crate::interop::{thunk, SlotDefaults, SlotLevel, SlotsHolder};
use crate::logging::{self, debug, warn};
use crate::members::{ExtensionKind, ExtensionType};
use dashmap::DashMap;
use hostbridge_runtime::builtins::{self, dict, string};
use hostbridge_runtime::layout::{offsets, WORD};
use hostbridge_runtime::object::{decref, incref, write_word, ObjPtr, SharedPtr};
use hostbridge_runtime::typeobj::{self, TypeFlags};
use hostbridge_runtime::{builtins::tuple, errors};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Slots every produced type must carry
const REQUIRED_SLOTS: &[&str] = &["tp_traverse", "tp_clear"];

pub struct TypeManager {
    owner: OwnerTag,
    module_name: String,
    defaults: SlotDefaults,
    metatype: RwLock<SharedPtr>,
    meta_holder: Mutex<Option<Arc<SlotsHolder>>>,
    holders: DashMap<usize, Arc<SlotsHolder>>,
    extension_types: DashMap<ExtensionKind, SharedPtr>,
}

impl fmt::Debug for TypeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeManager")
            .field("module", &self.module_name)
            .field("types", &self.holders.len())
            .field("extension_types", &self.extension_types.len())
            .finish()
    }
}

/// Offsets chosen for a new type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub basicsize: usize,
    pub itemsize: usize,
    pub dictoffset: usize,
    pub weaklistoffset: usize,
    pub handle_offset: usize,
}

impl Layout {
    /// Reuse the base's dict and weak-list words when it has them, else
    /// append one word each; the instance handle is inherited from a
    /// bridge base or appended last
    ///
    /// # Safety
    /// `base` must be a ready type object.
    pub unsafe fn derive(base: ObjPtr) -> Self {
        let off = offsets();
        let mut size = typeobj::basicsize(base);
        let mut dictoffset = typeobj::dictoffset(base);
        if dictoffset == 0 {
            dictoffset = size;
            size += WORD;
        }
        let mut weaklistoffset = typeobj::get(base, off.tp_weaklistoffset);
        if weaklistoffset == 0 {
            weaklistoffset = size;
            size += WORD;
        }
        let handle_offset = match metatype::instance_handle_offset(base) {
            Some(offset) => offset,
            None => {
                let offset = size;
                size += WORD;
                offset
            }
        };
        Self {
            basicsize: size,
            itemsize: typeobj::get(base, off.tp_itemsize),
            dictoffset,
            weaklistoffset,
            handle_offset,
        }
    }

    unsafe fn apply(&self, tp: ObjPtr) {
        let off = offsets();
        typeobj::set(tp, off.tp_basicsize, self.basicsize);
        typeobj::set(tp, off.tp_itemsize, self.itemsize);
        typeobj::set(tp, off.tp_dictoffset, self.dictoffset);
        typeobj::set(tp, off.tp_weaklistoffset, self.weaklistoffset);
        write_word(tp, metatype::instance_offset_field(), self.handle_offset);
    }
}

impl TypeManager {
    pub fn new(owner: OwnerTag, module_name: &str) -> Self {
        Self {
            owner,
            module_name: module_name.to_string(),
            defaults: SlotDefaults::new(),
            metatype: RwLock::new(SharedPtr::NULL),
            meta_holder: Mutex::new(None),
            holders: DashMap::new(),
            extension_types: DashMap::new(),
        }
    }

    /// Build the metatype
    ///
    /// # Safety
    /// The global lock must be held.
    pub(crate) unsafe fn start(&self) -> BridgeResult<()> {
        if !self.metatype.read().is_null() {
            return Ok(());
        }
        let name = format!("{}.Metatype", self.module_name);
        let (meta, holder) = metatype::create(&name)?;
        *self.metatype.write() = SharedPtr(meta);
        *self.meta_holder.lock() = Some(holder);
        Ok(())
    }

    pub fn metatype(&self) -> ObjPtr {
        self.metatype.read().get()
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn owner(&self) -> OwnerTag {
        self.owner
    }

    /// Holder of a produced type
    pub fn holder(&self, tp: ObjPtr) -> Option<Arc<SlotsHolder>> {
        self.holders.get(&(tp as usize)).map(|h| Arc::clone(h.value()))
    }

    pub fn type_count(&self) -> usize {
        self.holders.len()
    }

    fn require_metatype(&self) -> BridgeResult<ObjPtr> {
        let meta = self.metatype();
        if meta.is_null() {
            return Err(BridgeError::NotRunning);
        }
        Ok(meta)
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Blank heap type named `name` whose metatype is `meta`
    ///
    /// Both GC slots get the runtime's defaults up front; the protocol
    /// tables are already wired to their fixed offsets.
    ///
    /// # Safety
    /// The global lock must be held.
    pub unsafe fn allocate_type_object(&self, name: &str, meta: ObjPtr) -> BridgeResult<ObjPtr> {
        let off = offsets();
        let tp = typeobj::alloc_type_object(meta)?;
        if let Err(err) = typeobj::set_heap_name(tp, name) {
            decref(tp);
            return Err(err.into());
        }
        typeobj::set(tp, off.tp_traverse, typeobj::subtype_traverse as usize);
        typeobj::set(tp, off.tp_clear, typeobj::subtype_clear as usize);
        typeobj::set_flags(
            tp,
            TypeFlags::HEAPTYPE | TypeFlags::BASETYPE | TypeFlags::HAVE_GC,
        );
        Ok(tp)
    }

    /// Defaults a reset writes into a type deriving from `base`
    ///
    /// Bridge bases are skipped in favor of their nearest foreign ancestor.
    unsafe fn defaults_for(&self, base: ObjPtr) -> BridgeResult<Arc<SlotTable>> {
        let mut foreign_base = base;
        while metatype::is_bridge_type(foreign_base) {
            let next = typeobj::base(foreign_base);
            if next.is_null() {
                break;
            }
            foreign_base = next;
        }
        self.defaults.for_base(foreign_base)
    }

    /// Write every level's slots, most-derived first
    ///
    /// # Safety
    /// The global lock must be held; the type must not be ready yet.
    pub unsafe fn install_levels(&self, holder: &SlotsHolder, levels: &[SlotLevel]) -> BridgeResult<usize> {
        let mut seen: HashSet<&'static str> = HashSet::new();
        for level in levels {
            for &(slot, func) in level.slots {
                if !seen.insert(slot) {
                    continue;
                }
                let thunk = thunk::get_or_create(level.name, slot, func).map_err(|err| {
                    BridgeError::construction(
                        holder.type_name(),
                        format!("level '{}': {}", level.name, err),
                    )
                })?;
                holder.set(slot, thunk)?;
            }
        }
        Ok(seen.len())
    }

    /// Fill `slot` with the runtime default when nothing set it
    ///
    /// # Safety
    /// The global lock must be held.
    pub unsafe fn initialize_slot_if_empty(&self, tp: ObjPtr, slot: &str, value: usize) -> BridgeResult<bool> {
        let offset = offsets()
            .slot(slot)
            .ok_or_else(|| BridgeError::construction(typeobj::name(tp), format!("unknown slot '{}'", slot)))?;
        if typeobj::get(tp, offset) != 0 {
            return Ok(false);
        }
        typeobj::set(tp, offset, value);
        Ok(true)
    }

    /// Copy one slot value between types
    ///
    /// # Safety
    /// Both types must be live; the global lock must be held.
    pub unsafe fn copy_slot(&self, from: ObjPtr, to: ObjPtr, slot: &str) -> BridgeResult<()> {
        let offset = offsets()
            .slot(slot)
            .ok_or_else(|| BridgeError::construction(typeobj::name(to), format!("unknown slot '{}'", slot)))?;
        typeobj::set(to, offset, typeobj::get(from, offset));
        Ok(())
    }

    unsafe fn fill_required(&self, holder: &SlotsHolder) -> BridgeResult<()> {
        let tp = holder.type_ptr();
        for slot in REQUIRED_SLOTS {
            self.initialize_slot_if_empty(tp, slot, holder.default_for(slot))?;
        }
        Ok(())
    }

    /// Track thunks a type inherited from bridged bases during readying
    unsafe fn adopt_inherited(&self, holder: &SlotsHolder) {
        let tp = holder.type_ptr();
        for (name, offset) in offsets().slot_offsets() {
            if holder.is_set(name) {
                continue;
            }
            let value = typeobj::get(tp, offset);
            if value == 0 || value == holder.default_for(name) {
                continue;
            }
            if let Some(inherited) = thunk::find_by_address(name, value) {
                holder.adopt(name, offset, inherited);
            }
        }
    }

    unsafe fn stamp_module(&self, tp: ObjPtr, module: &str) -> BridgeResult<()> {
        let name = string::new(module)?;
        let result = dict::set_item_str(typeobj::type_dict(tp), "__module__", name);
        decref(name);
        result?;
        Ok(())
    }

    unsafe fn ensure_dict(&self, tp: ObjPtr) -> BridgeResult<ObjPtr> {
        let existing = typeobj::type_dict(tp);
        if !existing.is_null() {
            return Ok(existing);
        }
        let fresh = dict::new()?;
        typeobj::set(tp, offsets().tp_dict, fresh as usize);
        Ok(fresh)
    }

    // ------------------------------------------------------------------
    // Extension types
    // ------------------------------------------------------------------

    /// Type of an extension kind, built on first use
    ///
    /// # Safety
    /// The global lock must be held.
    pub unsafe fn create_type(&self, kind: ExtensionKind) -> BridgeResult<ObjPtr> {
        if let Some(existing) = self.extension_types.get(&kind) {
            return Ok(existing.get());
        }
        let meta = self.require_metatype()?;
        let base = if kind == ExtensionKind::RootModule {
            builtins::module_type()
        } else {
            builtins::object_type()
        };
        let name = format!("{}.{}", self.module_name, kind.type_name());
        let tp = self.allocate_type_object(&name, meta)?;
        incref(base);
        typeobj::set(tp, offsets().tp_base, base as usize);
        Layout::derive(base).apply(tp);

        let built = self.finish_extension(tp, base, kind);
        match built {
            Ok(holder) => {
                self.holders.insert(tp as usize, holder);
                self.extension_types.insert(kind, SharedPtr(tp));
                logging::log_type_created(&name, kind.type_name(), typeobj::basicsize(tp));
                Ok(tp)
            }
            Err(err) => {
                decref(tp);
                Err(err)
            }
        }
    }

    unsafe fn finish_extension(&self, tp: ObjPtr, base: ObjPtr, kind: ExtensionKind) -> BridgeResult<Arc<SlotsHolder>> {
        let holder = Arc::new(SlotsHolder::new(
            tp,
            self.defaults_for(base)?,
            Some(metatype::type_handle_field()),
            &[],
        ));
        let built = (|| {
            self.install_levels(&holder, kind.levels())?;
            self.fill_required(&holder)?;
            self.ensure_dict(tp)?;
            typeobj::type_ready(tp)?;
            self.stamp_module(tp, &self.module_name)?;
            let target: Target = Arc::new(ExtensionType { kind });
            metatype::set_type_handle(tp, Some(handles::alloc_strong(self.owner, target)));
            Ok(())
        })();
        if let Err(err) = built {
            holder.reset();
            return Err(err);
        }
        Ok(holder)
    }

    /// New instance of an extension kind whose handle owns `target`
    ///
    /// # Safety
    /// The global lock must be held.
    pub unsafe fn new_extension_instance(&self, kind: ExtensionKind, target: Target) -> BridgeResult<ObjPtr> {
        let tp = self.create_type(kind)?;
        let obj = typeobj::generic_alloc(tp, 0)?;
        let handle = handles::alloc_strong(self.owner, target);
        if let Err(err) = metatype::set_instance_handle(obj, Some(handle)) {
            if let Err(free_err) = handles::free(handle) {
                warn!(event = "handle_free_failed", error = %free_err, "Extension handle was already released");
            }
            decref(obj);
            return Err(err);
        }
        Ok(obj)
    }

    // ------------------------------------------------------------------
    // Class types
    // ------------------------------------------------------------------

    /// Phase one: layout, bases and the type handle
    ///
    /// `bases` are borrowed; the first one is the layout base.
    ///
    /// # Safety
    /// The global lock must be held.
    pub unsafe fn initialize_class_core(&self, desc: &Arc<ClassDescriptor>, bases: &[ObjPtr]) -> BridgeResult<ObjPtr> {
        let name = desc.host.name().to_string();
        let Some(&primary) = bases.first() else {
            return Err(BridgeError::construction(&name, "at least one base type is required"));
        };
        for &base in bases {
            if !typeobj::flags(base).contains(TypeFlags::BASETYPE) {
                return Err(BridgeError::construction(
                    &name,
                    format!("type '{}' is not an acceptable base type", typeobj::name(base)),
                ));
            }
        }
        for &other in &bases[1..] {
            if metatype::is_bridge_type(other) && !typeobj::is_subtype(primary, other) {
                return Err(BridgeError::construction(
                    &name,
                    "multiple bases have instance lay-out conflict",
                ));
            }
        }

        let meta = self.require_metatype()?;
        let tp = self.allocate_type_object(&name, meta)?;
        let off = offsets();
        incref(primary);
        typeobj::set(tp, off.tp_base, primary as usize);
        if bases.len() > 1 {
            match tuple::from_borrowed(bases) {
                Ok(t) => typeobj::set(tp, off.tp_bases, t as usize),
                Err(err) => {
                    decref(tp);
                    return Err(err.into());
                }
            }
        }
        Layout::derive(primary).apply(tp);
        if desc.is_sealed() {
            typeobj::set_flags(tp, typeobj::flags(tp) - TypeFlags::BASETYPE);
        }

        let holder = match self.defaults_for(primary) {
            Ok(defaults) => Arc::new(SlotsHolder::new(
                tp,
                defaults,
                Some(metatype::type_handle_field()),
                &[],
            )),
            Err(err) => {
                decref(tp);
                return Err(err);
            }
        };
        let target: Target = Arc::clone(desc) as Target;
        metatype::set_type_handle(tp, Some(handles::alloc_strong(self.owner, target)));
        desc.set_type_ptr(tp);
        self.holders.insert(tp as usize, holder);
        Ok(tp)
    }

    /// Phase two: namespace, slots, readiness
    ///
    /// `entries` are borrowed values stored into the type dict.
    ///
    /// # Safety
    /// The global lock must be held; `tp` must come from phase one.
    pub unsafe fn initialize_class(
        &self,
        desc: &Arc<ClassDescriptor>,
        tp: ObjPtr,
        entries: &[(String, ObjPtr)],
    ) -> BridgeResult<()> {
        let holder = self
            .holder(tp)
            .ok_or_else(|| BridgeError::construction(desc.host.name(), "type was not initialized"))?;

        let type_dict = self.ensure_dict(tp)?;
        for (key, value) in entries {
            dict::set_item_str(type_dict, key, *value)?;
        }
        if dict::get_item_str(type_dict, "__doc__").is_null() {
            let doc = string::new(&desc.doc())?;
            let result = dict::set_item_str(type_dict, "__doc__", doc);
            decref(doc);
            result?;
        }
        let module = desc
            .host
            .namespace()
            .map(str::to_string)
            .unwrap_or_else(|| self.module_name.clone());
        self.stamp_module(tp, &module)?;

        let levels = desc.slot_levels();
        let installed = self.install_levels(&holder, &levels)?;
        self.fill_required(&holder)?;
        typeobj::type_ready(tp)?;
        self.adopt_inherited(&holder);
        debug!(
            event = "class_slots",
            type_name = %desc.host.name(),
            installed,
            levels = levels.len()
        );
        logging::log_type_created(desc.host.name(), desc.variant.name(), typeobj::basicsize(tp));
        Ok(())
    }

    /// Undo a produced type: reset its slots and drop the manager's reference
    ///
    /// # Safety
    /// The global lock must be held.
    pub unsafe fn release_type(&self, tp: ObjPtr) -> bool {
        let Some((_, holder)) = self.holders.remove(&(tp as usize)) else {
            return false;
        };
        holder.reset();
        if errors::occurred() {
            warn!(event = "release_type_error", type_name = %holder.type_name());
            errors::clear();
        }
        decref(tp);
        true
    }

    /// Reset and release every remaining type, then the metatype
    ///
    /// # Safety
    /// The global lock must be held.
    pub(crate) unsafe fn shutdown(&self) -> usize {
        let mut released = 0;
        let remaining: Vec<usize> = self.holders.iter().map(|e| *e.key()).collect();
        for addr in remaining {
            if self.release_type(addr as ObjPtr) {
                released += 1;
            }
        }
        self.extension_types.clear();

        if let Some(holder) = self.meta_holder.lock().take() {
            holder.reset();
        }
        let meta = std::mem::replace(&mut *self.metatype.write(), SharedPtr::NULL);
        decref(meta.get());
        released
    }
}
