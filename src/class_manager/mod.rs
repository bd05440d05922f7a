//! Produced types per host type
//!
//! Design: One cache entry per host type id. The entry goes in right after
//! phase one of construction, before members are reflected, so a type
//! whose members mention the type itself (or a nested type mentioning its
//! outer type) finds the half-built entry instead of recursing forever.
//! A failure afterwards removes the entry and undoes the type.

mod reflect;

#[cfg(test)]
mod tests;

pub use reflect::Reflection;

use crate::bridge::Bridge;
use crate::descriptors::{ClassDescriptor, Variant};
use crate::error::{BridgeError, BridgeResult};
use crate::host::HostTypeRef;
use crate::logging::{debug, warn};
use crate::type_manager::TypeManager;
use dashmap::DashMap;
use hostbridge_runtime::builtins;
use hostbridge_runtime::errors::ExcKind;
use hostbridge_runtime::object::{decref, ObjPtr};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Chooses the foreign bases of a produced type
///
/// Receives the host type and the bases the bridge would use (borrowed,
/// layout base first) and returns the bases to use instead. Returned types
/// must stay alive for as long as the bridge runs.
pub type BaseTypeProvider = Arc<dyn Fn(&HostTypeRef, Vec<ObjPtr>) -> Vec<ObjPtr> + Send + Sync>;

#[derive(Default)]
pub struct ClassManager {
    cache: DashMap<u64, Arc<ClassDescriptor>>,
    base_provider: RwLock<Option<BaseTypeProvider>>,
}

impl fmt::Debug for ClassManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassManager")
            .field("classes", &self.cache.len())
            .field("base_provider", &self.base_provider.read().is_some())
            .finish()
    }
}

impl ClassManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_base_provider(&self, provider: Option<BaseTypeProvider>) {
        *self.base_provider.write() = provider;
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Descriptor of an already produced type
    pub fn lookup(&self, host: &HostTypeRef) -> Option<Arc<ClassDescriptor>> {
        self.cache.get(&host.id()).map(|e| Arc::clone(e.value()))
    }

    /// Foreign type of `host`, produced on first request
    ///
    /// The returned pointer is borrowed; the type manager keeps the type
    /// alive until [`remove_classes`](Self::remove_classes).
    ///
    /// # Safety
    /// The global lock must be held.
    pub unsafe fn get_or_create(&self, bridge: &Bridge, host: &HostTypeRef) -> BridgeResult<ObjPtr> {
        if let Some(existing) = self.lookup(host) {
            return Ok(existing.type_ptr());
        }

        let desc = Arc::new(ClassDescriptor::new(Arc::clone(host), bridge.weak()));
        let bases = self.bases_for(bridge, host, desc.variant)?;
        let types = bridge.types();
        let tp = types.initialize_class_core(&desc, &bases)?;
        self.cache.insert(host.id(), Arc::clone(&desc));

        if let Err(err) = self.populate(bridge, types, &desc, tp) {
            self.cache.remove(&host.id());
            types.release_type(tp);
            desc.set_type_ptr(std::ptr::null_mut());
            warn!(
                event = "class_failed",
                type_name = %host.full_name(),
                error = %err,
                "Foreign type construction failed"
            );
            return Err(err);
        }
        debug!(
            event = "class_created",
            type_name = %host.full_name(),
            variant = desc.variant.name(),
            cached = self.cache.len()
        );
        Ok(tp)
    }

    unsafe fn populate(
        &self,
        bridge: &Bridge,
        types: &TypeManager,
        desc: &Arc<ClassDescriptor>,
        tp: ObjPtr,
    ) -> BridgeResult<()> {
        let reflection = reflect::reflect(bridge, desc)?;
        let entries = reflection.apply(desc);
        let result = types.initialize_class(desc, tp, &entries);
        for (_, value) in entries {
            decref(value);
        }
        result
    }

    /// Layout base first, then whatever the provider adds
    unsafe fn bases_for(&self, bridge: &Bridge, host: &HostTypeRef, variant: Variant) -> BridgeResult<Vec<ObjPtr>> {
        let base = match host.base() {
            _ if variant == Variant::Interface => builtins::object_type(),
            Some(base) if variant == Variant::Exception && !base.is_exception() => {
                ExcKind::Exception.type_object()
            }
            None if variant == Variant::Exception => ExcKind::Exception.type_object(),
            Some(base) => self.get_or_create(bridge, base)?,
            None => builtins::object_type(),
        };
        let defaults = vec![base];
        let provider = self.base_provider.read().clone();
        let bases = match provider {
            Some(provider) => provider(host, defaults),
            None => defaults,
        };
        if bases.is_empty() {
            return Err(BridgeError::construction(
                host.name(),
                "base type provider returned no bases",
            ));
        }
        Ok(bases)
    }

    /// Release every produced type
    ///
    /// # Safety
    /// The global lock must be held.
    pub unsafe fn remove_classes(&self, types: &TypeManager) -> usize {
        let all: Vec<Arc<ClassDescriptor>> = self.cache.iter().map(|e| Arc::clone(e.value())).collect();
        self.cache.clear();
        let mut released = 0;
        for desc in all {
            if types.release_type(desc.type_ptr()) {
                released += 1;
            }
            desc.set_type_ptr(std::ptr::null_mut());
        }
        released
    }
}

