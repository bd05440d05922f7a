//! Class descriptors
//!
//! Design: A [`ClassDescriptor`] is what a produced type's handle points
//! at. It names the host type, the variant that picks the slot levels,
//! and the binding tables (constructors, indexer, operators) the slots
//! consult at call time. Variant slot levels install before the shared
//! class level so a variant overrides only what it must.

pub mod array;
pub mod class_base;
pub mod delegate;
pub mod derived;
pub mod exception;
pub mod generic;
pub mod indexer;
pub mod interface;
pub mod length;

#[cfg(test)]
mod tests;

pub use indexer::Indexer;

use crate::binder::MethodSet;
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::handles::{self, Target};
use crate::host::{self, HostObject, HostTypeRef};
use crate::interop::SlotLevel;
use crate::logging::warn;
use crate::operators::OperatorTable;
use crate::type_manager::metatype;
use crate::wrappers::PeerLink;
use hostbridge_runtime::builtins::exceptions;
use hostbridge_runtime::object::{decref, type_of, ObjPtr};
use hostbridge_runtime::typeobj;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Shape of a produced type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Class,
    Array,
    Delegate,
    Interface,
    Exception,
    /// Host type whose instances keep a link to a foreign peer
    Derived,
    GenericDefinition,
}

impl Variant {
    /// Pick the variant of a host type; the first match wins
    pub fn for_type(ty: &HostTypeRef) -> Self {
        if ty.is_array() {
            Variant::Array
        } else if ty.is_generic_definition() {
            Variant::GenericDefinition
        } else if ty.is_delegate() {
            Variant::Delegate
        } else if ty.is_interface() {
            Variant::Interface
        } else if ty.is_exception() {
            Variant::Exception
        } else if ty.has_peer_field() {
            Variant::Derived
        } else {
            Variant::Class
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Variant::Class => "class",
            Variant::Array => "array",
            Variant::Delegate => "delegate",
            Variant::Interface => "interface",
            Variant::Exception => "exception",
            Variant::Derived => "derived",
            Variant::GenericDefinition => "generic",
        }
    }

    fn levels(&self) -> &'static [SlotLevel] {
        match self {
            Variant::Class => &[],
            Variant::Array => &[array::LEVEL],
            Variant::Delegate => &[delegate::LEVEL],
            Variant::Interface => &[interface::LEVEL],
            Variant::Exception => &[exception::LEVEL],
            Variant::Derived => &[derived::LEVEL],
            Variant::GenericDefinition => &[generic::LEVEL],
        }
    }
}

pub struct ClassDescriptor {
    pub host: HostTypeRef,
    pub variant: Variant,
    bridge: Weak<Bridge>,
    type_ptr: AtomicUsize,
    ctors: RwLock<MethodSet>,
    indexer: RwLock<Option<Arc<Indexer>>>,
    operators: RwLock<Arc<OperatorTable>>,
    injected: RwLock<Vec<String>>,
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("host", &self.host.full_name())
            .field("variant", &self.variant)
            .field("type", &format_args!("{:#x}", self.type_ptr.load(Ordering::Acquire)))
            .finish()
    }
}

impl ClassDescriptor {
    pub fn new(host: HostTypeRef, bridge: Weak<Bridge>) -> Self {
        let variant = Variant::for_type(&host);
        let ctors = MethodSet::new(host.name());
        Self {
            host,
            variant,
            bridge,
            type_ptr: AtomicUsize::new(0),
            ctors: RwLock::new(ctors),
            indexer: RwLock::new(None),
            operators: RwLock::new(Arc::new(OperatorTable::default())),
            injected: RwLock::new(Vec::new()),
        }
    }

    pub fn bridge(&self) -> BridgeResult<Arc<Bridge>> {
        self.bridge.upgrade().ok_or(BridgeError::NotRunning)
    }

    pub fn type_ptr(&self) -> ObjPtr {
        self.type_ptr.load(Ordering::Acquire) as ObjPtr
    }

    pub fn set_type_ptr(&self, tp: ObjPtr) {
        self.type_ptr.store(tp as usize, Ordering::Release);
    }

    /// Sealed host types cannot be subclassed from foreign code
    pub fn is_sealed(&self) -> bool {
        self.host.attributes().contains(host::TypeAttributes::SEALED)
            || self.host.is_value_type()
            || matches!(self.variant, Variant::Array | Variant::Delegate)
    }

    /// Documentation text: the host's own, or a generated summary
    pub fn doc(&self) -> String {
        if let Some(doc) = self.host.doc() {
            return doc.to_string();
        }
        let ctors = self.ctors.read();
        let mut text = format!("{} {}", self.variant.name(), self.host.full_name());
        if !ctors.is_empty() {
            text.push_str("\n\n");
            text.push_str(&ctors.describe());
        }
        text
    }

    pub fn ctors(&self) -> MethodSet {
        self.ctors.read().clone()
    }

    pub fn set_ctors(&self, ctors: MethodSet) {
        *self.ctors.write() = ctors;
    }

    pub fn indexer(&self) -> Option<Arc<Indexer>> {
        self.indexer.read().clone()
    }

    pub fn set_indexer(&self, indexer: Option<Indexer>) {
        *self.indexer.write() = indexer.filter(|i| !i.is_empty()).map(Arc::new);
    }

    pub fn operators(&self) -> Arc<OperatorTable> {
        Arc::clone(&self.operators.read())
    }

    pub fn set_operators(&self, table: OperatorTable) {
        *self.operators.write() = Arc::new(table);
    }

    /// Names placed in the type dict at construction
    pub fn injected(&self) -> Vec<String> {
        self.injected.read().clone()
    }

    pub fn set_injected(&self, names: Vec<String>) {
        *self.injected.write() = names;
    }

    /// Variant level, then the binding levels, then the shared class level
    pub fn slot_levels(&self) -> Vec<SlotLevel> {
        let mut levels: Vec<SlotLevel> = self.variant.levels().to_vec();
        if self.indexer.read().is_some() {
            levels.push(indexer::LEVEL);
        }
        if length::has_count(&self.host) {
            levels.push(length::LEVEL);
        }
        let operators = self.operators();
        for slot in operators.slots() {
            if let Some(level) = class_base::operator_level(slot) {
                levels.push(level);
            }
        }
        levels.push(class_base::LEVEL);
        levels
    }
}

/// Descriptor of a produced type
///
/// # Safety
/// `tp` must be a live type object.
pub unsafe fn descriptor_of(tp: ObjPtr) -> Option<Arc<ClassDescriptor>> {
    if !metatype::is_bridge_type(tp) {
        return None;
    }
    handles::get_as::<ClassDescriptor>(metatype::type_handle(tp)?)
}

/// Descriptor of `tp` or its closest produced base
///
/// # Safety
/// `tp` must be a live type object.
pub unsafe fn descriptor_for_type(tp: ObjPtr) -> Option<Arc<ClassDescriptor>> {
    descriptor_of(metatype::nearest_bridge_type(tp)?)
}

/// Descriptor of the closest produced type of an instance
///
/// # Safety
/// `obj` must be a live object.
pub unsafe fn descriptor_for_instance(obj: ObjPtr) -> Option<Arc<ClassDescriptor>> {
    if obj.is_null() {
        return None;
    }
    descriptor_for_type(type_of(obj))
}

/// Descriptor and running bridge behind a slot call
///
/// # Safety
/// `tp` must be a live type object.
pub(crate) unsafe fn context(tp: ObjPtr) -> BridgeResult<(Arc<Bridge>, Arc<ClassDescriptor>)> {
    let desc = descriptor_for_type(tp).ok_or_else(|| {
        BridgeError::Binding(format!("'{}' is not a bridged type", typeobj::name(tp)))
    })?;
    let bridge = desc.bridge()?;
    Ok((bridge, desc))
}

/// Host object behind a bridged instance
///
/// # Safety
/// `obj` must be a live object.
pub unsafe fn host_object_of(obj: ObjPtr) -> Option<Arc<HostObject>> {
    if obj.is_null() {
        return None;
    }
    handles::get_as::<HostObject>(metatype::instance_handle(obj)?)
}

/// Make `obj` (freshly allocated from a produced type) stand for `host`
///
/// # Safety
/// The global lock must be held; `obj` has no handle yet.
pub(crate) unsafe fn attach(
    bridge: &Bridge,
    desc: &ClassDescriptor,
    obj: ObjPtr,
    host_obj: &Arc<HostObject>,
) -> BridgeResult<()> {
    let target: Target = Arc::clone(host_obj) as Target;
    let handle = handles::alloc_strong(bridge.owner(), target);
    if let Err(err) = metatype::set_instance_handle(obj, Some(handle)) {
        if let Err(free_err) = handles::free(handle) {
            warn!(event = "handle_free_failed", error = %free_err, "Instance handle was already released");
        }
        return Err(err);
    }
    match desc.variant {
        Variant::Exception => {
            let (message, trace) = host_obj
                .exception_data()
                .map(|d| (d.message.clone(), d.trace.clone()))
                .unwrap_or_default();
            exceptions::init_payload(obj, &message, trace.as_deref());
        }
        Variant::Derived => {
            *host_obj.peer() = Some(PeerLink::borrowed(obj, bridge.finalizer()));
        }
        _ => {}
    }
    Ok(())
}

/// New instance of `tp` standing for `host_obj`
///
/// # Safety
/// The global lock must be held; `tp` must be a produced type or a
/// foreign subclass of one.
pub(crate) unsafe fn instantiate(
    bridge: &Bridge,
    desc: &ClassDescriptor,
    tp: ObjPtr,
    host_obj: &Arc<HostObject>,
) -> BridgeResult<ObjPtr> {
    let obj = typeobj::generic_alloc(tp, 0)?;
    if let Err(err) = attach(bridge, desc, obj, host_obj) {
        decref(obj);
        return Err(err);
    }
    Ok(obj)
}
