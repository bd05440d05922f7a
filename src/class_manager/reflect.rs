//! Member reflection
//!
//! Two passes. The first collects the names declared directly on the type
//! (for interfaces, also on every inherited interface and on the root
//! object type, since interfaces inherit nothing at the foreign level).
//! The second gathers, for each of those names, every overload along the
//! whole inheritance chain, most-derived first.

use crate::binder::{MethodSet, Overload};
use crate::bridge::Bridge;
use crate::descriptors::{ClassDescriptor, Indexer};
use crate::error::BridgeResult;
use crate::handles::Target;
use crate::host::{self, HostMember, HostType, HostTypeRef, MemberFlags, MemberKind};
use crate::logging::{debug, trace};
use crate::members::{EventObject, ExtensionKind, FieldObject, MethodMode, MethodObject, PropertyObject};
use crate::operators::{self, OperatorTable, Side};
use hostbridge_runtime::object::{decref, new_ref, ObjPtr};
use std::collections::HashSet;
use std::sync::Arc;

/// Name of constructor members
const CTOR_NAME: &str = ".ctor";

/// Namespace entries and binding tables of one type
#[derive(Debug)]
pub struct Reflection {
    /// Owned references, in declaration order
    entries: Vec<(String, ObjPtr)>,
    ctors: MethodSet,
    indexer: Option<Indexer>,
    operators: OperatorTable,
}

impl Reflection {
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Store the binding tables on `desc` and hand over the entries
    pub(super) fn apply(mut self, desc: &ClassDescriptor) -> Vec<(String, ObjPtr)> {
        let entries = std::mem::take(&mut self.entries);
        desc.set_ctors(std::mem::take(&mut self.ctors));
        desc.set_indexer(self.indexer.take());
        desc.set_operators(std::mem::take(&mut self.operators));
        desc.set_injected(entries.iter().map(|(name, _)| name.clone()).collect());
        entries
    }

    fn push(&mut self, name: &str, value: ObjPtr) {
        self.entries.push((name.to_string(), value));
    }

    fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }
}

impl Drop for Reflection {
    fn drop(&mut self) {
        for (_, value) in self.entries.drain(..) {
            unsafe { decref(value) };
        }
    }
}

fn visible(member: &HostMember) -> bool {
    if !member.access.is_bindable() {
        return false;
    }
    if member.flags.contains(MemberFlags::SECURITY_DENIED) {
        trace!(event = "member_denied", name = %member.name, "Member refused by host security");
        return false;
    }
    true
}

fn overload(name: &str, member: &HostMember, info: &host::MethodInfo, fallback: &HostTypeRef) -> Overload {
    Overload {
        name: name.to_string(),
        info: info.clone(),
        is_static: member.is_static(),
        is_ctor: matches!(member.kind, MemberKind::Constructor(_)),
        declaring: member.declaring_type().unwrap_or_else(|| Arc::clone(fallback)),
    }
}

/// Indexer of the type, or of its nearest ancestor that has one
fn indexer_of(sources: &[&HostType], fallback: &HostTypeRef) -> Option<Indexer> {
    for t in sources {
        let mut indexer = Indexer::new();
        for member in t.members() {
            if let MemberKind::Property(info) = &member.kind {
                if info.is_indexer() && visible(&member) {
                    let declaring = member.declaring_type().unwrap_or_else(|| Arc::clone(fallback));
                    indexer.add(info, member.flags, &declaring);
                }
            }
        }
        if !indexer.is_empty() {
            return Some(indexer);
        }
    }
    None
}

/// Reflect the members of `desc.host`
///
/// # Safety
/// The global lock must be held.
pub(super) unsafe fn reflect(bridge: &Bridge, desc: &Arc<ClassDescriptor>) -> BridgeResult<Reflection> {
    let ty = &desc.host;
    let spliced: Vec<HostTypeRef> = if ty.is_interface() {
        let mut extra = ty.all_interfaces();
        extra.push(host::object_type());
        extra
    } else {
        Vec::new()
    };
    let mut sources: Vec<&HostType> = ty.chain().collect();
    sources.extend(spliced.iter().map(|t| &**t));

    let mut names: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for t in std::iter::once(&**ty).chain(spliced.iter().map(|t| &**t)) {
        for member in t.members() {
            if seen.insert(member.name.clone()) {
                names.push(member.name);
            }
        }
    }

    let mut out = Reflection {
        entries: Vec::new(),
        ctors: MethodSet::new(ty.name()),
        indexer: None,
        operators: OperatorTable::default(),
    };
    for name in &names {
        if name == CTOR_NAME {
            for member in ty.members_named(name) {
                if let (true, Some(info)) = (visible(&member), member.method_info()) {
                    out.ctors.push(overload(ty.name(), &member, info, ty));
                }
            }
            continue;
        }
        reflect_name(bridge, ty, &sources, name, &mut out)?;
    }

    out.indexer = indexer_of(&sources, ty);

    let mirrored: Vec<(String, MethodMode, MethodSet)> = out
        .operators
        .mirrored()
        .into_iter()
        .map(|(dunder, side, set)| {
            let mode = match side {
                Side::Forward => MethodMode::Forward,
                Side::Reverse => MethodMode::Reverse,
            };
            (dunder.to_string(), mode, set.clone())
        })
        .collect();
    for (dunder, mode, set) in mirrored {
        if out.has(&dunder) {
            continue;
        }
        let obj = method_object(bridge, ty, set, mode)?;
        out.push(&dunder, obj);
    }

    if !out.ctors.is_empty() {
        let obj = method_object(bridge, ty, out.ctors.clone(), MethodMode::Normal)?;
        out.push("__init__", obj);
    }

    debug!(
        event = "class_reflected",
        type_name = %ty.name(),
        entries = out.entries.len(),
        ctors = out.ctors.len(),
        indexer = out.indexer.is_some()
    );
    Ok(out)
}

unsafe fn method_object(bridge: &Bridge, ty: &HostTypeRef, set: MethodSet, mode: MethodMode) -> BridgeResult<ObjPtr> {
    let target: Target = Arc::new(MethodObject::new(ty.name(), set, mode, bridge.weak()));
    bridge.types().new_extension_instance(ExtensionKind::Method, target)
}

/// Entry for one name; the most-derived declaration decides its kind
unsafe fn reflect_name(
    bridge: &Bridge,
    ty: &HostTypeRef,
    sources: &[&HostType],
    name: &str,
    out: &mut Reflection,
) -> BridgeResult<()> {
    let mut methods = MethodSet::new(name);
    let mut first: Option<HostMember> = None;
    for (depth, t) in sources.iter().enumerate() {
        for member in t.members_named(name) {
            if !visible(&member) {
                continue;
            }
            match &member.kind {
                MemberKind::Method(info) => {
                    if first.as_ref().map_or(true, |f| matches!(f.kind, MemberKind::Method(_))) {
                        methods.push(overload(name, &member, info, ty));
                    }
                }
                MemberKind::Property(info) if info.is_indexer() => continue,
                MemberKind::NestedType(_) | MemberKind::Constructor(_) if depth > 0 => continue,
                _ => {}
            }
            if first.is_none() {
                first = Some(member);
            }
        }
    }
    let Some(first) = first else {
        return Ok(());
    };
    let declaring = first.declaring_type().unwrap_or_else(|| Arc::clone(ty));
    let is_static = first.is_static();
    let weak = bridge.weak();
    let types = bridge.types();

    let entry = match first.kind {
        MemberKind::Method(_) => {
            if let Some(kind) = operators::lookup(name) {
                out.operators.add(kind, &methods, ty);
            }
            method_object(bridge, ty, methods, MethodMode::Normal)?
        }
        MemberKind::Property(info) => {
            let target: Target = Arc::new(PropertyObject::new(name, info, is_static, declaring, weak));
            types.new_extension_instance(ExtensionKind::Property, target)?
        }
        MemberKind::Field(info) => {
            let target: Target = Arc::new(FieldObject::new(name, info, is_static, declaring, weak));
            types.new_extension_instance(ExtensionKind::Field, target)?
        }
        MemberKind::Event(info) => {
            if is_static {
                debug!(event = "static_event_skipped", type_name = %ty.name(), name);
                return Ok(());
            }
            let target: Target = Arc::new(EventObject::new(name, info, declaring, weak));
            types.new_extension_instance(ExtensionKind::Event, target)?
        }
        MemberKind::NestedType(nested) => new_ref(bridge.get_class(&nested)?),
        MemberKind::Constructor(_) => return Ok(()),
    };
    out.push(name, entry);
    Ok(())
}
