//! `len()` for collection-like classes
//!
//! A class gets `__len__` when it, a base or one of its interfaces has a
//! readable, non-indexed `Count` property. The getter is resolved on the
//! receiver's runtime type, so interface declarations only mark the type.

use super::{context, host_object_of};
use crate::error::{BridgeError, BridgeResult};
use crate::host::{HostException, HostMember, HostObject, HostType, HostValue, MemberKind, MethodBody, NativeFn};
use crate::interop::{guard_len, SlotFn, SlotLevel};
use hostbridge_runtime::object::{type_of, ObjPtr};
use hostbridge_runtime::typeobj;
use std::sync::Arc;

pub const LEVEL: SlotLevel = SlotLevel {
    name: "length",
    slots: &[
        ("mp_length", SlotFn::Len(collection_len)),
        ("sq_length", SlotFn::Len(collection_len)),
    ],
};

const COUNT: &str = "Count";

fn is_count(member: &HostMember) -> bool {
    if !member.access.is_bindable() {
        return false;
    }
    match &member.kind {
        MemberKind::Property(info) => info.getter.is_some() && info.index_params.is_empty(),
        _ => false,
    }
}

/// Does `ty` expose a `Count` that `len()` can read?
pub fn has_count(ty: &HostType) -> bool {
    ty.chain().any(|t| t.members_named(COUNT).iter().any(is_count))
        || ty
            .all_interfaces()
            .iter()
            .any(|i| i.members_named(COUNT).iter().any(is_count))
}

/// Most-derived implemented `Count` getter
fn count_getter(ty: &HostType) -> Option<NativeFn> {
    for t in ty.chain() {
        for member in t.members_named(COUNT) {
            if !is_count(&member) {
                continue;
            }
            if let MemberKind::Property(info) = &member.kind {
                if let Some(MethodBody::Native(f)) = info.getter.as_ref().map(|g| &g.body) {
                    return Some(Arc::clone(f));
                }
            }
        }
    }
    None
}

fn read_count(this: &Arc<HostObject>) -> Result<Option<HostValue>, HostException> {
    match count_getter(this.host_type()) {
        Some(getter) => getter(Some(this), &mut []).map(Some),
        None => Ok(None),
    }
}

unsafe fn length(obj: ObjPtr) -> BridgeResult<usize> {
    let (bridge, _) = context(type_of(obj))?;
    let this = host_object_of(obj).ok_or_else(|| {
        BridgeError::Binding(format!(
            "'{}' instance is not bound to a host object",
            typeobj::name(type_of(obj))
        ))
    })?;
    match read_count(&this) {
        Ok(Some(HostValue::Int(n))) if n >= 0 => Ok(n as usize),
        Ok(Some(other)) => Err(BridgeError::marshal("non-negative Int32 count", format!("{:?}", other))),
        Ok(None) => Err(BridgeError::Binding(format!(
            "object of type '{}' has no len()",
            this.host_type().name()
        ))),
        Err(exc) => Err(bridge.raise_host_exception(&exc)),
    }
}

unsafe extern "C" fn collection_len(obj: ObjPtr) -> isize {
    guard_len("mp_length", || length(obj))
}
