//! Indexed properties as subscription
//!
//! Every indexed property of a type (and, when it declares none, of its
//! nearest ancestor that does) feeds one [`Indexer`]. `obj[k]` binds the
//! getters, `obj[k] = v` the setters with the value appended.

use super::{context, host_object_of};
use crate::binder::{self, MethodSet, Overload};
use crate::error::{BridgeError, BridgeResult};
use crate::host::{HostTypeRef, MemberFlags, PropertyInfo, Signature};
use crate::interop::{guard_object, guard_status, SlotFn, SlotLevel};
use hostbridge_runtime::builtins::tuple;
use hostbridge_runtime::object::{decref, type_of, ObjPtr};
use hostbridge_runtime::typeobj;
use std::ffi::c_int;

pub const LEVEL: SlotLevel = SlotLevel {
    name: "indexer",
    slots: &[
        ("mp_subscript", SlotFn::Binary(indexer_subscript)),
        ("mp_ass_subscript", SlotFn::ObjObjArg(indexer_ass_subscript)),
    ],
};

#[derive(Debug, Clone, Default)]
pub struct Indexer {
    getters: MethodSet,
    setters: MethodSet,
}

impl Indexer {
    pub fn new() -> Self {
        Self {
            getters: MethodSet::new("get_Item"),
            setters: MethodSet::new("set_Item"),
        }
    }

    /// Add the accessors of one indexed property
    pub fn add(&mut self, property: &PropertyInfo, flags: MemberFlags, declaring: &HostTypeRef) {
        let is_static = flags.contains(MemberFlags::STATIC);
        if let Some(getter) = &property.getter {
            self.getters.push(Overload {
                name: String::from("get_Item"),
                info: getter.clone(),
                is_static,
                is_ctor: false,
                declaring: declaring.clone(),
            });
        }
        if let Some(setter) = &property.setter {
            self.setters.push(Overload {
                name: String::from("set_Item"),
                info: setter.clone(),
                is_static,
                is_ctor: false,
                declaring: declaring.clone(),
            });
        }
    }

    pub fn getters(&self) -> &MethodSet {
        &self.getters
    }

    pub fn setters(&self) -> &MethodSet {
        &self.setters
    }

    pub fn is_empty(&self) -> bool {
        self.getters.is_empty() && self.setters.is_empty()
    }

    /// Human-readable accessor list
    pub fn describe(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        for o in self.getters.overloads() {
            lines.push(describe_accessor(&o.info.sig, "get"));
        }
        for o in self.setters.overloads() {
            lines.push(describe_accessor(&o.info.sig, "set"));
        }
        lines.join("\n")
    }
}

fn describe_accessor(sig: &Signature, verb: &str) -> String {
    let names: Vec<String> = sig
        .params
        .iter()
        .map(|p| format!("{} {}", p.ty.name(), p.name))
        .collect();
    format!("{} this[{}]", verb, names.join(", "))
}

/// Index key as positional arguments: a tuple key spreads
unsafe fn key_args(key: ObjPtr) -> Vec<ObjPtr> {
    if tuple::is_tuple(key) {
        tuple::items(key).to_vec()
    } else {
        vec![key]
    }
}

unsafe fn subscript(obj: ObjPtr, key: ObjPtr) -> BridgeResult<ObjPtr> {
    let (bridge, desc) = context(type_of(obj))?;
    let indexer = desc.indexer().ok_or_else(|| not_indexable(obj))?;
    if indexer.getters.is_empty() {
        return Err(BridgeError::Binding(format!(
            "'{}' object indexer is write-only",
            typeobj::name(type_of(obj))
        )));
    }
    let receiver = host_object_of(obj);
    binder::invoke(&bridge, &indexer.getters, receiver.as_ref(), &key_args(key))
}

unsafe fn assign(obj: ObjPtr, key: ObjPtr, value: ObjPtr) -> BridgeResult<()> {
    if value.is_null() {
        return Err(BridgeError::Binding(String::from("indexed elements cannot be deleted")));
    }
    let (bridge, desc) = context(type_of(obj))?;
    let indexer = desc.indexer().ok_or_else(|| not_indexable(obj))?;
    if indexer.setters.is_empty() {
        return Err(BridgeError::Binding(format!(
            "'{}' object indexer is read-only",
            typeobj::name(type_of(obj))
        )));
    }
    let mut args = key_args(key);
    args.push(value);
    let receiver = host_object_of(obj);
    let result = binder::invoke(&bridge, &indexer.setters, receiver.as_ref(), &args)?;
    decref(result);
    Ok(())
}

unsafe fn not_indexable(obj: ObjPtr) -> BridgeError {
    BridgeError::Binding(format!(
        "'{}' object is not subscriptable",
        typeobj::name(type_of(obj))
    ))
}

unsafe extern "C" fn indexer_subscript(obj: ObjPtr, key: ObjPtr) -> ObjPtr {
    guard_object("mp_subscript", || subscript(obj, key))
}

unsafe extern "C" fn indexer_ass_subscript(obj: ObjPtr, key: ObjPtr, value: ObjPtr) -> c_int {
    guard_status("mp_ass_subscript", || {
        assign(obj, key, value)?;
        Ok(0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{self, HostType, MethodInfo, Param};

    fn item_property() -> PropertyInfo {
        let index = vec![Param::new("index", host::int32_type())];
        let mut set_params = index.clone();
        set_params.push(Param::new("value", host::int32_type()));
        PropertyInfo {
            ty: host::int32_type(),
            getter: Some(MethodInfo::native(
                Signature::new(index.clone(), host::int32_type()),
                |_, args| Ok(args[0].clone()),
            )),
            setter: Some(MethodInfo::native(
                Signature::new(set_params, host::void_type()),
                |_, _| Ok(crate::host::HostValue::Null),
            )),
            index_params: index,
        }
    }

    #[test]
    fn test_indexer_collects_both_accessors() {
        let ty = HostType::class("Point").build();
        let mut indexer = Indexer::new();
        assert!(indexer.is_empty());
        indexer.add(&item_property(), MemberFlags::empty(), &ty);
        assert_eq!(indexer.getters().len(), 1);
        assert_eq!(indexer.setters().len(), 1);
        assert!(indexer.describe().contains("get this[Int32 index]"));
    }

    #[test]
    fn test_same_accessor_shape_is_kept_once() {
        let ty = HostType::class("Point").build();
        let mut indexer = Indexer::new();
        indexer.add(&item_property(), MemberFlags::empty(), &ty);
        indexer.add(&item_property(), MemberFlags::empty(), &ty);
        assert_eq!(indexer.getters().len(), 1);
    }
}
