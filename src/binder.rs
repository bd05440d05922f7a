//! Overload resolution
//!
//! Design: A [`MethodSet`] is every overload visible under one foreign name,
//! merged across the inheritance chain with the most-derived declaration of
//! a signature winning. Binding tries overloads in a fixed order (arity,
//! then parameter rank) and takes the first whose parameters all convert
//! without error. Conversion failures during binding are never raised;
//! only the final "no match" is.

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{HostException, HostObject, HostTypeRef, HostValue, MemberKind, MethodBody, MethodInfo, NativeFn, Signature, TypeCode};
use crate::logging::trace;
use hostbridge_runtime::builtins::{self, tuple};
use hostbridge_runtime::object::{decref, type_of, ObjPtr};
use hostbridge_runtime::typeobj;
use std::fmt;
use std::sync::Arc;

/// One callable declaration
#[derive(Clone)]
pub struct Overload {
    pub name: String,
    pub info: MethodInfo,
    pub is_static: bool,
    pub is_ctor: bool,
    pub declaring: HostTypeRef,
}

impl fmt::Debug for Overload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring.name(), self.info.sig.describe(&self.name))
    }
}

impl Overload {
    fn rank(&self) -> u32 {
        self.info.sig.params.iter().map(|p| param_rank(p.ty.code())).sum()
    }
}

/// Preference of a parameter type: narrow primitives bind first
fn param_rank(code: TypeCode) -> u32 {
    match code {
        TypeCode::Boolean => 10,
        TypeCode::Int32 => 20,
        TypeCode::Int64 => 21,
        TypeCode::Float64 => 30,
        TypeCode::String => 40,
        TypeCode::Other | TypeCode::Void => 50,
        TypeCode::Object => 100,
    }
}

/// Overloads of one name
#[derive(Debug, Clone, Default)]
pub struct MethodSet {
    name: String,
    overloads: Vec<Overload>,
}

impl MethodSet {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            overloads: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add an overload unless one of the same shape is already present
    pub fn push(&mut self, overload: Overload) -> bool {
        if self
            .overloads
            .iter()
            .any(|o| o.is_static == overload.is_static && o.info.sig.same_shape(&overload.info.sig))
        {
            return false;
        }
        self.overloads.push(overload);
        true
    }

    pub fn merge(&mut self, other: &MethodSet) {
        for overload in &other.overloads {
            self.push(overload.clone());
        }
    }

    pub fn overloads(&self) -> &[Overload] {
        &self.overloads
    }

    pub fn len(&self) -> usize {
        self.overloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overloads.is_empty()
    }

    pub fn has_instance(&self) -> bool {
        self.overloads.iter().any(|o| !o.is_static && !o.is_ctor)
    }

    pub fn has_static(&self) -> bool {
        self.overloads.iter().any(|o| o.is_static || o.is_ctor)
    }

    /// Overloads in binding order
    pub fn ordered(&self) -> Vec<&Overload> {
        let mut ordered: Vec<&Overload> = self.overloads.iter().collect();
        ordered.sort_by_key(|o| (o.info.sig.arity(), o.rank()));
        ordered
    }

    /// One line per overload
    pub fn describe(&self) -> String {
        self.overloads
            .iter()
            .map(|o| o.info.sig.describe(&self.name))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of a host call before conversion back
#[derive(Debug)]
pub struct CallOutcome {
    pub ret: HostValue,
    /// Final values of by-ref arguments, in declaration order
    pub by_ref: Vec<HostValue>,
    pub sig: Signature,
}

/// Convert `args` for one overload; `None` when any argument does not fit
unsafe fn convert_args(bridge: &Bridge, sig: &Signature, args: &[ObjPtr]) -> BridgeResult<Option<Vec<HostValue>>> {
    if sig.arity() != args.len() {
        return Ok(None);
    }
    let converter = bridge.converter();
    let mut values = Vec::with_capacity(args.len());
    for (param, &arg) in sig.params.iter().zip(args) {
        match converter.to_host(bridge, arg, &param.ty, false)? {
            Some(value) => values.push(value),
            None => return Ok(None),
        }
    }
    Ok(Some(values))
}

/// Body to run for `overload` on `receiver`, resolving abstract members
/// against the receiver's runtime type
pub fn resolve_body(overload: &Overload, receiver: Option<&Arc<HostObject>>) -> Result<NativeFn, HostException> {
    if let MethodBody::Native(f) = &overload.info.body {
        return Ok(Arc::clone(f));
    }
    let target = receiver.ok_or_else(|| HostException::null_reference(&overload.name))?;
    find_virtual(target.host_type(), &overload.name, &overload.info.sig).ok_or_else(|| {
        HostException::general(format!(
            "no implementation of abstract member {} on {}",
            overload.name,
            target.host_type().name()
        ))
    })
}

/// Most-derived native implementation of `name` with the shape of `sig`
pub fn find_virtual(ty: &HostTypeRef, name: &str, sig: &Signature) -> Option<NativeFn> {
    for t in ty.chain() {
        for member in t.members_named(name) {
            if let MemberKind::Method(info) = &member.kind {
                if let MethodBody::Native(f) = &info.body {
                    if info.sig.same_shape(sig) {
                        return Some(Arc::clone(f));
                    }
                }
            }
        }
    }
    None
}

/// Call the most-derived parameterless-compatible override of `name`
pub fn call_virtual(
    target: &Arc<HostObject>,
    name: &str,
    args: &mut [HostValue],
) -> Option<Result<HostValue, HostException>> {
    for t in target.host_type().chain() {
        for member in t.members_named(name) {
            if let MemberKind::Method(info) = &member.kind {
                if let MethodBody::Native(f) = &info.body {
                    if info.sig.arity() == args.len() {
                        return Some(f(Some(target), args));
                    }
                }
            }
        }
    }
    None
}

unsafe fn foreign_type_names(args: &[ObjPtr]) -> String {
    args.iter()
        .map(|&a| typeobj::name(type_of(a)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pick an overload and run it
///
/// Instance overloads need a receiver; static ones and constructors
/// ignore it. Host exceptions are set as the foreign error.
///
/// # Safety
/// The global lock must be held; `args` are borrowed live objects.
pub unsafe fn bind_and_call(
    bridge: &Bridge,
    set: &MethodSet,
    receiver: Option<&Arc<HostObject>>,
    args: &[ObjPtr],
) -> BridgeResult<CallOutcome> {
    for overload in set.ordered() {
        let callable = overload.is_static || overload.is_ctor || receiver.is_some();
        if !callable {
            continue;
        }
        let Some(mut values) = convert_args(bridge, &overload.info.sig, args)? else {
            continue;
        };
        trace!(event = "bind", method = %set.name(), overload = ?overload);
        let this = if overload.is_static || overload.is_ctor { None } else { receiver };
        let result = resolve_body(overload, this).and_then(|body| body(this, &mut values));
        return match result {
            Ok(ret) => {
                let by_ref = overload
                    .info
                    .sig
                    .by_ref_positions()
                    .into_iter()
                    .map(|i| values[i].clone())
                    .collect();
                Ok(CallOutcome {
                    ret,
                    by_ref,
                    sig: overload.info.sig.clone(),
                })
            }
            Err(exc) => Err(bridge.raise_host_exception(&exc)),
        };
    }
    Err(BridgeError::Binding(format!(
        "No method matches given arguments for {}: ({})",
        set.name(),
        foreign_type_names(args)
    )))
}

/// Foreign result of a call
///
/// A void call with exactly one by-ref argument returns that argument;
/// otherwise by-ref values follow the return value in a tuple.
///
/// # Safety
/// The global lock must be held.
pub unsafe fn outcome_to_foreign(bridge: &Bridge, outcome: &CallOutcome) -> BridgeResult<ObjPtr> {
    let converter = bridge.converter();
    let ref_params: Vec<_> = outcome
        .sig
        .by_ref_positions()
        .into_iter()
        .map(|i| outcome.sig.params[i].ty.clone())
        .collect();
    if ref_params.is_empty() {
        if !outcome.sig.has_return() {
            return Ok(builtins::none_ref());
        }
        return converter.to_foreign(bridge, &outcome.ret, Some(&outcome.sig.ret));
    }
    if !outcome.sig.has_return() && ref_params.len() == 1 {
        return converter.to_foreign(bridge, &outcome.by_ref[0], Some(&ref_params[0]));
    }

    let mut items = Vec::with_capacity(ref_params.len() + 1);
    let mut push = |value: &HostValue, ty: &HostTypeRef| -> BridgeResult<()> {
        items.push(converter.to_foreign(bridge, value, Some(ty))?);
        Ok(())
    };
    let mut result = Ok(());
    if outcome.sig.has_return() {
        result = push(&outcome.ret, &outcome.sig.ret);
    }
    for (value, ty) in outcome.by_ref.iter().zip(&ref_params) {
        if result.is_err() {
            break;
        }
        result = push(value, ty);
    }
    if let Err(err) = result {
        for item in items {
            decref(item);
        }
        return Err(err);
    }
    Ok(tuple::new(items)?)
}

/// Bind, call and convert the result back
///
/// # Safety
/// The global lock must be held; `args` are borrowed live objects.
pub unsafe fn invoke(
    bridge: &Bridge,
    set: &MethodSet,
    receiver: Option<&Arc<HostObject>>,
    args: &[ObjPtr],
) -> BridgeResult<ObjPtr> {
    let outcome = bind_and_call(bridge, set, receiver, args)?;
    outcome_to_foreign(bridge, &outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{self, HostMember, HostType, Param};

    fn overloads_of(ty: &HostTypeRef, name: &str) -> MethodSet {
        let mut set = MethodSet::new(name);
        for t in ty.chain() {
            for member in t.members_named(name) {
                if let Some(info) = member.method_info() {
                    set.push(Overload {
                        name: name.to_string(),
                        info: info.clone(),
                        is_static: member.is_static(),
                        is_ctor: false,
                        declaring: member.declaring_type().unwrap(),
                    });
                }
            }
        }
        set
    }

    fn sig_of(ty: HostTypeRef) -> Signature {
        Signature::new(vec![Param::new("v", ty)], host::void_type())
    }

    #[test]
    fn test_merge_keeps_most_derived() {
        let base = HostType::class("Base")
            .member(HostMember::method("F", sig_of(host::int32_type()), |_, _| Ok(HostValue::Int(1))))
            .member(HostMember::method("F", sig_of(host::string_type()), |_, _| Ok(HostValue::Int(2))))
            .build();
        let derived = HostType::class("Derived")
            .base(base.clone())
            .member(HostMember::method("F", sig_of(host::boolean_type()), |_, _| Ok(HostValue::Int(3))))
            .member(HostMember::method("F", sig_of(host::int32_type()), |_, _| Ok(HostValue::Int(4))))
            .build();
        let set = overloads_of(&derived, "F");
        assert_eq!(set.len(), 3);
        let int_overload = set
            .overloads()
            .iter()
            .find(|o| o.info.sig.params[0].ty.code() == TypeCode::Int32)
            .unwrap();
        assert!(int_overload.declaring.same(&derived));
    }

    #[test]
    fn test_binding_order_prefers_narrow_types() {
        let ty = HostType::class("Order")
            .member(HostMember::method("G", sig_of(host::object_type()), |_, _| Ok(HostValue::Null)))
            .member(HostMember::method("G", sig_of(host::float64_type()), |_, _| Ok(HostValue::Null)))
            .member(HostMember::method("G", Signature::action(), |_, _| Ok(HostValue::Null)))
            .member(HostMember::method("G", sig_of(host::int32_type()), |_, _| Ok(HostValue::Null)))
            .build();
        let set = overloads_of(&ty, "G");
        let order: Vec<String> = set
            .ordered()
            .iter()
            .map(|o| o.info.sig.describe("G"))
            .collect();
        assert_eq!(order, ["G()", "G(Int32 v)", "G(Double v)", "G(Object v)"]);
    }

    #[test]
    fn test_abstract_resolves_against_receiver() {
        let shape = HostType::class("Shape")
            .abstract_()
            .member(HostMember::abstract_method("Area", Signature::new(Vec::new(), host::float64_type())))
            .build();
        let square = HostType::class("Square")
            .base(shape.clone())
            .member(HostMember::method(
                "Area",
                Signature::new(Vec::new(), host::float64_type()),
                |_, _| Ok(HostValue::Float(4.0)),
            ))
            .build();
        let set = overloads_of(&shape, "Area");
        let obj = HostObject::new(&square);
        let body = resolve_body(&set.overloads()[0], Some(&obj)).unwrap();
        assert_eq!(body(Some(&obj), &mut []).unwrap(), HostValue::Float(4.0));
        assert!(resolve_body(&set.overloads()[0], None).is_err());
    }
}
