//! Host members: methods, constructors, properties, fields, events and
//! nested types

use super::{HostException, HostObject, HostType, HostTypeRef, HostValue, TypeCode};
use bitflags::bitflags;
use std::fmt;
use std::sync::{Arc, Weak};

/// Body of a host method
///
/// The receiver is `None` for static methods and constructors. By-ref
/// arguments are updated in place.
pub type NativeFn =
    Arc<dyn Fn(Option<&Arc<HostObject>>, &mut [HostValue]) -> Result<HostValue, HostException> + Send + Sync>;

#[derive(Clone)]
pub enum MethodBody {
    Native(NativeFn),
    /// Resolved against the receiver's runtime type at call time
    Abstract,
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodBody::Native(_) => f.write_str("Native"),
            MethodBody::Abstract => f.write_str("Abstract"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: HostTypeRef,
    pub by_ref: bool,
}

impl Param {
    pub fn new(name: &str, ty: HostTypeRef) -> Self {
        Self {
            name: name.to_string(),
            ty,
            by_ref: false,
        }
    }

    pub fn by_ref(name: &str, ty: HostTypeRef) -> Self {
        Self {
            name: name.to_string(),
            ty,
            by_ref: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub params: Vec<Param>,
    pub ret: HostTypeRef,
}

impl Signature {
    pub fn new(params: Vec<Param>, ret: HostTypeRef) -> Self {
        Self { params, ret }
    }

    /// No parameters, no result
    pub fn action() -> Self {
        Self::new(Vec::new(), super::void_type())
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn has_return(&self) -> bool {
        self.ret.code() != TypeCode::Void
    }

    /// Indices of by-ref parameters in declaration order
    pub fn by_ref_positions(&self) -> Vec<usize> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.by_ref)
            .map(|(i, _)| i)
            .collect()
    }

    /// Same parameter types and passing modes
    pub fn same_shape(&self, other: &Signature) -> bool {
        self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(a, b)| a.ty.same(&b.ty) && a.by_ref == b.by_ref)
    }

    /// `name(Int32 a, ref Double b) -> Boolean`
    pub fn describe(&self, name: &str) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                if p.by_ref {
                    format!("ref {} {}", p.ty.name(), p.name)
                } else {
                    format!("{} {}", p.ty.name(), p.name)
                }
            })
            .collect();
        let mut text = format!("{}({})", name, params.join(", "));
        if self.has_return() {
            text.push_str(" -> ");
            text.push_str(self.ret.name());
        }
        text
    }
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub sig: Signature,
    pub body: MethodBody,
    pub doc: Option<String>,
}

impl MethodInfo {
    pub fn native<F>(sig: Signature, f: F) -> Self
    where
        F: Fn(Option<&Arc<HostObject>>, &mut [HostValue]) -> Result<HostValue, HostException>
            + Send
            + Sync
            + 'static,
    {
        Self {
            sig,
            body: MethodBody::Native(Arc::new(f)),
            doc: None,
        }
    }

    pub fn abstract_(sig: Signature) -> Self {
        Self {
            sig,
            body: MethodBody::Abstract,
            doc: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertyInfo {
    pub ty: HostTypeRef,
    /// Parameters are the index parameters
    pub getter: Option<MethodInfo>,
    /// Parameters are the index parameters followed by the value
    pub setter: Option<MethodInfo>,
    pub index_params: Vec<Param>,
}

impl PropertyInfo {
    pub fn is_indexer(&self) -> bool {
        !self.index_params.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub ty: HostTypeRef,
    pub read_only: bool,
}

#[derive(Debug, Clone)]
pub struct EventInfo {
    /// Delegate type of the handlers
    pub handler: HostTypeRef,
}

#[derive(Debug, Clone)]
pub enum MemberKind {
    Method(MethodInfo),
    Constructor(MethodInfo),
    Property(PropertyInfo),
    Field(FieldInfo),
    Event(EventInfo),
    NestedType(HostTypeRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Public,
    Protected,
    ProtectedInternal,
    Internal,
    Private,
}

impl Access {
    /// Visible to foreign code (including foreign subclasses)
    pub fn is_bindable(self) -> bool {
        matches!(self, Access::Public | Access::Protected | Access::ProtectedInternal)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemberFlags: u32 {
        const STATIC = 1 << 0;
        const VIRTUAL = 1 << 1;
        const SPECIAL_NAME = 1 << 2;
        /// Access to the member is refused by the host's security layer
        const SECURITY_DENIED = 1 << 3;
    }
}

#[derive(Debug, Clone)]
pub struct HostMember {
    pub name: String,
    pub kind: MemberKind,
    pub access: Access,
    pub flags: MemberFlags,
    pub(super) declaring: Weak<HostType>,
}

impl HostMember {
    fn new(name: &str, kind: MemberKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            access: Access::Public,
            flags: MemberFlags::empty(),
            declaring: Weak::new(),
        }
    }

    pub fn method<F>(name: &str, sig: Signature, f: F) -> Self
    where
        F: Fn(Option<&Arc<HostObject>>, &mut [HostValue]) -> Result<HostValue, HostException>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, MemberKind::Method(MethodInfo::native(sig, f)))
    }

    pub fn abstract_method(name: &str, sig: Signature) -> Self {
        let mut member = Self::new(name, MemberKind::Method(MethodInfo::abstract_(sig)));
        member.flags |= MemberFlags::VIRTUAL;
        member
    }

    /// Constructor; the body returns the new object
    pub fn constructor<F>(params: Vec<Param>, f: F) -> Self
    where
        F: Fn(&mut [HostValue]) -> Result<HostValue, HostException> + Send + Sync + 'static,
    {
        Self::constructor_with_sig(Signature::new(params, super::void_type()), f)
    }

    /// Constructor over an explicit signature; used while the well-known
    /// types are still being built
    pub(super) fn constructor_with_sig<F>(sig: Signature, f: F) -> Self
    where
        F: Fn(&mut [HostValue]) -> Result<HostValue, HostException> + Send + Sync + 'static,
    {
        let info = MethodInfo::native(sig, move |_, args| f(args));
        let mut member = Self::new(".ctor", MemberKind::Constructor(info));
        member.flags |= MemberFlags::SPECIAL_NAME;
        member
    }

    /// Static operator method such as `op_Addition`
    pub fn operator<F>(name: &str, sig: Signature, f: F) -> Self
    where
        F: Fn(&mut [HostValue]) -> Result<HostValue, HostException> + Send + Sync + 'static,
    {
        let mut member = Self::method(name, sig, move |_, args| f(args));
        member.flags |= MemberFlags::STATIC | MemberFlags::SPECIAL_NAME;
        member
    }

    pub fn property(name: &str, info: PropertyInfo) -> Self {
        Self::new(name, MemberKind::Property(info))
    }

    pub fn field(name: &str, ty: HostTypeRef) -> Self {
        Self::new(name, MemberKind::Field(FieldInfo { ty, read_only: false }))
    }

    pub fn event(name: &str, handler: HostTypeRef) -> Self {
        Self::new(name, MemberKind::Event(EventInfo { handler }))
    }

    pub fn nested(ty: HostTypeRef) -> Self {
        let name = ty.name().to_string();
        Self::new(&name, MemberKind::NestedType(ty))
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn with_doc(mut self, doc: &str) -> Self {
        match &mut self.kind {
            MemberKind::Method(info) | MemberKind::Constructor(info) => info.doc = Some(doc.to_string()),
            _ => {}
        }
        self
    }

    pub fn static_(mut self) -> Self {
        self.flags |= MemberFlags::STATIC;
        self
    }

    pub fn read_only(mut self) -> Self {
        if let MemberKind::Field(info) = &mut self.kind {
            info.read_only = true;
        }
        self
    }

    pub fn security_denied(mut self) -> Self {
        self.flags |= MemberFlags::SECURITY_DENIED;
        self
    }

    pub fn is_static(&self) -> bool {
        self.flags.contains(MemberFlags::STATIC)
    }

    pub fn declaring_type(&self) -> Option<HostTypeRef> {
        self.declaring.upgrade()
    }

    /// Method or constructor info, if the member is callable
    pub fn method_info(&self) -> Option<&MethodInfo> {
        match &self.kind {
            MemberKind::Method(info) | MemberKind::Constructor(info) => Some(info),
            _ => None,
        }
    }
}

/// Read/write property backed by an instance field of the same name
pub fn auto_property(name: &str, ty: HostTypeRef) -> HostMember {
    let field = format!("<{}>k__BackingField", name);
    let get_field = field.clone();
    let getter = MethodInfo::native(Signature::new(Vec::new(), ty.clone()), move |this, _| {
        let this = this.ok_or_else(|| HostException::null_reference("property getter"))?;
        Ok(this.field(&get_field))
    });
    let setter = MethodInfo::native(
        Signature::new(vec![Param::new("value", ty.clone())], super::void_type()),
        move |this, args| {
            let this = this.ok_or_else(|| HostException::null_reference("property setter"))?;
            this.set_field(&field, args[0].clone());
            Ok(HostValue::Null)
        },
    );
    HostMember::property(
        name,
        PropertyInfo {
            ty,
            getter: Some(getter),
            setter: Some(setter),
            index_params: Vec::new(),
        },
    )
}

pub(super) fn install_object_members(
    object: &HostTypeRef,
    string: &HostTypeRef,
    boolean: &HostTypeRef,
    int32: &HostTypeRef,
) {
    let mut to_string = HostMember::method(
        "ToString",
        Signature::new(Vec::new(), string.clone()),
        |this, _| {
            let this = this.ok_or_else(|| HostException::null_reference("ToString"))?;
            Ok(HostValue::Str(this.host_type().full_name()))
        },
    );
    to_string.flags |= MemberFlags::VIRTUAL;
    object.add_member(to_string);

    let mut equals = HostMember::method(
        "Equals",
        Signature::new(vec![Param::new("obj", object.clone())], boolean.clone()),
        |this, args| {
            let this = this.ok_or_else(|| HostException::null_reference("Equals"))?;
            Ok(HostValue::Bool(match &args[0] {
                HostValue::Object(other) => Arc::ptr_eq(this, other),
                _ => false,
            }))
        },
    );
    equals.flags |= MemberFlags::VIRTUAL;
    object.add_member(equals);

    let mut hash = HostMember::method(
        "GetHashCode",
        Signature::new(Vec::new(), int32.clone()),
        |this, _| {
            let this = this.ok_or_else(|| HostException::null_reference("GetHashCode"))?;
            Ok(HostValue::Int(((Arc::as_ptr(this) as usize >> 4) & 0x7fff_ffff) as i64))
        },
    );
    hash.flags |= MemberFlags::VIRTUAL;
    object.add_member(hash);
}

pub(super) fn install_exception_members(exception: &HostTypeRef, string: &HostTypeRef, void: &HostTypeRef) {
    let getter = MethodInfo::native(Signature::new(Vec::new(), string.clone()), |this, _| {
        let this = this.ok_or_else(|| HostException::null_reference("Message"))?;
        Ok(HostValue::Str(
            this.exception_data().map(|e| e.message.clone()).unwrap_or_default(),
        ))
    });
    exception.add_member(HostMember::property(
        "Message",
        PropertyInfo {
            ty: string.clone(),
            getter: Some(getter),
            setter: None,
            index_params: Vec::new(),
        },
    ));

    let ty = Arc::downgrade(exception);
    exception.add_member(HostMember::constructor_with_sig(
        Signature::new(vec![Param::new("message", string.clone())], void.clone()),
        move |args| {
            let ty = ty
                .upgrade()
                .ok_or_else(|| HostException::null_reference("Exception"))?;
            let message = args[0].as_str().unwrap_or_default().to_string();
            Ok(HostValue::Object(HostObject::new_exception(&ty, &message, None)))
        },
    ));
}
