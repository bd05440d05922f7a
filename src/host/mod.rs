//! Host reflection model
//!
//! Design: Host types are immutable descriptions shared through `Arc`.
//! Members are attached after the type exists so signatures may refer to
//! the type itself; a type and its members live for the whole process,
//! as loaded host types do. Generic definitions produce closed types
//! through a memoizing factory.

mod members;
mod value;

#[cfg(test)]
mod tests;

pub use members::*;
pub use value::*;

use bitflags::bitflags;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type HostTypeRef = Arc<HostType>;

static NEXT_TYPE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Class,
    Struct,
    Interface,
    Delegate,
    Array,
}

/// Primitive identity of a type, `Other` for everything else
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Object,
    Void,
    Boolean,
    Int32,
    Int64,
    Float64,
    String,
    Other,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeAttributes: u32 {
        const ABSTRACT = 1 << 0;
        const SEALED = 1 << 1;
        /// Instances keep a link to a live foreign peer
        const PEER_FIELD = 1 << 2;
    }
}

/// Builds closed types from a generic definition
pub type GenericFactory = Arc<dyn Fn(&HostTypeRef, &[HostTypeRef]) -> HostTypeBuilder + Send + Sync>;

pub enum Generic {
    Definition {
        params: Vec<String>,
        factory: GenericFactory,
        instances: Mutex<HashMap<Vec<u64>, HostTypeRef>>,
    },
    Instance {
        definition: HostTypeRef,
        args: Vec<HostTypeRef>,
    },
}

pub struct HostType {
    id: u64,
    name: String,
    namespace: Option<String>,
    kind: TypeKind,
    code: TypeCode,
    attributes: TypeAttributes,
    base: Option<HostTypeRef>,
    interfaces: Vec<HostTypeRef>,
    doc: Option<String>,
    element: Option<(HostTypeRef, usize)>,
    invoke: Option<Signature>,
    generic: Option<Generic>,
    members: RwLock<Vec<HostMember>>,
    statics: Mutex<HashMap<String, HostValue>>,
}

impl fmt::Debug for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl HostType {
    pub fn class(name: &str) -> HostTypeBuilder {
        HostTypeBuilder::new(name, TypeKind::Class).base(object_type())
    }

    pub fn structure(name: &str) -> HostTypeBuilder {
        HostTypeBuilder::new(name, TypeKind::Struct).base(object_type())
    }

    pub fn interface(name: &str) -> HostTypeBuilder {
        HostTypeBuilder::new(name, TypeKind::Interface)
    }

    /// Delegate type whose instances are invoked with `invoke`
    pub fn delegate(name: &str, invoke: Signature) -> HostTypeBuilder {
        let mut builder = HostTypeBuilder::new(name, TypeKind::Delegate).base(delegate_type());
        builder.invoke = Some(invoke);
        builder
    }

    /// Open generic definition; `factory` fills in each closed type
    pub fn generic_definition<F>(name: &str, params: &[&str], factory: F) -> HostTypeRef
    where
        F: Fn(&HostTypeRef, &[HostTypeRef]) -> HostTypeBuilder + Send + Sync + 'static,
    {
        let mut builder = HostTypeBuilder::new(name, TypeKind::Class).base(object_type());
        builder.generic = Some(Generic::Definition {
            params: params.iter().map(|p| p.to_string()).collect(),
            factory: Arc::new(factory),
            instances: Mutex::new(HashMap::new()),
        });
        builder.build()
    }

    /// Array type of `element` with `rank` dimensions (memoized)
    pub fn array_of(element: &HostTypeRef, rank: usize) -> HostTypeRef {
        static ARRAYS: Lazy<Mutex<HashMap<(u64, usize), HostTypeRef>>> =
            Lazy::new(|| Mutex::new(HashMap::new()));

        let rank = rank.max(1);
        let mut arrays = ARRAYS.lock();
        if let Some(existing) = arrays.get(&(element.id, rank)) {
            return Arc::clone(existing);
        }
        let suffix = format!("[{}]", ",".repeat(rank - 1));
        let mut builder = HostTypeBuilder::new(&format!("{}{}", element.name, suffix), TypeKind::Array)
            .base(array_type());
        builder.element = Some((Arc::clone(element), rank));
        builder.attributes |= TypeAttributes::SEALED;
        let ty = builder.build();
        arrays.insert((element.id, rank), Arc::clone(&ty));
        ty
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Namespace-qualified name
    pub fn full_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}.{}", ns, self.name),
            None => self.name.clone(),
        }
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn code(&self) -> TypeCode {
        self.code
    }

    pub fn attributes(&self) -> TypeAttributes {
        self.attributes
    }

    pub fn base(&self) -> Option<&HostTypeRef> {
        self.base.as_ref()
    }

    /// Directly implemented interfaces
    pub fn interfaces(&self) -> &[HostTypeRef] {
        &self.interfaces
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Element type and rank of an array type
    pub fn element(&self) -> Option<(&HostTypeRef, usize)> {
        self.element.as_ref().map(|(e, r)| (e, *r))
    }

    /// Invoke signature of a delegate type
    pub fn invoke_signature(&self) -> Option<&Signature> {
        self.invoke.as_ref()
    }

    pub fn generic(&self) -> Option<&Generic> {
        self.generic.as_ref()
    }

    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    pub fn is_delegate(&self) -> bool {
        self.kind == TypeKind::Delegate
    }

    pub fn is_array(&self) -> bool {
        self.kind == TypeKind::Array
    }

    pub fn is_value_type(&self) -> bool {
        self.kind == TypeKind::Struct
            || matches!(
                self.code,
                TypeCode::Boolean | TypeCode::Int32 | TypeCode::Int64 | TypeCode::Float64
            )
    }

    pub fn is_abstract(&self) -> bool {
        self.attributes.contains(TypeAttributes::ABSTRACT) || self.is_interface()
    }

    pub fn is_generic_definition(&self) -> bool {
        matches!(self.generic, Some(Generic::Definition { .. }))
    }

    /// Does the type derive from the host exception root?
    pub fn is_exception(&self) -> bool {
        let root = exception_type().id;
        self.chain().any(|t| t.id == root)
    }

    pub fn has_peer_field(&self) -> bool {
        self.attributes.contains(TypeAttributes::PEER_FIELD)
    }

    /// Same type by identity
    pub fn same(&self, other: &HostType) -> bool {
        self.id == other.id
    }

    /// This type followed by its base types
    pub fn chain(&self) -> impl Iterator<Item = &HostType> {
        std::iter::successors(Some(self), |t| t.base.as_deref())
    }

    /// Every interface implemented, including inherited ones, deduplicated
    pub fn all_interfaces(&self) -> Vec<HostTypeRef> {
        let mut out: Vec<HostTypeRef> = Vec::new();
        let mut stack: Vec<HostTypeRef> = Vec::new();
        for t in self.chain() {
            stack.extend(t.interfaces.iter().cloned());
        }
        while let Some(iface) = stack.pop() {
            if out.iter().any(|seen| seen.id == iface.id) {
                continue;
            }
            stack.extend(iface.interfaces.iter().cloned());
            out.push(iface);
        }
        out
    }

    /// Can a value of this type be used where `target` is expected?
    pub fn is_assignable_to(&self, target: &HostType) -> bool {
        if target.code == TypeCode::Object || self.chain().any(|t| t.id == target.id) {
            return true;
        }
        target.is_interface() && self.all_interfaces().iter().any(|i| i.id == target.id)
    }

    /// Snapshot of the members declared directly on this type
    pub fn members(&self) -> Vec<HostMember> {
        self.members.read().clone()
    }

    /// Declared members named `name`
    pub fn members_named(&self, name: &str) -> Vec<HostMember> {
        self.members
            .read()
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }

    /// Attach a member, recording this type as its declaring type
    pub fn add_member(self: &Arc<Self>, mut member: HostMember) {
        member.declaring = Arc::downgrade(self);
        self.members.write().push(member);
    }

    /// Value of a static field (defaulted on first read)
    pub fn static_value(&self, name: &str, ty: &HostType) -> HostValue {
        self.statics
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| HostValue::default_for(ty))
            .clone()
    }

    pub fn set_static_value(&self, name: &str, value: HostValue) {
        self.statics.lock().insert(name.to_string(), value);
    }

    /// Closed type for `args`, created once per argument list
    pub fn make_generic(self: &Arc<Self>, args: &[HostTypeRef]) -> Result<HostTypeRef, HostException> {
        let Some(Generic::Definition { params, factory, instances }) = &self.generic else {
            return Err(HostException::argument(format!(
                "{} is not a generic type definition",
                self.name
            )));
        };
        if params.len() != args.len() {
            return Err(HostException::argument(format!(
                "{} takes {} type argument(s), {} given",
                self.name,
                params.len(),
                args.len()
            )));
        }
        let key: Vec<u64> = args.iter().map(|a| a.id).collect();
        if let Some(existing) = instances.lock().get(&key) {
            return Ok(Arc::clone(existing));
        }

        // The factory may itself close generics, so it runs unlocked
        let mut builder = factory(self, args);
        builder.name = format!(
            "{}[{}]",
            self.name,
            args.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(",")
        );
        builder.namespace = self.namespace.clone();
        builder.generic = Some(Generic::Instance {
            definition: Arc::clone(self),
            args: args.to_vec(),
        });
        let closed = builder.build();
        let mut instances = instances.lock();
        Ok(Arc::clone(instances.entry(key).or_insert(closed)))
    }

    /// Definition a closed generic type was made from
    pub fn generic_definition_of(&self) -> Option<&HostTypeRef> {
        match &self.generic {
            Some(Generic::Instance { definition, .. }) => Some(definition),
            _ => None,
        }
    }
}

/// Fluent description of a new host type
pub struct HostTypeBuilder {
    name: String,
    namespace: Option<String>,
    kind: TypeKind,
    code: TypeCode,
    attributes: TypeAttributes,
    base: Option<HostTypeRef>,
    interfaces: Vec<HostTypeRef>,
    doc: Option<String>,
    element: Option<(HostTypeRef, usize)>,
    invoke: Option<Signature>,
    generic: Option<Generic>,
    members: Vec<HostMember>,
}

impl HostTypeBuilder {
    fn new(name: &str, kind: TypeKind) -> Self {
        Self {
            name: name.to_string(),
            namespace: None,
            kind,
            code: TypeCode::Other,
            attributes: TypeAttributes::empty(),
            base: None,
            interfaces: Vec::new(),
            doc: None,
            element: None,
            invoke: None,
            generic: None,
            members: Vec::new(),
        }
    }

    pub fn namespace(mut self, ns: &str) -> Self {
        self.namespace = Some(ns.to_string());
        self
    }

    pub fn base(mut self, base: HostTypeRef) -> Self {
        self.base = Some(base);
        self
    }

    pub fn implements(mut self, iface: HostTypeRef) -> Self {
        self.interfaces.push(iface);
        self
    }

    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = Some(doc.to_string());
        self
    }

    pub fn abstract_(mut self) -> Self {
        self.attributes |= TypeAttributes::ABSTRACT;
        self
    }

    pub fn sealed(mut self) -> Self {
        self.attributes |= TypeAttributes::SEALED;
        self
    }

    /// Instances escape to foreign code as live peers
    pub fn with_peer_field(mut self) -> Self {
        self.attributes |= TypeAttributes::PEER_FIELD;
        self
    }

    pub fn member(mut self, member: HostMember) -> Self {
        self.members.push(member);
        self
    }

    fn code(mut self, code: TypeCode) -> Self {
        self.code = code;
        self
    }

    pub fn build(self) -> HostTypeRef {
        let ty = Arc::new(HostType {
            id: NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed),
            name: self.name,
            namespace: self.namespace,
            kind: self.kind,
            code: self.code,
            attributes: self.attributes,
            base: self.base,
            interfaces: self.interfaces,
            doc: self.doc,
            element: self.element,
            invoke: self.invoke,
            generic: self.generic,
            members: RwLock::new(Vec::new()),
            statics: Mutex::new(HashMap::new()),
        });
        for member in self.members {
            ty.add_member(member);
        }
        ty
    }
}

// ============================================================================
// Well-known types
// ============================================================================

struct WellKnown {
    object: HostTypeRef,
    void: HostTypeRef,
    boolean: HostTypeRef,
    int32: HostTypeRef,
    int64: HostTypeRef,
    float64: HostTypeRef,
    string: HostTypeRef,
    exception: HostTypeRef,
    delegate: HostTypeRef,
    array: HostTypeRef,
}

static WELL_KNOWN: Lazy<WellKnown> = Lazy::new(|| {
    let object = HostTypeBuilder::new("Object", TypeKind::Class)
        .namespace("System")
        .code(TypeCode::Object)
        .doc("Root of the host type hierarchy")
        .build();
    let primitive = |name: &str, code: TypeCode| {
        HostTypeBuilder::new(name, TypeKind::Struct)
            .namespace("System")
            .code(code)
            .base(Arc::clone(&object))
            .sealed()
            .build()
    };
    let void = primitive("Void", TypeCode::Void);
    let boolean = primitive("Boolean", TypeCode::Boolean);
    let int32 = primitive("Int32", TypeCode::Int32);
    let int64 = primitive("Int64", TypeCode::Int64);
    let float64 = primitive("Double", TypeCode::Float64);
    let string = HostTypeBuilder::new("String", TypeKind::Class)
        .namespace("System")
        .code(TypeCode::String)
        .base(Arc::clone(&object))
        .sealed()
        .build();
    let exception = HostTypeBuilder::new("Exception", TypeKind::Class)
        .namespace("System")
        .base(Arc::clone(&object))
        .build();
    let delegate = HostTypeBuilder::new("Delegate", TypeKind::Class)
        .namespace("System")
        .base(Arc::clone(&object))
        .abstract_()
        .build();
    let array = HostTypeBuilder::new("Array", TypeKind::Class)
        .namespace("System")
        .base(Arc::clone(&object))
        .abstract_()
        .build();

    let known = WellKnown {
        object,
        void,
        boolean,
        int32,
        int64,
        float64,
        string,
        exception,
        delegate,
        array,
    };
    members::install_object_members(&known.object, &known.string, &known.boolean, &known.int32);
    members::install_exception_members(&known.exception, &known.string, &known.void);
    known
});

pub fn object_type() -> HostTypeRef {
    Arc::clone(&WELL_KNOWN.object)
}

pub fn void_type() -> HostTypeRef {
    Arc::clone(&WELL_KNOWN.void)
}

pub fn boolean_type() -> HostTypeRef {
    Arc::clone(&WELL_KNOWN.boolean)
}

pub fn int32_type() -> HostTypeRef {
    Arc::clone(&WELL_KNOWN.int32)
}

pub fn int64_type() -> HostTypeRef {
    Arc::clone(&WELL_KNOWN.int64)
}

pub fn float64_type() -> HostTypeRef {
    Arc::clone(&WELL_KNOWN.float64)
}

pub fn string_type() -> HostTypeRef {
    Arc::clone(&WELL_KNOWN.string)
}

pub fn exception_type() -> HostTypeRef {
    Arc::clone(&WELL_KNOWN.exception)
}

pub fn delegate_type() -> HostTypeRef {
    Arc::clone(&WELL_KNOWN.delegate)
}

pub fn array_type() -> HostTypeRef {
    Arc::clone(&WELL_KNOWN.array)
}
