//! Slot prototypes and typed slot implementations

use hostbridge_runtime::typeobj::{
    AllocFunc, BinaryFunc, Destructor, FreeFunc, GetBufferProc, HashFunc, Inquiry, LenFunc,
    ObjObjArgProc, ObjObjProc, ReleaseBufferProc, RichCmpFunc, TernaryFunc, TraverseProc,
    UnaryFunc,
};
use std::fmt;

/// Native prototype a slot offset holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prototype {
    Destructor,
    Unary,
    Binary,
    Ternary,
    ObjObjArg,
    ObjObj,
    Len,
    Hash,
    Inquiry,
    RichCompare,
    Traverse,
    Alloc,
    Free,
    GetBuffer,
    ReleaseBuffer,
}

/// Prototype of a slot by its canonical name
pub fn prototype_for(slot: &str) -> Option<Prototype> {
    Some(match slot {
        "tp_dealloc" => Prototype::Destructor,
        "tp_repr" | "tp_str" | "tp_iter" | "tp_iternext" | "nb_negative" => Prototype::Unary,
        "tp_getattro" | "nb_add" | "nb_subtract" | "nb_multiply" | "nb_true_divide"
        | "mp_subscript" => Prototype::Binary,
        "tp_call" | "tp_descr_get" | "tp_new" => Prototype::Ternary,
        "tp_setattro" | "tp_descr_set" | "tp_init" | "mp_ass_subscript" => Prototype::ObjObjArg,
        "sq_contains" => Prototype::ObjObj,
        "sq_length" | "mp_length" => Prototype::Len,
        "tp_hash" => Prototype::Hash,
        "tp_clear" | "nb_bool" => Prototype::Inquiry,
        "tp_richcompare" => Prototype::RichCompare,
        "tp_traverse" => Prototype::Traverse,
        "tp_alloc" => Prototype::Alloc,
        "tp_free" => Prototype::Free,
        "bf_getbuffer" => Prototype::GetBuffer,
        "bf_releasebuffer" => Prototype::ReleaseBuffer,
        _ => return None,
    })
}

/// A slot implementation tagged with its prototype
#[derive(Clone, Copy)]
pub enum SlotFn {
    Destructor(Destructor),
    Unary(UnaryFunc),
    Binary(BinaryFunc),
    Ternary(TernaryFunc),
    ObjObjArg(ObjObjArgProc),
    ObjObj(ObjObjProc),
    Len(LenFunc),
    Hash(HashFunc),
    Inquiry(Inquiry),
    RichCompare(RichCmpFunc),
    Traverse(TraverseProc),
    Alloc(AllocFunc),
    Free(FreeFunc),
    GetBuffer(GetBufferProc),
    ReleaseBuffer(ReleaseBufferProc),
}

impl SlotFn {
    pub fn prototype(&self) -> Prototype {
        match self {
            SlotFn::Destructor(_) => Prototype::Destructor,
            SlotFn::Unary(_) => Prototype::Unary,
            SlotFn::Binary(_) => Prototype::Binary,
            SlotFn::Ternary(_) => Prototype::Ternary,
            SlotFn::ObjObjArg(_) => Prototype::ObjObjArg,
            SlotFn::ObjObj(_) => Prototype::ObjObj,
            SlotFn::Len(_) => Prototype::Len,
            SlotFn::Hash(_) => Prototype::Hash,
            SlotFn::Inquiry(_) => Prototype::Inquiry,
            SlotFn::RichCompare(_) => Prototype::RichCompare,
            SlotFn::Traverse(_) => Prototype::Traverse,
            SlotFn::Alloc(_) => Prototype::Alloc,
            SlotFn::Free(_) => Prototype::Free,
            SlotFn::GetBuffer(_) => Prototype::GetBuffer,
            SlotFn::ReleaseBuffer(_) => Prototype::ReleaseBuffer,
        }
    }

    /// Native-callable address written into the type object
    pub fn address(&self) -> usize {
        match *self {
            SlotFn::Destructor(f) => f as usize,
            SlotFn::Unary(f) => f as usize,
            SlotFn::Binary(f) => f as usize,
            SlotFn::Ternary(f) => f as usize,
            SlotFn::ObjObjArg(f) => f as usize,
            SlotFn::ObjObj(f) => f as usize,
            SlotFn::Len(f) => f as usize,
            SlotFn::Hash(f) => f as usize,
            SlotFn::Inquiry(f) => f as usize,
            SlotFn::RichCompare(f) => f as usize,
            SlotFn::Traverse(f) => f as usize,
            SlotFn::Alloc(f) => f as usize,
            SlotFn::Free(f) => f as usize,
            SlotFn::GetBuffer(f) => f as usize,
            SlotFn::ReleaseBuffer(f) => f as usize,
        }
    }
}

impl fmt::Debug for SlotFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{:#x}", self.prototype(), self.address())
    }
}

/// Slot implementations contributed by one level of a descriptor chain
#[derive(Debug, Clone, Copy)]
pub struct SlotLevel {
    pub name: &'static str,
    pub slots: &'static [(&'static str, SlotFn)],
}
