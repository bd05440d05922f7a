//! Type object layout - field offsets published by the running runtime
//!
//! Design: Every field of a type object is one machine word. Offsets are
//! computed once for the configured ABI revision and then frozen:
//! - Revision 1 is the compact layout
//! - Revision 2 inserts `tp_vectorcall_offset` and `tp_watched`, shifting
//!   everything behind them
//! - Number/sequence/mapping/buffer tables are embedded in the type object
//!   so slot overrides never need a reallocation
//!
//! Consumers must read offsets from [`offsets`] rather than hardcoding them.

#[cfg(test)]
mod tests;

use once_cell::sync::OnceCell;
use std::fmt;

/// Size of one type-object field
pub const WORD: usize = std::mem::size_of::<usize>();

/// Offset of the payload word in builtin instances (after refcount and type)
pub const PAYLOAD_OFFSET: usize = 2 * WORD;

/// Size of a bare object header
pub const OBJECT_HEADER_SIZE: usize = 2 * WORD;

static OFFSETS: OnceCell<TypeOffsets> = OnceCell::new();

/// ABI revision of the runtime's type object layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AbiRevision {
    #[default]
    V1,
    V2,
}

impl AbiRevision {
    pub fn from_number(n: u32) -> Option<Self> {
        match n {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    pub fn number(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

impl fmt::Display for AbiRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.number())
    }
}

/// Byte offsets of every type-object field for one ABI revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeOffsets {
    pub revision: AbiRevision,

    pub ob_refcnt: usize,
    pub ob_type: usize,
    pub ob_size: usize,

    pub tp_name: usize,
    pub tp_basicsize: usize,
    pub tp_itemsize: usize,
    pub tp_dealloc: usize,
    pub tp_vectorcall_offset: Option<usize>,
    pub tp_repr: usize,
    pub tp_as_number: usize,
    pub tp_as_sequence: usize,
    pub tp_as_mapping: usize,
    pub tp_hash: usize,
    pub tp_call: usize,
    pub tp_str: usize,
    pub tp_getattro: usize,
    pub tp_setattro: usize,
    pub tp_as_buffer: usize,
    pub tp_flags: usize,
    pub tp_doc: usize,
    pub tp_traverse: usize,
    pub tp_clear: usize,
    pub tp_richcompare: usize,
    pub tp_weaklistoffset: usize,
    pub tp_iter: usize,
    pub tp_iternext: usize,
    pub tp_methods: usize,
    pub tp_base: usize,
    pub tp_dict: usize,
    pub tp_descr_get: usize,
    pub tp_descr_set: usize,
    pub tp_dictoffset: usize,
    pub tp_init: usize,
    pub tp_alloc: usize,
    pub tp_new: usize,
    pub tp_free: usize,
    pub tp_bases: usize,
    pub tp_mro: usize,
    pub tp_version_tag: usize,
    pub tp_watched: Option<usize>,

    // Embedded protocol tables
    pub as_number: usize,
    pub nb_add: usize,
    pub nb_subtract: usize,
    pub nb_multiply: usize,
    pub nb_true_divide: usize,
    pub nb_negative: usize,
    pub nb_bool: usize,

    pub as_sequence: usize,
    pub sq_length: usize,
    pub sq_contains: usize,

    pub as_mapping: usize,
    pub mp_length: usize,
    pub mp_subscript: usize,
    pub mp_ass_subscript: usize,

    pub as_buffer: usize,
    pub bf_getbuffer: usize,
    pub bf_releasebuffer: usize,

    // Heap type tail
    pub ht_name: usize,
    pub ht_qualname: usize,

    /// Basic size of the `type` type itself
    pub type_basicsize: usize,
}

struct Cursor(usize);

impl Cursor {
    fn next(&mut self) -> usize {
        let offset = self.0;
        self.0 += WORD;
        offset
    }
}

impl TypeOffsets {
    /// Lay out the type object for `revision`
    pub fn compute(revision: AbiRevision) -> Self {
        let v2 = revision == AbiRevision::V2;
        let mut c = Cursor(0);

        let ob_refcnt = c.next();
        let ob_type = c.next();
        let ob_size = c.next();
        let tp_name = c.next();
        let tp_basicsize = c.next();
        let tp_itemsize = c.next();
        let tp_dealloc = c.next();
        let tp_vectorcall_offset = v2.then(|| c.next());
        let tp_repr = c.next();
        let tp_as_number = c.next();
        let tp_as_sequence = c.next();
        let tp_as_mapping = c.next();
        let tp_hash = c.next();
        let tp_call = c.next();
        let tp_str = c.next();
        let tp_getattro = c.next();
        let tp_setattro = c.next();
        let tp_as_buffer = c.next();
        let tp_flags = c.next();
        let tp_doc = c.next();
        let tp_traverse = c.next();
        let tp_clear = c.next();
        let tp_richcompare = c.next();
        let tp_weaklistoffset = c.next();
        let tp_iter = c.next();
        let tp_iternext = c.next();
        let tp_methods = c.next();
        let tp_base = c.next();
        let tp_dict = c.next();
        let tp_descr_get = c.next();
        let tp_descr_set = c.next();
        let tp_dictoffset = c.next();
        let tp_init = c.next();
        let tp_alloc = c.next();
        let tp_new = c.next();
        let tp_free = c.next();
        let tp_bases = c.next();
        let tp_mro = c.next();
        let tp_version_tag = c.next();
        let tp_watched = v2.then(|| c.next());

        let as_number = c.0;
        let nb_add = c.next();
        let nb_subtract = c.next();
        let nb_multiply = c.next();
        let nb_true_divide = c.next();
        let nb_negative = c.next();
        let nb_bool = c.next();

        let as_sequence = c.0;
        let sq_length = c.next();
        let sq_contains = c.next();

        let as_mapping = c.0;
        let mp_length = c.next();
        let mp_subscript = c.next();
        let mp_ass_subscript = c.next();

        let as_buffer = c.0;
        let bf_getbuffer = c.next();
        let bf_releasebuffer = c.next();

        let ht_name = c.next();
        let ht_qualname = c.next();

        Self {
            revision,
            ob_refcnt,
            ob_type,
            ob_size,
            tp_name,
            tp_basicsize,
            tp_itemsize,
            tp_dealloc,
            tp_vectorcall_offset,
            tp_repr,
            tp_as_number,
            tp_as_sequence,
            tp_as_mapping,
            tp_hash,
            tp_call,
            tp_str,
            tp_getattro,
            tp_setattro,
            tp_as_buffer,
            tp_flags,
            tp_doc,
            tp_traverse,
            tp_clear,
            tp_richcompare,
            tp_weaklistoffset,
            tp_iter,
            tp_iternext,
            tp_methods,
            tp_base,
            tp_dict,
            tp_descr_get,
            tp_descr_set,
            tp_dictoffset,
            tp_init,
            tp_alloc,
            tp_new,
            tp_free,
            tp_bases,
            tp_mro,
            tp_version_tag,
            tp_watched,
            as_number,
            nb_add,
            nb_subtract,
            nb_multiply,
            nb_true_divide,
            nb_negative,
            nb_bool,
            as_sequence,
            sq_length,
            sq_contains,
            as_mapping,
            mp_length,
            mp_subscript,
            mp_ass_subscript,
            as_buffer,
            bf_getbuffer,
            bf_releasebuffer,
            ht_name,
            ht_qualname,
            type_basicsize: c.0,
        }
    }

    /// Offset of a function slot by its canonical name
    pub fn slot(&self, name: &str) -> Option<usize> {
        let offset = match name {
            "tp_dealloc" => self.tp_dealloc,
            "tp_repr" => self.tp_repr,
            "tp_hash" => self.tp_hash,
            "tp_call" => self.tp_call,
            "tp_str" => self.tp_str,
            "tp_getattro" => self.tp_getattro,
            "tp_setattro" => self.tp_setattro,
            "tp_traverse" => self.tp_traverse,
            "tp_clear" => self.tp_clear,
            "tp_richcompare" => self.tp_richcompare,
            "tp_iter" => self.tp_iter,
            "tp_iternext" => self.tp_iternext,
            "tp_descr_get" => self.tp_descr_get,
            "tp_descr_set" => self.tp_descr_set,
            "tp_init" => self.tp_init,
            "tp_alloc" => self.tp_alloc,
            "tp_new" => self.tp_new,
            "tp_free" => self.tp_free,
            "nb_add" => self.nb_add,
            "nb_subtract" => self.nb_subtract,
            "nb_multiply" => self.nb_multiply,
            "nb_true_divide" => self.nb_true_divide,
            "nb_negative" => self.nb_negative,
            "nb_bool" => self.nb_bool,
            "sq_length" => self.sq_length,
            "sq_contains" => self.sq_contains,
            "mp_length" => self.mp_length,
            "mp_subscript" => self.mp_subscript,
            "mp_ass_subscript" => self.mp_ass_subscript,
            "bf_getbuffer" => self.bf_getbuffer,
            "bf_releasebuffer" => self.bf_releasebuffer,
            _ => return None,
        };
        Some(offset)
    }

    /// Offsets of every function slot, in table order
    pub fn slot_offsets(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        SLOT_NAMES
            .iter()
            .filter_map(move |name| self.slot(name).map(|offset| (*name, offset)))
    }
}

/// Canonical names of all function slots
pub const SLOT_NAMES: &[&str] = &[
    "tp_dealloc",
    "tp_repr",
    "tp_hash",
    "tp_call",
    "tp_str",
    "tp_getattro",
    "tp_setattro",
    "tp_traverse",
    "tp_clear",
    "tp_richcompare",
    "tp_iter",
    "tp_iternext",
    "tp_descr_get",
    "tp_descr_set",
    "tp_init",
    "tp_alloc",
    "tp_new",
    "tp_free",
    "nb_add",
    "nb_subtract",
    "nb_multiply",
    "nb_true_divide",
    "nb_negative",
    "nb_bool",
    "sq_length",
    "sq_contains",
    "mp_length",
    "mp_subscript",
    "mp_ass_subscript",
    "bf_getbuffer",
    "bf_releasebuffer",
];

/// Freeze the layout for this process
///
/// Returns the revision already installed if it differs from `revision`.
pub fn install(revision: AbiRevision) -> Result<&'static TypeOffsets, AbiRevision> {
    let offsets = OFFSETS.get_or_init(|| TypeOffsets::compute(revision));
    if offsets.revision == revision {
        Ok(offsets)
    } else {
        Err(offsets.revision)
    }
}

/// Layout of the running runtime
///
/// Falls back to the default revision if nothing was installed yet.
pub fn offsets() -> &'static TypeOffsets {
    OFFSETS.get_or_init(|| TypeOffsets::compute(AbiRevision::default()))
}
