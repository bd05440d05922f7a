//! Host operator methods and their foreign protocol counterparts

use crate::binder::{MethodSet, Overload};
use crate::host::HostType;
use hostbridge_runtime::protocol::CompareOp;
use std::collections::HashMap;

/// What a host operator name maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    Binary {
        slot: &'static str,
        forward: &'static str,
        reverse: &'static str,
    },
    Unary {
        slot: &'static str,
        dunder: &'static str,
    },
    Compare(CompareOp),
}

const OPERATORS: &[(&str, OperatorKind)] = &[
    (
        "op_Addition",
        OperatorKind::Binary {
            slot: "nb_add",
            forward: "__add__",
            reverse: "__radd__",
        },
    ),
    (
        "op_Subtraction",
        OperatorKind::Binary {
            slot: "nb_subtract",
            forward: "__sub__",
            reverse: "__rsub__",
        },
    ),
    (
        "op_Multiply",
        OperatorKind::Binary {
            slot: "nb_multiply",
            forward: "__mul__",
            reverse: "__rmul__",
        },
    ),
    (
        "op_Division",
        OperatorKind::Binary {
            slot: "nb_true_divide",
            forward: "__truediv__",
            reverse: "__rtruediv__",
        },
    ),
    (
        "op_UnaryNegation",
        OperatorKind::Unary {
            slot: "nb_negative",
            dunder: "__neg__",
        },
    ),
    ("op_Equality", OperatorKind::Compare(CompareOp::Eq)),
    ("op_Inequality", OperatorKind::Compare(CompareOp::Ne)),
    ("op_LessThan", OperatorKind::Compare(CompareOp::Lt)),
    ("op_LessThanOrEqual", OperatorKind::Compare(CompareOp::Le)),
    ("op_GreaterThan", OperatorKind::Compare(CompareOp::Gt)),
    ("op_GreaterThanOrEqual", OperatorKind::Compare(CompareOp::Ge)),
];

pub fn lookup(host_name: &str) -> Option<OperatorKind> {
    OPERATORS
        .iter()
        .find(|(name, _)| *name == host_name)
        .map(|(_, kind)| *kind)
}

/// Which operand of a binary operator is the declaring type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Forward,
    Reverse,
}

/// Forward when the declaring type is the left operand, reverse when it
/// only appears on the right
pub fn side_of(overload: &Overload, declaring: &HostType) -> Option<Side> {
    let params = &overload.info.sig.params;
    if params.len() != 2 {
        return None;
    }
    if declaring.is_assignable_to(&params[0].ty) {
        Some(Side::Forward)
    } else if declaring.is_assignable_to(&params[1].ty) {
        Some(Side::Reverse)
    } else {
        None
    }
}

/// Operator overloads of one class, grouped by slot
#[derive(Debug, Clone, Default)]
pub struct OperatorTable {
    forward: HashMap<&'static str, MethodSet>,
    reverse: HashMap<&'static str, MethodSet>,
    unary: HashMap<&'static str, MethodSet>,
    compare: HashMap<CompareOp, MethodSet>,
}

impl OperatorTable {
    /// File `set` (all overloads of one operator name) under its slot
    pub fn add(&mut self, kind: OperatorKind, set: &MethodSet, declaring: &HostType) {
        match kind {
            OperatorKind::Binary { slot, forward, reverse } => {
                for overload in set.overloads() {
                    match side_of(overload, declaring) {
                        Some(Side::Forward) => {
                            self.forward
                                .entry(slot)
                                .or_insert_with(|| MethodSet::new(forward))
                                .push(overload.clone());
                        }
                        Some(Side::Reverse) => {
                            self.reverse
                                .entry(slot)
                                .or_insert_with(|| MethodSet::new(reverse))
                                .push(overload.clone());
                        }
                        None => {}
                    }
                }
            }
            OperatorKind::Unary { slot, dunder } => {
                self.unary
                    .entry(slot)
                    .or_insert_with(|| MethodSet::new(dunder))
                    .merge(set);
            }
            OperatorKind::Compare(op) => {
                self.compare
                    .entry(op)
                    .or_insert_with(|| MethodSet::new(op.symbol()))
                    .merge(set);
            }
        }
    }

    pub fn forward(&self, slot: &str) -> Option<&MethodSet> {
        self.forward.get(slot)
    }

    pub fn reverse(&self, slot: &str) -> Option<&MethodSet> {
        self.reverse.get(slot)
    }

    pub fn unary(&self, slot: &str) -> Option<&MethodSet> {
        self.unary.get(slot)
    }

    pub fn compare(&self, op: CompareOp) -> Option<&MethodSet> {
        self.compare.get(&op)
    }

    pub fn has_compare(&self) -> bool {
        !self.compare.is_empty()
    }

    /// Number-protocol slots with at least one overload
    pub fn slots(&self) -> Vec<&'static str> {
        let mut slots: Vec<&'static str> = self
            .forward
            .keys()
            .chain(self.reverse.keys())
            .chain(self.unary.keys())
            .copied()
            .collect();
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    /// Dunder names mirrored into the class namespace, with their overloads
    pub fn mirrored(&self) -> Vec<(&str, Side, &MethodSet)> {
        let mut out = Vec::new();
        for set in self.forward.values().chain(self.unary.values()) {
            out.push((set.name(), Side::Forward, set));
        }
        for set in self.reverse.values() {
            out.push((set.name(), Side::Reverse, set));
        }
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.reverse.is_empty() && self.unary.is_empty() && self.compare.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{self, HostMember, HostType, HostValue, Param, Signature};

    fn ops_of(ty: &crate::host::HostTypeRef, name: &str) -> MethodSet {
        let mut set = MethodSet::new(name);
        for member in ty.members_named(name) {
            set.push(Overload {
                name: name.to_string(),
                info: member.method_info().unwrap().clone(),
                is_static: true,
                is_ctor: false,
                declaring: ty.clone(),
            });
        }
        set
    }

    #[test]
    fn test_lookup_names() {
        assert!(matches!(
            lookup("op_Addition"),
            Some(OperatorKind::Binary { slot: "nb_add", .. })
        ));
        assert_eq!(lookup("op_LessThan"), Some(OperatorKind::Compare(CompareOp::Lt)));
        assert_eq!(lookup("Add"), None);
    }

    #[test]
    fn test_forward_and_reverse_split() {
        let vec2 = HostType::class("Vec2").build();
        let scale = |params: Vec<Param>| {
            HostMember::operator("op_Multiply", Signature::new(params, vec2.clone()), |_| {
                Ok(HostValue::Null)
            })
        };
        vec2.add_member(scale(vec![
            Param::new("a", vec2.clone()),
            Param::new("k", host::float64_type()),
        ]));
        vec2.add_member(scale(vec![
            Param::new("k", host::float64_type()),
            Param::new("a", vec2.clone()),
        ]));

        let mut table = OperatorTable::default();
        let kind = lookup("op_Multiply").unwrap();
        table.add(kind, &ops_of(&vec2, "op_Multiply"), &vec2);
        assert_eq!(table.forward("nb_multiply").unwrap().len(), 1);
        assert_eq!(table.reverse("nb_multiply").unwrap().len(), 1);
        assert_eq!(table.slots(), vec!["nb_multiply"]);
        let names: Vec<&str> = table.mirrored().iter().map(|m| m.0).collect();
        assert_eq!(names, ["__mul__", "__rmul__"]);
    }
}
