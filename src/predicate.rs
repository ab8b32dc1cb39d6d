// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Predicate trees the storage engine recognises.
//!
//! Grounded on `expressions/Predicate.hpp`, `ComparisonPredicate.hpp`, and
//! `TrivialPredicates.hpp`, but flattened into the tagged-variant shape
//! called for in the design notes: a comparison has two operands, each
//! either a literal or an attribute reference, plus the always-true and
//! always-false trivial predicates. No open-ended expression polymorphism
//! is needed — this is the only predicate shape the storage engine evaluates
//! directly; anything richer is expected to be pre-compiled down to this
//! shape (or not pushed down at all) by the query layer, which is out of
//! scope for this crate.

use crate::catalog::AttributeId;
use crate::tuple::Tuple;
use crate::value::Value;

/// A comparison operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl ComparisonOp {
    /// Flips the operator for when its operands are swapped, so that
    /// `literal OP attr` becomes `attr OP.flip() literal`.
    #[must_use]
    pub fn flip(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }

    /// The logical negation of this operator (`a OP b` iff `!(a OP.negate() b)`).
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Le => Self::Gt,
            Self::Gt => Self::Le,
            Self::Ge => Self::Lt,
        }
    }

    /// Evaluates `lhs OP rhs` given an already-computed [`std::cmp::Ordering`].
    #[must_use]
    pub fn apply(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        matches!(
            (self, ordering),
            (Self::Eq, Equal)
                | (Self::Ne, Less | Greater)
                | (Self::Lt, Less)
                | (Self::Le, Less | Equal)
                | (Self::Gt, Greater)
                | (Self::Ge, Greater | Equal)
        )
    }
}

/// One side of a comparison: either a literal value or a reference to an
/// attribute of the tuple being evaluated.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// A literal value.
    Literal(Value),
    /// A reference to an attribute by id.
    Attribute(AttributeId),
}

impl Operand {
    fn resolve<'a>(&'a self, tuple: &'a Tuple) -> &'a Value {
        match self {
            Self::Literal(v) => v,
            Self::Attribute(id) => tuple.value(*id),
        }
    }
}

/// A predicate tree recognised by the storage engine's fast paths.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Matches every tuple.
    TrivialTrue,
    /// Matches no tuple.
    TrivialFalse,
    /// `left OP right`, where at most one side references an attribute in a
    /// form the fast paths can exploit (`attr OP literal` / `literal OP
    /// attr`); both sides being attributes is evaluated by plain comparison.
    Comparison {
        /// Comparison operator.
        op: ComparisonOp,
        /// Left operand.
        left: Operand,
        /// Right operand.
        right: Operand,
    },
}

impl Predicate {
    /// Convenience constructor for `attr OP literal`.
    #[must_use]
    pub fn compare(attr: AttributeId, op: ComparisonOp, literal: Value) -> Self {
        Self::Comparison {
            op,
            left: Operand::Attribute(attr),
            right: Operand::Literal(literal),
        }
    }

    /// Evaluates this predicate against a concrete tuple. This is the
    /// dumb/general fallback; sub-blocks with sortedness or compression
    /// should prefer their own fast paths when the shape matches.
    #[must_use]
    pub fn evaluate(&self, tuple: &Tuple) -> bool {
        match self {
            Self::TrivialTrue => true,
            Self::TrivialFalse => false,
            Self::Comparison { op, left, right } => {
                let l = left.resolve(tuple);
                let r = right.resolve(tuple);
                if matches!(l, Value::Null) || matches!(r, Value::Null) {
                    return false;
                }
                op.apply(l.compare(r))
            }
        }
    }

    /// If this predicate has the shape `attr OP literal` or
    /// `literal OP attr` for the given `attr`, returns the operator and
    /// literal normalized to the `attr OP literal` orientation.
    #[must_use]
    pub fn as_attribute_literal(&self, attr: AttributeId) -> Option<(ComparisonOp, &Value)> {
        match self {
            Self::Comparison {
                op,
                left: Operand::Attribute(a),
                right: Operand::Literal(v),
            } if *a == attr => Some((*op, v)),
            Self::Comparison {
                op,
                left: Operand::Literal(v),
                right: Operand::Attribute(a),
            } if *a == attr => Some((op.flip(), v)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_is_involution_on_eq_ne() {
        assert_eq!(ComparisonOp::Eq.flip(), ComparisonOp::Eq);
        assert_eq!(ComparisonOp::Ne.flip(), ComparisonOp::Ne);
    }

    #[test]
    fn negate_covers_full_id_set() {
        use std::cmp::Ordering::{Equal, Greater, Less};
        for op in [
            ComparisonOp::Eq,
            ComparisonOp::Ne,
            ComparisonOp::Lt,
            ComparisonOp::Le,
            ComparisonOp::Gt,
            ComparisonOp::Ge,
        ] {
            for ord in [Less, Equal, Greater] {
                assert_ne!(op.apply(ord), op.negate().apply(ord));
            }
        }
    }

    #[test]
    fn normalizes_literal_on_left() {
        let p = Predicate::Comparison {
            op: ComparisonOp::Lt,
            left: Operand::Literal(Value::Int(5)),
            right: Operand::Attribute(0),
        };
        let (op, lit) = p.as_attribute_literal(0).unwrap();
        assert_eq!(op, ComparisonOp::Gt);
        assert_eq!(*lit, Value::Int(5));
    }
}
