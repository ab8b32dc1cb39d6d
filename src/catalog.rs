// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The schema oracle: relations and attributes.
//!
//! Grounded on `catalog/CatalogRelation.{hpp,cpp}` and
//! `catalog/CatalogAttribute.hpp`. Treated (per scope) as an immutable schema
//! oracle — nothing here is mutated after a [`Relation`] is built.

use crate::value::ValueType;

/// A dense, stable attribute identifier, starting at 0.
pub type AttributeId = u32;

/// A single column of a [`Relation`].
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    id: AttributeId,
    name: String,
    value_type: ValueType,
    nullable: bool,
}

impl Attribute {
    /// Creates a new attribute.
    #[must_use]
    pub fn new(id: AttributeId, name: impl Into<String>, value_type: ValueType, nullable: bool) -> Self {
        Self {
            id,
            name: name.into(),
            value_type,
            nullable,
        }
    }

    /// This attribute's dense identifier.
    #[must_use]
    pub fn id(&self) -> AttributeId {
        self.id
    }

    /// This attribute's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This attribute's declared type.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Whether this attribute may hold SQL NULL.
    #[must_use]
    pub fn nullable(&self) -> bool {
        self.nullable
    }

    /// The fixed on-disk byte width of this attribute, or `None` if it is
    /// variable-length.
    #[must_use]
    pub fn fixed_byte_length(&self) -> Option<usize> {
        self.value_type.fixed_byte_length()
    }

    /// The maximum byte length a value of this attribute can occupy.
    #[must_use]
    pub fn max_byte_length(&self) -> usize {
        self.value_type.max_byte_length()
    }
}

/// An ordered sequence of attributes, addressed by dense identifier.
#[derive(Clone, Debug, PartialEq)]
pub struct Relation {
    name: String,
    attributes: Vec<Attribute>,
}

impl Relation {
    /// Builds a relation from a name and an ordered attribute list.
    ///
    /// # Panics
    ///
    /// Panics if the attribute ids are not dense from 0 — this is a
    /// programmer error in schema construction, not a runtime condition
    /// callers should recover from.
    #[must_use]
    pub fn new(name: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        for (i, attr) in attributes.iter().enumerate() {
            assert_eq!(
                attr.id() as usize,
                i,
                "attribute ids must be dense from 0"
            );
        }
        Self {
            name: name.into(),
            attributes,
        }
    }

    /// This relation's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The number of attributes in this relation.
    #[must_use]
    pub fn num_attributes(&self) -> usize {
        self.attributes.len()
    }

    /// Looks up an attribute by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not name an attribute of this relation — accessing
    /// a non-existent attribute is a programmer error (spec: fatal).
    #[must_use]
    pub fn attribute(&self, id: AttributeId) -> &Attribute {
        self.attributes
            .get(id as usize)
            .unwrap_or_else(|| panic!("relation {} has no attribute {id}", self.name))
    }

    /// All attributes of this relation, in declared order.
    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Whether every attribute is fixed-length and non-nullable, which is
    /// required for a packed row store (`PackedRowStoreTupleStorageSubBlock`
    /// rejects variable-length or nullable attributes).
    #[must_use]
    pub fn supports_fixed_layout(&self) -> bool {
        self.attributes
            .iter()
            .all(|a| !a.nullable() && a.fixed_byte_length().is_some())
    }

    /// The fixed per-tuple byte stride for this relation, if every attribute
    /// is fixed-length and non-nullable.
    #[must_use]
    pub fn fixed_byte_length(&self) -> Option<usize> {
        if !self.supports_fixed_layout() {
            return None;
        }
        Some(
            self.attributes
                .iter()
                .map(|a| a.fixed_byte_length().unwrap_or(0))
                .sum(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_relation() -> Relation {
        Relation::new(
            "t",
            vec![
                Attribute::new(0, "a", ValueType::Int, false),
                Attribute::new(1, "b", ValueType::Double, false),
            ],
        )
    }

    #[test]
    fn fixed_byte_length_sums_attributes() {
        let r = sample_relation();
        assert_eq!(r.fixed_byte_length(), Some(16));
    }

    #[test]
    fn nullable_attribute_breaks_fixed_layout() {
        let r = Relation::new(
            "t",
            vec![Attribute::new(0, "a", ValueType::Int, true)],
        );
        assert!(!r.supports_fixed_layout());
        assert_eq!(r.fixed_byte_length(), None);
    }

    #[test]
    #[should_panic(expected = "must be dense")]
    fn non_dense_ids_panic() {
        let _ = Relation::new("t", vec![Attribute::new(1, "a", ValueType::Int, false)]);
    }
}
