//! Concepts
//!
//! A [`Concept`] is a named logical entity with a type tag and, optionally, an
//! exclusively-owned [`Reference`]. Steps attach the references they produce to
//! concepts; downstream steps read them back through the state's reference
//! blocks. Ownership is strict: attaching a reference clones it, so two
//! concepts never alias the same data.

use crate::inferflow::reference::Reference;
use serde::{Deserialize, Serialize};

/// Type tag of a concept.
///
/// The tags mirror the notation used in concept names: `{}` object, `()`
/// proposition, `[]` relation, `::` imperative, and `$…` operator variants
/// (the payload keeps the full operator spelling).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConceptKind {
    Object,
    Proposition,
    Relation,
    Imperative,
    Operator(String),
}

impl ConceptKind {
    /// Parse a type tag. Unrecognised tags default to [`ConceptKind::Object`].
    pub fn parse(tag: &str) -> ConceptKind {
        match tag {
            "{}" => ConceptKind::Object,
            "()" => ConceptKind::Proposition,
            "[]" => ConceptKind::Relation,
            "::" => ConceptKind::Imperative,
            other if other.starts_with('$') => ConceptKind::Operator(other.to_string()),
            _ => ConceptKind::Object,
        }
    }

    /// Canonical tag spelling.
    pub fn tag(&self) -> &str {
        match self {
            ConceptKind::Object => "{}",
            ConceptKind::Proposition => "()",
            ConceptKind::Relation => "[]",
            ConceptKind::Imperative => "::",
            ConceptKind::Operator(spelling) => spelling,
        }
    }
}

/// A named logical entity optionally owning a [`Reference`].
#[derive(Debug, Clone, PartialEq)]
pub struct Concept {
    /// Stable identifier.
    pub id: String,
    /// Display name; also the default axis name for combined references.
    pub name: String,
    /// Type tag.
    pub kind: ConceptKind,
    /// Free-form context the concept was parsed from.
    pub context: String,
    /// Axis name used when this concept's references enter a cross product.
    pub axis_name: String,
    reference: Option<Reference>,
}

impl Concept {
    /// Create a concept without a reference. The axis name defaults to the
    /// concept name.
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ConceptKind) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            axis_name: name.clone(),
            name,
            kind,
            context: String::new(),
            reference: None,
        }
    }

    /// Set the context string.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Override the axis name.
    pub fn with_axis_name(mut self, axis_name: impl Into<String>) -> Self {
        self.axis_name = axis_name.into();
        self
    }

    /// Attach a reference, cloning it. Copy-on-attach keeps reference
    /// ownership exclusive to this concept.
    pub fn attach_reference(&mut self, reference: &Reference) {
        self.reference = Some(reference.clone());
    }

    /// Builder form of [`Concept::attach_reference`].
    pub fn with_reference(mut self, reference: &Reference) -> Self {
        self.attach_reference(reference);
        self
    }

    /// Borrow the owned reference, if any.
    pub fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    /// Drop the owned reference, returning it.
    pub fn take_reference(&mut self) -> Option<Reference> {
        self.reference.take()
    }
}
