//! Serializable schema definitions.
//!
//! A definition is what travels between peers and into schema stores; the
//! derived `Schema` (ids, accessors) is rebuilt from it on arrival.

use serde::{Deserialize, Serialize};

/// Primitive value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    Bool,
    Int,
    Long,
    Double,
    String,
    Bytes,
}

impl ScalarType {
    pub(crate) fn code(self) -> &'static str {
        match self {
            ScalarType::Bool => "z",
            ScalarType::Int => "i",
            ScalarType::Long => "l",
            ScalarType::Double => "d",
            ScalarType::String => "s",
            ScalarType::Bytes => "b",
        }
    }
}

/// Kind of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Scalar { ty: ScalarType },
    List { ty: ScalarType },
    /// Nested part governed by its own schema (id carried in the bytes).
    Part,
    /// Tagged union; the selected variant decides which sub-fields exist.
    Choice { variants: Vec<VariantDef> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn scalar(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar { ty },
        }
    }

    pub fn list(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::List { ty },
        }
    }

    pub fn part(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Part,
        }
    }

    pub fn choice(name: impl Into<String>, variants: Vec<VariantDef>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Choice { variants },
        }
    }
}

/// One arm of a choice. An arm without fields is an "empty" variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantDef {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl VariantDef {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }
}

/// Top-level schema definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl SchemaDef {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }
}
