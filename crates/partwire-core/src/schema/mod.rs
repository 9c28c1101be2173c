//! Immutable schemas, accessors and the schema registry.
//!
//! A `Schema` is derived once from a `SchemaDef`:
//! - its id is the first 8 bytes (big-endian) of the SHA-256 of the canonical
//!   JSON definition, so equal definitions always share an id;
//! - every field, including choice fields and fields nested in variants, gets
//!   an `Accessor` in depth-first order;
//! - a layout fingerprint (the definition with names stripped) decides
//!   byte-structural compatibility between schemas with different ids.

pub mod def;
pub mod registry;
pub mod store;

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

use crate::error::{PartwireError, Result};

pub use def::{FieldDef, FieldKind, ScalarType, SchemaDef, VariantDef};
pub use registry::SchemaRegistry;
pub use store::{MemorySchemaStore, SchemaStore};

/// 64-bit schema identifier. `0` is reserved for "no part".
pub type SchemaId = u64;

/// Opaque per-schema field token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Accessor(u32);

impl Accessor {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(i: usize) -> Self {
        Self(i as u32)
    }
}

/// Shape of a flattened field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Scalar(ScalarType),
    List(ScalarType),
    Part,
    Choice {
        variants: Vec<VariantInfo>,
        /// First empty variant; selected on new parts and after a clear.
        initial: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantInfo {
    pub name: String,
    /// Direct children of this variant, in wire order.
    pub fields: Vec<Accessor>,
}

/// Enclosing choice arm of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guard {
    pub choice: Accessor,
    pub variant: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub path: String,
    pub shape: Shape,
    pub guard: Option<Guard>,
    /// Number of accessors nested below this one (non-zero only for choices).
    pub span: u32,
}

#[derive(Debug)]
pub struct Schema {
    id: SchemaId,
    layout: u64,
    def: SchemaDef,
    fields: Vec<FieldInfo>,
    top: Vec<Accessor>,
    by_path: HashMap<String, Accessor>,
}

impl Schema {
    /// Validate a definition and derive ids and accessors.
    pub fn new(def: SchemaDef) -> Result<Self> {
        if def.name.is_empty() {
            return Err(PartwireError::InvalidSchema("schema name must not be empty".into()));
        }
        if def.fields.is_empty() {
            return Err(PartwireError::InvalidSchema(format!(
                "schema {} has no fields",
                def.name
            )));
        }

        let canonical = serde_json::to_vec(&def)
            .map_err(|e| PartwireError::InvalidSchema(format!("definition encode failed: {e}")))?;
        let mut id = digest_u64(&canonical);
        if id == 0 {
            id = 1;
        }

        let mut shape_sig = String::new();
        let mut fields = Vec::new();
        let top = flatten(&def.fields, "", None, &mut fields, &mut shape_sig)?;
        let layout = digest_u64(shape_sig.as_bytes());

        let by_path = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.path.clone(), Accessor(i as u32)))
            .collect();

        Ok(Self {
            id,
            layout,
            def,
            fields,
            top,
            by_path,
        })
    }

    /// Rebuild a schema from bytes produced by `to_bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let def: SchemaDef = serde_json::from_slice(bytes)
            .map_err(|e| PartwireError::InvalidSchema(format!("invalid definition: {e}")))?;
        Self::new(def)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.def)
            .map_err(|e| PartwireError::Internal(format!("definition encode failed: {e}")))
    }

    pub fn id(&self) -> SchemaId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &SchemaDef {
        &self.def
    }

    pub fn layout_fingerprint(&self) -> u64 {
        self.layout
    }

    /// Same byte layout (and therefore the same accessor numbering).
    pub fn is_compatible(&self, other: &Schema) -> bool {
        self.id == other.id || self.layout == other.layout
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Top-level accessors in wire order.
    pub fn top_level(&self) -> &[Accessor] {
        &self.top
    }

    /// Resolve a dotted path (`choice.variant.field`).
    pub fn accessor(&self, path: &str) -> Result<Accessor> {
        self.by_path.get(path).copied().ok_or_else(|| {
            PartwireError::SchemaViolation(format!("schema {} has no field {path}", self.name()))
        })
    }

    pub fn field(&self, acc: Accessor) -> Result<&FieldInfo> {
        self.fields.get(acc.index()).ok_or_else(|| {
            PartwireError::SchemaViolation(format!(
                "accessor {} out of range for schema {}",
                acc.0,
                self.name()
            ))
        })
    }

    pub(crate) fn info(&self, acc: Accessor) -> &FieldInfo {
        &self.fields[acc.index()]
    }

    /// Resolve a variant of a choice field by name.
    pub fn variant_index(&self, choice: Accessor, name: &str) -> Result<u32> {
        match &self.field(choice)?.shape {
            Shape::Choice { variants, .. } => variants
                .iter()
                .position(|v| v.name == name)
                .map(|i| i as u32)
                .ok_or_else(|| {
                    PartwireError::SchemaViolation(format!("choice has no variant {name}"))
                }),
            _ => Err(PartwireError::SchemaViolation(format!(
                "{} is not a choice",
                self.info(choice).path
            ))),
        }
    }

    /// Enclosing choice arms of a field, innermost first.
    pub fn guards(&self, acc: Accessor) -> Vec<Guard> {
        let mut out = Vec::new();
        let mut cur = self.fields.get(acc.index()).and_then(|f| f.guard);
        while let Some(g) = cur {
            out.push(g);
            cur = self.info(g.choice).guard;
        }
        out
    }
}

fn digest_u64(bytes: &[u8]) -> u64 {
    let hash = Sha256::digest(bytes);
    let mut id = [0u8; 8];
    id.copy_from_slice(&hash[..8]);
    u64::from_be_bytes(id)
}

fn flatten(
    defs: &[FieldDef],
    prefix: &str,
    guard: Option<Guard>,
    out: &mut Vec<FieldInfo>,
    sig: &mut String,
) -> Result<Vec<Accessor>> {
    let mut seen = HashSet::new();
    let mut direct = Vec::with_capacity(defs.len());

    for f in defs {
        check_name(&f.name)?;
        if !seen.insert(f.name.as_str()) {
            return Err(PartwireError::InvalidSchema(format!(
                "duplicate field {prefix}{}",
                f.name
            )));
        }

        let path = format!("{prefix}{}", f.name);
        let acc = Accessor(out.len() as u32);
        direct.push(acc);

        match &f.kind {
            FieldKind::Scalar { ty } => {
                sig.push_str(ty.code());
                push_leaf(out, path, Shape::Scalar(*ty), guard);
            }
            FieldKind::List { ty } => {
                sig.push('[');
                sig.push_str(ty.code());
                push_leaf(out, path, Shape::List(*ty), guard);
            }
            FieldKind::Part => {
                sig.push('p');
                push_leaf(out, path, Shape::Part, guard);
            }
            FieldKind::Choice { variants } => {
                if variants.is_empty() {
                    return Err(PartwireError::InvalidSchema(format!("choice {path} has no variants")));
                }
                let initial = variants
                    .iter()
                    .position(|v| v.fields.is_empty())
                    .ok_or_else(|| {
                        PartwireError::InvalidSchema(format!("choice {path} has no empty variant"))
                    })? as u32;

                // Placeholder; variants are filled in once children have accessors.
                push_leaf(out, path.clone(), Shape::Part, guard);

                sig.push('(');
                let mut infos = Vec::with_capacity(variants.len());
                let mut names = HashSet::new();
                for (vi, v) in variants.iter().enumerate() {
                    check_name(&v.name)?;
                    if !names.insert(v.name.as_str()) {
                        return Err(PartwireError::InvalidSchema(format!(
                            "duplicate variant {path}.{}",
                            v.name
                        )));
                    }
                    sig.push('|');
                    let child_prefix = format!("{path}.{}.", v.name);
                    let child_guard = Guard {
                        choice: acc,
                        variant: vi as u32,
                    };
                    let fields = flatten(&v.fields, &child_prefix, Some(child_guard), out, sig)?;
                    infos.push(VariantInfo {
                        name: v.name.clone(),
                        fields,
                    });
                }
                sig.push(')');

                let span = (out.len() - acc.index() - 1) as u32;
                let slot = &mut out[acc.index()];
                slot.shape = Shape::Choice {
                    variants: infos,
                    initial,
                };
                slot.span = span;
            }
        }
        sig.push(';');
    }

    Ok(direct)
}

fn push_leaf(out: &mut Vec<FieldInfo>, path: String, shape: Shape, guard: Option<Guard>) {
    out.push(FieldInfo {
        path,
        shape,
        guard,
        span: 0,
    });
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') {
        return Err(PartwireError::InvalidSchema(format!(
            "invalid field name {name:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn body_def(name: &str, text_field: &str) -> SchemaDef {
        SchemaDef::new(
            name,
            vec![
                FieldDef::scalar("priority", ScalarType::Int),
                FieldDef::choice(
                    "body",
                    vec![
                        VariantDef::empty("none"),
                        VariantDef::new("text", vec![FieldDef::scalar(text_field, ScalarType::String)]),
                        VariantDef::new("raw", vec![FieldDef::scalar("data", ScalarType::Bytes)]),
                    ],
                ),
                FieldDef::list("tags", ScalarType::String),
            ],
        )
    }

    #[test]
    fn accessors_are_depth_first() {
        let s = Schema::new(body_def("msg", "value")).unwrap();
        assert_eq!(s.field_count(), 5);
        assert_eq!(s.accessor("priority").unwrap().index(), 0);
        assert_eq!(s.accessor("body").unwrap().index(), 1);
        assert_eq!(s.accessor("body.text.value").unwrap().index(), 2);
        assert_eq!(s.accessor("body.raw.data").unwrap().index(), 3);
        assert_eq!(s.accessor("tags").unwrap().index(), 4);
        assert_eq!(s.top_level().len(), 3);

        let body = s.accessor("body").unwrap();
        assert_eq!(s.field(body).unwrap().span, 2);
        let guards = s.guards(s.accessor("body.raw.data").unwrap());
        assert_eq!(guards, vec![Guard { choice: body, variant: 2 }]);
    }

    #[test]
    fn renamed_fields_keep_layout_but_change_id() {
        let a = Schema::new(body_def("msg", "value")).unwrap();
        let b = Schema::new(body_def("msg2", "text")).unwrap();
        assert_ne!(a.id(), b.id());
        assert!(a.is_compatible(&b));

        let mut def = body_def("msg", "value");
        def.fields.push(FieldDef::scalar("extra", ScalarType::Bool));
        let c = Schema::new(def).unwrap();
        assert!(!a.is_compatible(&c));
    }

    #[test]
    fn id_is_stable_across_byte_round_trip() {
        let a = Schema::new(body_def("msg", "value")).unwrap();
        let b = Schema::from_bytes(&a.to_bytes().unwrap()).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.layout_fingerprint(), b.layout_fingerprint());
    }

    #[test]
    fn choice_without_empty_variant_is_rejected() {
        let def = SchemaDef::new(
            "bad",
            vec![FieldDef::choice(
                "c",
                vec![VariantDef::new("a", vec![FieldDef::scalar("x", ScalarType::Int)])],
            )],
        );
        let err = Schema::new(def).unwrap_err();
        assert_eq!(err.code().as_str(), "INVALID_SCHEMA");
    }

    #[test]
    fn duplicate_and_dotted_names_are_rejected() {
        let dup = SchemaDef::new(
            "dup",
            vec![
                FieldDef::scalar("x", ScalarType::Int),
                FieldDef::scalar("x", ScalarType::Long),
            ],
        );
        assert!(Schema::new(dup).is_err());

        let dotted = SchemaDef::new("dot", vec![FieldDef::scalar("a.b", ScalarType::Int)]);
        assert!(Schema::new(dotted).is_err());
    }
}
