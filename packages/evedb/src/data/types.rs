//! The type system mirroring the data universe.
//!
//! A [`Type`] is a [`TypeKind`] plus an optional name and a list of
//! attributes. Record types flatten to [`Layout`]s, where every column is
//! a leaf type addressed by a dot-joined path.

use serde::{Deserialize, Serialize};

use crate::data::Data;
use crate::error::{Error, Result};

/// A `key=value` annotation on a type. `"key"` on a record field marks it
/// as the map key when a list of records is converted to a map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Attribute {
    pub fn new(key: &str) -> Self {
        Self { key: key.to_string(), value: None }
    }

    pub fn with_value(key: &str, value: &str) -> Self {
        Self { key: key.to_string(), value: Some(value.to_string()) }
    }
}

/// A named field of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
}

impl RecordField {
    pub fn new(name: &str, ty: Type) -> Self {
        Self { name: name.to_string(), ty }
    }
}

/// The structural part of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Bool,
    Integer,
    Count,
    Real,
    String,
    Pattern,
    Address,
    Subnet,
    Time,
    Duration,
    /// Symbol names in ordinal order.
    Enumeration(Vec<String>),
    List(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Record(Vec<RecordField>),
    /// Reference to another type by name. Conversion through an alias is
    /// a type error; aliases only resolve by schema lookup.
    Alias(String),
}

impl TypeKind {
    /// Whether values of this kind order totally (min/max synopses apply).
    pub fn is_ordered_scalar(&self) -> bool {
        matches!(
            self,
            TypeKind::Integer
                | TypeKind::Count
                | TypeKind::Real
                | TypeKind::Time
                | TypeKind::Duration
        )
    }

    pub fn is_container(&self) -> bool {
        matches!(self, TypeKind::List(_) | TypeKind::Map(_, _) | TypeKind::Record(_))
    }
}

/// A type with optional name and attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Type {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<Attribute>,
    pub kind: TypeKind,
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Self { name: None, attrs: Vec::new(), kind }
    }

    pub fn named(name: &str, kind: TypeKind) -> Self {
        Self { name: Some(name.to_string()), attrs: Vec::new(), kind }
    }

    pub fn with_attr(mut self, attr: Attribute) -> Self {
        self.attrs.push(attr);
        self
    }

    pub fn record(name: &str, fields: Vec<RecordField>) -> Self {
        Self::named(name, TypeKind::Record(fields))
    }

    pub fn has_attr(&self, key: &str) -> bool {
        self.attrs.iter().any(|a| a.key == key)
    }

    /// Flatten a record type into a layout of leaf columns. Nested record
    /// fields contribute dot-joined paths; lists and maps are leaves.
    pub fn flatten(&self) -> Result<Layout> {
        let name = self
            .name
            .clone()
            .ok_or_else(|| Error::InvalidArgument("cannot flatten an unnamed type".into()))?;
        let TypeKind::Record(fields) = &self.kind else {
            return Err(Error::InvalidArgument(format!(
                "cannot flatten non-record type {}",
                name
            )));
        };
        let mut columns = Vec::new();
        flatten_into(fields, "", &mut columns)?;
        if columns.is_empty() {
            return Err(Error::InvalidArgument(format!("record type {} has no fields", name)));
        }
        Ok(Layout { name, columns })
    }
}

fn flatten_into(fields: &[RecordField], prefix: &str, out: &mut Vec<(String, Type)>) -> Result<()> {
    for field in fields {
        let path = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{}.{}", prefix, field.name)
        };
        match &field.ty.kind {
            TypeKind::Record(inner) => flatten_into(inner, &path, out)?,
            _ => {
                if out.iter().any(|(p, _)| *p == path) {
                    return Err(Error::InvalidArgument(format!("duplicate field path: {}", path)));
                }
                out.push((path, field.ty.clone()));
            }
        }
    }
    Ok(())
}

/// A flattened record layout: the shape of one table slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub name: String,
    /// Leaf columns as (dot-joined path, leaf type), in declaration order.
    pub columns: Vec<(String, Type)>,
}

impl Layout {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Index of the column whose path matches `name` exactly or at a dot
    /// boundary from the right. The layout name may be included as the
    /// leading component.
    pub fn resolve(&self, name: &str) -> Vec<usize> {
        let mut out = Vec::new();
        for (i, (path, _)) in self.columns.iter().enumerate() {
            let full = format!("{}.{}", self.name, path);
            if path == name
                || full == name
                || path.ends_with(&format!(".{}", name))
                || full.ends_with(&format!(".{}", name))
            {
                out.push(i);
            }
        }
        out
    }
}

/// Check a value against a type kind. `Nil` passes any kind; containers
/// check element-wise.
pub fn type_check(kind: &TypeKind, data: &Data) -> bool {
    match (kind, data) {
        (_, Data::Nil) => true,
        (TypeKind::Bool, Data::Bool(_)) => true,
        (TypeKind::Integer, Data::Integer(_)) => true,
        (TypeKind::Count, Data::Count(_)) => true,
        (TypeKind::Real, Data::Real(_)) => true,
        (TypeKind::String, Data::String(_)) => true,
        (TypeKind::Pattern, Data::Pattern(_)) => true,
        (TypeKind::Address, Data::Address(_)) => true,
        (TypeKind::Subnet, Data::Subnet(_)) => true,
        (TypeKind::Time, Data::Time(_)) => true,
        (TypeKind::Duration, Data::Duration(_)) => true,
        (TypeKind::Enumeration(fields), Data::Enumeration(ord)) => {
            (*ord as usize) < fields.len()
        }
        (TypeKind::List(elem), Data::List(xs)) => {
            xs.iter().all(|x| type_check(&elem.kind, x))
        }
        (TypeKind::Map(k, v), Data::Map(xs)) => xs
            .iter()
            .all(|(key, val)| type_check(&k.kind, key) && type_check(&v.kind, val)),
        (TypeKind::Record(fields), Data::Record(xs)) => {
            fields.len() == xs.len()
                && fields
                    .iter()
                    .zip(xs.iter())
                    .all(|(f, (name, val))| f.name == *name && type_check(&f.ty.kind, val))
        }
        // Aliases never type-check structurally; resolve through the
        // schema first.
        (TypeKind::Alias(_), _) => false,
        _ => false,
    }
}
