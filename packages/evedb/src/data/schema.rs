//! Schemas: sets of named record types.

use serde::{Deserialize, Serialize};

use crate::data::types::{Layout, Type, TypeKind};
use crate::error::{Error, Result};

/// A set of named record types with unique names. Schemas are handed to
/// readers and attached (flattened) to every table slice they produce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    types: Vec<Type>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named record type. Rejects unnamed types, non-records, and
    /// duplicate names.
    pub fn add(&mut self, ty: Type) -> Result<()> {
        let Some(name) = ty.name.clone() else {
            return Err(Error::InvalidArgument("schema types must be named".into()));
        };
        if !matches!(ty.kind, TypeKind::Record(_)) {
            return Err(Error::InvalidArgument(format!(
                "schema type {} must be a record",
                name
            )));
        }
        if self.find(&name).is_some() {
            return Err(Error::InvalidArgument(format!("duplicate schema type: {}", name)));
        }
        self.types.push(ty);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&Type> {
        self.types
            .iter()
            .find(|t| t.name.as_deref() == Some(name))
    }

    /// Resolve an alias kind to its target type in this schema.
    pub fn resolve_alias(&self, name: &str) -> Option<&Type> {
        self.find(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Type> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Flattened layouts of all record types.
    pub fn layouts(&self) -> Result<Vec<Layout>> {
        self.types.iter().map(|t| t.flatten()).collect()
    }

    /// Union with another schema. Same-named types must be identical.
    pub fn merge(&mut self, other: &Schema) -> Result<()> {
        for ty in &other.types {
            let name = ty.name.as_deref().unwrap_or_default();
            match self.find(name) {
                None => self.types.push(ty.clone()),
                Some(existing) if existing == ty => {}
                Some(_) => {
                    return Err(Error::TypeClash(format!(
                        "conflicting definitions for schema type {}",
                        name
                    )))
                }
            }
        }
        Ok(())
    }
}
