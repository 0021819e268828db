//! Partial updates
//!
//! A [`Patch`] is a set of named field values. Applying it serializes the
//! current entity, overwrites exactly the named top-level fields, and
//! deserializes the result back, so the entity type's own serde rules decide
//! what a valid field value is.
//!
//! # Example
//!
//! ```rust
//! use repokit::repository::Patch;
//!
//! let patch = Patch::new().set("name", "Grace").set("age", 85);
//! assert_eq!(patch.len(), 2);
//! assert!(patch.contains("name"));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use super::error::RepositoryError;
use super::schema::Entity;
use super::traits::RepositoryResult;

/// Named field values to merge into an existing entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch {
    fields: Map<String, Json>,
}

impl Patch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one field
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Json>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Build a patch from a JSON object
    ///
    /// # Errors
    ///
    /// `InvalidPatch` if `value` is not an object.
    pub fn from_json<T: Entity>(value: Json) -> RepositoryResult<Self> {
        match value {
            Json::Object(fields) => Ok(Self { fields }),
            other => Err(RepositoryError::invalid_patch(
                T::NAME,
                format!("expected a JSON object, got {}", json_type(&other)),
            )),
        }
    }

    /// Whether the patch names `field`
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the patch names no field
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names, in insertion-independent order
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Merge into `current`, returning the updated entity
    ///
    /// Only top-level fields can be patched. A field the entity omits while
    /// serializing (`skip_serializing_if`) is still accepted; a field counts as
    /// unknown when the merged entity does not serialize it back. Setting such
    /// an omitted field to `null` is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidPatch` if a field is unknown, a value does not deserialize,
    /// or the merge would change the entity key.
    pub fn apply<T: Entity>(&self, current: &T) -> RepositoryResult<T> {
        let mut object = to_object(current)?;
        let mut absent = Vec::new();
        for (field, value) in &self.fields {
            if object.insert(field.clone(), value.clone()).is_none() && !value.is_null() {
                absent.push(field.as_str());
            }
        }

        let merged: T =
            serde_json::from_value(Json::Object(object)).map_err(|e| invalid::<T>(e.to_string()))?;

        if !absent.is_empty() {
            let written = to_object(&merged)?;
            if let Some(field) = absent.into_iter().find(|field| !written.contains_key(*field)) {
                return Err(invalid::<T>(format!("unknown field '{}'", field)));
            }
        }

        if merged.key() != current.key() {
            return Err(invalid::<T>("patch must not change the entity key".to_string()));
        }
        Ok(merged)
    }
}

fn invalid<T: Entity>(message: String) -> RepositoryError {
    RepositoryError::invalid_patch(T::NAME, message)
}

fn to_object<T: Entity>(entity: &T) -> RepositoryResult<Map<String, Json>> {
    match serde_json::to_value(entity) {
        Ok(Json::Object(object)) => Ok(object),
        Ok(other) => Err(invalid::<T>(format!(
            "entity serializes to {}, not an object",
            json_type(&other)
        ))),
        Err(e) => Err(invalid::<T>(format!("entity does not serialize: {}", e))),
    }
}

impl From<Map<String, Json>> for Patch {
    fn from(fields: Map<String, Json>) -> Self {
        Self { fields }
    }
}

fn json_type(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}
