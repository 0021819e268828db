//! Entity schemas and property resolution
//!
//! Rust has no runtime reflection, so each entity type describes the
//! properties it exposes for sorting and filtering once, in
//! [`Entity::schema`]. The rest of the repository only ever sees property
//! *names*: [`Schema::resolve`] turns a name into an [`Accessor`] that extracts
//! a comparable [`Value`] from any instance.
//!
//! # Example
//!
//! ```rust
//! use repokit::repository::{Entity, Schema};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct User {
//!     id: u32,
//!     name: String,
//!     tags: serde_json::Value,
//! }
//!
//! impl Entity for User {
//!     type Key = u32;
//!     const NAME: &'static str = "User";
//!
//!     fn key(&self) -> u32 {
//!         self.id
//!     }
//!
//!     fn schema() -> Schema<Self> {
//!         Schema::builder(Self::NAME)
//!             .property("id", |u: &User| u.id)
//!             .property("name", |u: &User| u.name.clone())
//!             .property("tags", |u: &User| u.tags.clone())
//!             .build()
//!     }
//! }
//!
//! let schema = User::schema();
//! assert!(schema.resolve("name").is_ok());
//! assert!(schema.resolve("email").is_err()); // UnknownProperty
//! assert!(schema.resolve("tags").is_err()); // NotOrderable
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::RepositoryError;
use super::relation::RelationLoader;
use super::traits::RepositoryResult;
use super::value::{FieldType, Value, ValueKind};

/// A record type managed by a repository
///
/// Entities are owned by the application. The repository only reads them
/// through their key, their schema, and (for partial updates) their serde
/// representation.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Unique identifier of one entity within its collection
    type Key: Clone + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Entity name used in errors and logs (e.g., "User")
    const NAME: &'static str;

    /// The key of this instance
    fn key(&self) -> Self::Key;

    /// Declared properties of this entity type
    fn schema() -> Schema<Self>;
}

/// How property names are matched during resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropertyCase {
    /// Names must match exactly
    #[default]
    Sensitive,
    /// Exact match first, then a unique ASCII case-insensitive match
    Insensitive,
}

/// Typed accessor for one declared property
pub struct Accessor<T> {
    name: Arc<str>,
    kind: ValueKind,
    getter: Arc<dyn Fn(&T) -> Value + Send + Sync>,
}

impl<T> Accessor<T> {
    /// Property name as declared
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of values this property produces
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Extract this property's value from an entity
    pub fn get(&self, item: &T) -> Value {
        (self.getter)(item)
    }
}

impl<T> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            kind: self.kind,
            getter: Arc::clone(&self.getter),
        }
    }
}

impl<T> fmt::Debug for Accessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Property and relation catalogue for one entity type
pub struct Schema<T> {
    entity: &'static str,
    properties: Vec<Accessor<T>>,
    relations: BTreeMap<String, Arc<dyn RelationLoader<T>>>,
    case: PropertyCase,
}

impl<T> Clone for Schema<T> {
    fn clone(&self) -> Self {
        Self {
            entity: self.entity,
            properties: self.properties.clone(),
            relations: self.relations.clone(),
            case: self.case,
        }
    }
}

impl<T> fmt::Debug for Schema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("entity", &self.entity)
            .field("properties", &self.properties)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .field("case", &self.case)
            .finish()
    }
}

impl<T: 'static> Schema<T> {
    /// Start declaring the schema of an entity type
    pub fn builder(entity: &'static str) -> SchemaBuilder<T> {
        SchemaBuilder {
            entity,
            properties: Vec::new(),
        }
    }

    /// Entity name
    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// Declared properties, in declaration order
    pub fn properties(&self) -> impl Iterator<Item = &Accessor<T>> {
        self.properties.iter()
    }

    /// Property name matching mode
    pub fn case(&self) -> PropertyCase {
        self.case
    }

    /// Change the property name matching mode
    #[must_use]
    pub fn with_case(mut self, case: PropertyCase) -> Self {
        self.set_case(case);
        self
    }

    /// Change the property name matching mode in place
    pub fn set_case(&mut self, case: PropertyCase) {
        self.case = case;
    }

    /// Register a relation that include hints can name
    ///
    /// Registering a name twice replaces the earlier loader.
    pub fn register_relation(
        &mut self,
        name: impl Into<String>,
        loader: Arc<dyn RelationLoader<T>>,
    ) {
        self.relations.insert(name.into(), loader);
    }

    /// Whether a relation with this name is registered
    pub fn has_relation(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    /// Look up a registered relation
    ///
    /// # Errors
    ///
    /// `UnknownRelation` if nothing is registered under `name`.
    pub fn relation(&self, name: &str) -> RepositoryResult<Arc<dyn RelationLoader<T>>> {
        self.relations
            .get(name)
            .cloned()
            .ok_or_else(|| RepositoryError::unknown_relation(self.entity, name))
    }

    /// Resolve a property name to an orderable accessor
    ///
    /// Resolution is case-sensitive unless the schema was switched to
    /// [`PropertyCase::Insensitive`].
    ///
    /// # Errors
    ///
    /// - `UnknownProperty` if no property matches (or an insensitive match is ambiguous)
    /// - `NotOrderable` if the property's kind has no order
    pub fn resolve(&self, name: &str) -> RepositoryResult<Accessor<T>> {
        let accessor = self.lookup(name)?;
        if !accessor.kind.is_orderable() {
            return Err(RepositoryError::not_orderable(self.entity, name, accessor.kind));
        }
        Ok(accessor.clone())
    }

    /// Resolve a property name without requiring it to be orderable
    ///
    /// Used for filter conditions, where equality on any kind is meaningful.
    pub fn property(&self, name: &str) -> RepositoryResult<Accessor<T>> {
        self.lookup(name).cloned()
    }

    fn lookup(&self, name: &str) -> RepositoryResult<&Accessor<T>> {
        if let Some(accessor) = self.properties.iter().find(|p| &*p.name == name) {
            return Ok(accessor);
        }

        if self.case == PropertyCase::Insensitive {
            let mut matches = self
                .properties
                .iter()
                .filter(|p| p.name.eq_ignore_ascii_case(name));
            if let (Some(accessor), None) = (matches.next(), matches.next()) {
                return Ok(accessor);
            }
        }

        Err(RepositoryError::unknown_property(self.entity, name))
    }
}

/// Builder returned by [`Schema::builder`]
pub struct SchemaBuilder<T> {
    entity: &'static str,
    properties: Vec<Accessor<T>>,
}

impl<T: 'static> SchemaBuilder<T> {
    /// Declare a property backed by a getter
    ///
    /// The property kind comes from the getter's return type. Declaring the
    /// same name twice replaces the earlier declaration.
    #[must_use]
    pub fn property<F, G>(mut self, name: &str, getter: G) -> Self
    where
        F: FieldType,
        G: Fn(&T) -> F + Send + Sync + 'static,
    {
        let accessor = Accessor {
            name: Arc::from(name),
            kind: F::KIND,
            getter: Arc::new(move |item: &T| getter(item).into()),
        };
        match self.properties.iter_mut().find(|p| &*p.name == name) {
            Some(existing) => *existing = accessor,
            None => self.properties.push(accessor),
        }
        self
    }

    /// Finish the schema
    pub fn build(self) -> Schema<T> {
        Schema {
            entity: self.entity,
            properties: self.properties,
            relations: BTreeMap::new(),
            case: PropertyCase::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryErrorKind;

    struct Row {
        name: String,
        age: Option<i64>,
        meta: serde_json::Value,
    }

    fn schema() -> Schema<Row> {
        Schema::builder("Row")
            .property("name", |r: &Row| r.name.clone())
            .property("age", |r: &Row| r.age)
            .property("meta", |r: &Row| r.meta.clone())
            .build()
    }

    fn row() -> Row {
        Row {
            name: "ada".to_string(),
            age: None,
            meta: serde_json::json!({ "k": 1 }),
        }
    }

    #[test]
    fn test_resolve_known_property() {
        let accessor = schema().resolve("name").unwrap();
        assert_eq!(accessor.name(), "name");
        assert_eq!(accessor.kind(), ValueKind::String);
        assert_eq!(accessor.get(&row()), Value::from("ada"));
    }

    #[test]
    fn test_optional_property_yields_null() {
        let accessor = schema().resolve("age").unwrap();
        assert_eq!(accessor.kind(), ValueKind::Integer);
        assert!(accessor.get(&row()).is_null());
    }

    #[test]
    fn test_wide_and_narrow_integers_resolve() {
        struct Counter {
            hits: u64,
            slot: u8,
            since: chrono::NaiveDate,
        }

        let schema = Schema::builder("Counter")
            .property("hits", |c: &Counter| c.hits)
            .property("slot", |c: &Counter| c.slot)
            .property("since", |c: &Counter| c.since)
            .build();
        let counter = Counter {
            hits: u64::MAX,
            slot: 3,
            since: chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        };

        let hits = schema.resolve("hits").unwrap();
        assert_eq!(hits.kind(), ValueKind::Integer);
        assert_eq!(hits.get(&counter), Value::Unsigned(u64::MAX));
        assert_eq!(schema.resolve("slot").unwrap().get(&counter), Value::Integer(3));
        assert_eq!(schema.resolve("since").unwrap().kind(), ValueKind::Date);
    }

    #[test]
    fn test_unknown_property() {
        let err = schema().resolve("email").unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::UnknownProperty);
        assert_eq!(err.entity_type.as_deref(), Some("Row"));
    }

    #[test]
    fn test_json_property_is_not_orderable() {
        let err = schema().resolve("meta").unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NotOrderable);
        // still usable as a plain property
        assert!(schema().property("meta").is_ok());
    }

    #[test]
    fn test_resolution_is_case_sensitive_by_default() {
        let err = schema().resolve("Name").unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::UnknownProperty);
    }

    #[test]
    fn test_case_insensitive_resolution() {
        let schema = schema().with_case(PropertyCase::Insensitive);
        assert_eq!(schema.resolve("NAME").unwrap().name(), "name");
    }

    #[test]
    fn test_case_insensitive_ambiguity_is_unknown() {
        let schema = Schema::builder("Row")
            .property("name", |r: &Row| r.name.clone())
            .property("Name", |r: &Row| r.name.clone())
            .build()
            .with_case(PropertyCase::Insensitive);
        assert!(schema.resolve("Name").is_ok());
        let err = schema.resolve("NAME").unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::UnknownProperty);
    }

    #[test]
    fn test_redeclaring_replaces() {
        let schema = Schema::builder("Row")
            .property("name", |r: &Row| r.name.clone())
            .property("name", |r: &Row| r.name.len() as i64)
            .build();
        assert_eq!(schema.properties().count(), 1);
        assert_eq!(schema.resolve("name").unwrap().kind(), ValueKind::Integer);
    }

    #[test]
    fn test_unknown_relation() {
        let err = match schema().relation("orders") {
            Ok(_) => panic!("relation should not exist"),
            Err(err) => err,
        };
        assert_eq!(err.kind, RepositoryErrorKind::UnknownRelation);
    }
}
