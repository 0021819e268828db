//! Repository error types
//!
//! Every repository, query and unit-of-work operation reports failures as a
//! [`RepositoryError`]: the operation that failed, a [`RepositoryErrorKind`]
//! callers can match on, a message, and the entity involved when known.
//!
//! Absence is only an error for single-item lookups and key-based mutations.
//! Bulk reads and `delete_where` return empty results instead.
//!
//! # Example
//!
//! ```rust
//! use repokit::repository::{RepositoryError, RepositoryErrorKind};
//!
//! let error = RepositoryError::not_found("User", "usr_123");
//! assert!(matches!(error.kind, RepositoryErrorKind::NotFound));
//! assert!(error.entity_id.is_some());
//! ```

use std::fmt;

/// Operation being performed when the repository error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    /// Fetching exactly one entity by predicate
    GetOne,
    /// Fetching every entity matching a predicate
    GetAll,
    /// Fetching one sorted page
    GetPaged,
    /// Looking up an entity by key
    Find,
    /// Checking whether any entity matches
    Any,
    /// Counting matching entities
    Count,
    /// Building a query plan
    Compose,
    /// Expanding an include hint
    Include,
    /// Inserting one entity
    Add,
    /// Inserting several entities
    AddRange,
    /// Replacing an entity
    Update,
    /// Merging a patch into an entity
    UpdatePartial,
    /// Deleting an entity by key
    Delete,
    /// Deleting every entity matching a predicate
    DeleteWhere,
    /// Opening a transaction scope
    OpenTransaction,
    /// Committing a transaction scope
    Save,
    /// Rolling back a transaction scope
    Rollback,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetOne => write!(f, "get_one"),
            Self::GetAll => write!(f, "get_all"),
            Self::GetPaged => write!(f, "get_paged"),
            Self::Find => write!(f, "find"),
            Self::Any => write!(f, "any"),
            Self::Count => write!(f, "count"),
            Self::Compose => write!(f, "compose"),
            Self::Include => write!(f, "include"),
            Self::Add => write!(f, "add"),
            Self::AddRange => write!(f, "add_range"),
            Self::Update => write!(f, "update"),
            Self::UpdatePartial => write!(f, "update_partial"),
            Self::Delete => write!(f, "delete"),
            Self::DeleteWhere => write!(f, "delete_where"),
            Self::OpenTransaction => write!(f, "open_transaction"),
            Self::Save => write!(f, "save"),
            Self::Rollback => write!(f, "rollback"),
        }
    }
}

/// Category of repository error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// Key or unique lookup miss
    NotFound,
    /// Insert collided with an existing key
    DuplicateKey,
    /// Property name does not exist on the entity
    UnknownProperty,
    /// Property exists but its values cannot be ordered
    NotOrderable,
    /// Sort property is required but missing or blank
    InvalidSortProperty,
    /// Patch references unknown fields or does not fit the entity
    InvalidPatch,
    /// Include hint names a relation that is not registered
    UnknownRelation,
    /// A transaction scope is already open on this unit of work
    TransactionAlreadyOpen,
    /// No transaction scope is open on this unit of work
    NoOpenTransaction,
    /// Transient failure reported by the storage collaborator
    StorageUnavailable,
    /// Other unclassified error
    Other,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::DuplicateKey => write!(f, "duplicate_key"),
            Self::UnknownProperty => write!(f, "unknown_property"),
            Self::NotOrderable => write!(f, "not_orderable"),
            Self::InvalidSortProperty => write!(f, "invalid_sort_property"),
            Self::InvalidPatch => write!(f, "invalid_patch"),
            Self::UnknownRelation => write!(f, "unknown_relation"),
            Self::TransactionAlreadyOpen => write!(f, "transaction_already_open"),
            Self::NoOpenTransaction => write!(f, "no_open_transaction"),
            Self::StorageUnavailable => write!(f, "storage_unavailable"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Structured repository error with operation context
///
/// # Example
///
/// ```rust
/// use repokit::repository::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
///
/// let error = RepositoryError::duplicate_key("User", "usr_abc123");
/// assert_eq!(error.kind, RepositoryErrorKind::DuplicateKey);
/// assert_eq!(
///     error.to_string(),
///     "Repository duplicate_key error during add: Entity already exists [User: usr_abc123]"
/// );
/// assert!(!error.is_retriable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    /// The operation being performed when the error occurred
    pub operation: RepositoryOperation,
    /// The category of error
    pub kind: RepositoryErrorKind,
    /// Human-readable error message
    pub message: String,
    /// The type of entity involved (e.g., "User", "Order")
    pub entity_type: Option<String>,
    /// The key of the entity involved
    pub entity_id: Option<String>,
}

impl RepositoryError {
    /// Create a new repository error
    pub fn new(
        operation: RepositoryOperation,
        kind: RepositoryErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Create a "not found" error with entity context
    ///
    /// ```rust
    /// use repokit::repository::RepositoryError;
    ///
    /// let error = RepositoryError::not_found("User", "usr_123");
    /// assert_eq!(error.entity_type, Some("User".to_string()));
    /// ```
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Find,
            RepositoryErrorKind::NotFound,
            "Entity not found",
        )
        .with_entity(entity_type, entity_id)
    }

    /// Create a "no entity matched" error for predicate lookups
    pub fn no_match(entity_type: impl Into<String>) -> Self {
        let mut error = Self::new(
            RepositoryOperation::GetOne,
            RepositoryErrorKind::NotFound,
            "No entity matched the filter",
        );
        error.entity_type = Some(entity_type.into());
        error
    }

    /// Create a duplicate key error with entity context
    pub fn duplicate_key(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Add,
            RepositoryErrorKind::DuplicateKey,
            "Entity already exists",
        )
        .with_entity(entity_type, entity_id)
    }

    /// Create an unknown property error
    pub fn unknown_property(entity_type: impl Into<String>, property: &str) -> Self {
        let mut error = Self::new(
            RepositoryOperation::Compose,
            RepositoryErrorKind::UnknownProperty,
            format!("Property '{}' does not exist", property),
        );
        error.entity_type = Some(entity_type.into());
        error
    }

    /// Create a not orderable error
    pub fn not_orderable(
        entity_type: impl Into<String>,
        property: &str,
        kind: impl fmt::Display,
    ) -> Self {
        let mut error = Self::new(
            RepositoryOperation::Compose,
            RepositoryErrorKind::NotOrderable,
            format!("Property '{}' of kind {} cannot be ordered", property, kind),
        );
        error.entity_type = Some(entity_type.into());
        error
    }

    /// Create an invalid sort property error
    pub fn invalid_sort_property(entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        let mut error = Self::new(
            RepositoryOperation::Compose,
            RepositoryErrorKind::InvalidSortProperty,
            message,
        );
        error.entity_type = Some(entity_type.into());
        error
    }

    /// Create an invalid patch error
    pub fn invalid_patch(entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        let mut error = Self::new(
            RepositoryOperation::UpdatePartial,
            RepositoryErrorKind::InvalidPatch,
            message,
        );
        error.entity_type = Some(entity_type.into());
        error
    }

    /// Create an unknown relation error
    pub fn unknown_relation(entity_type: impl Into<String>, relation: &str) -> Self {
        let mut error = Self::new(
            RepositoryOperation::Include,
            RepositoryErrorKind::UnknownRelation,
            format!("Relation '{}' is not registered", relation),
        );
        error.entity_type = Some(entity_type.into());
        error
    }

    /// Create a "transaction already open" error
    pub fn transaction_already_open() -> Self {
        Self::new(
            RepositoryOperation::OpenTransaction,
            RepositoryErrorKind::TransactionAlreadyOpen,
            "A transaction is already open on this unit of work",
        )
    }

    /// Create a "no open transaction" error
    pub fn no_open_transaction(operation: RepositoryOperation) -> Self {
        Self::new(
            operation,
            RepositoryErrorKind::NoOpenTransaction,
            "No transaction is open",
        )
    }

    /// Create a storage unavailable error
    ///
    /// ```rust
    /// use repokit::repository::{RepositoryError, RepositoryOperation};
    ///
    /// let error = RepositoryError::storage_unavailable(RepositoryOperation::Count, "store offline");
    /// assert!(error.is_retriable());
    /// ```
    pub fn storage_unavailable(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::StorageUnavailable, message)
    }

    /// Add entity context to an existing error
    #[must_use]
    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Set the operation that caused the error
    #[must_use]
    pub fn with_operation(mut self, operation: RepositoryOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Whether this is a `NotFound` error
    pub fn is_not_found(&self) -> bool {
        self.kind == RepositoryErrorKind::NotFound
    }

    /// Check if this error is retriable (transient errors that may succeed on retry)
    ///
    /// The repository never retries on its own; this only informs callers.
    pub fn is_retriable(&self) -> bool {
        matches!(self.kind, RepositoryErrorKind::StorageUnavailable)
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Repository {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        match (&self.entity_type, &self.entity_id) {
            (Some(entity_type), Some(entity_id)) => write!(f, " [{}: {}]", entity_type, entity_id)?,
            (Some(entity_type), None) => write!(f, " [{}]", entity_type)?,
            _ => {}
        }
        Ok(())
    }
}

impl std::error::Error for RepositoryError {}
