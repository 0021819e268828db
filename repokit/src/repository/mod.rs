//! Generic repositories with a dynamic paged-query engine
//!
//! This module provides one repository contract for every entity type, a
//! query engine that sorts by property *name* at runtime, and a unit of work
//! that groups writes across repositories into one transaction.
//!
//! # Features
//!
//! - **Property resolution**: [`Schema`] maps names to typed [`Accessor`]s
//! - **Dynamic paging**: [`QueryRepository::get_paged`] filters, sorts by a
//!   named property and windows the result with [`PagedOptions`]
//! - **Projections**: the `*_as` variants map entities into any result type
//! - **Relation loading**: [`HasMany`] and [`BelongsTo`] batch-load related
//!   entities named by include hints
//! - **Unit of work**: [`UnitOfWork`] stages writes and commits them
//!   atomically at an [`IsolationLevel`]
//! - **Blocking and non-blocking**: every operation is async;
//!   [`Blocking`] and [`BlockingUnitOfWork`] provide the blocking forms
//!
//! # Example
//!
//! ```rust,ignore
//! use repokit::repository::{
//!     CommandRepository, EntityRepository, IsolationLevel, MemoryDatabase,
//!     PagedOptions, QueryRepository, UnitOfWork,
//! };
//!
//! let db = MemoryDatabase::new();
//! let uow = UnitOfWork::new(db.clone());
//! let users = uow.repository(db.table::<User>());
//!
//! uow.open_transaction(IsolationLevel::ReadCommitted).await?;
//! users.add(User::new(1, "ada")).await?;
//! users.update_partial(&1, Patch::new().set("name", "Ada")).await?;
//! uow.save().await?;
//!
//! let page = users
//!     .get_paged("name", None, Some(PagedOptions::new().with_size(10)), &[])
//!     .await?;
//! ```

mod blocking;
mod engine;
mod error;
mod expr;
#[cfg(feature = "memory")]
mod memory;
mod pagination;
mod patch;
mod plan;
mod query;
mod relation;
mod repo;
mod schema;
mod store;
mod traits;
mod unit_of_work;
mod value;

// Re-export all public types
pub use blocking::{Blocking, BlockingUnitOfWork};
pub use error::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
pub use expr::{Filter, FilterCondition, FilterOperator, Projection};
#[cfg(feature = "memory")]
pub use memory::{MemoryDatabase, MemoryTable};
pub use pagination::{OrderDirection, PagedOptions, Window, DEFAULT_PAGE_SIZE};
pub use patch::Patch;
pub use plan::{compose, QueryPlan};
pub use query::Query;
pub use relation::{BelongsTo, HasMany, RelationLoader};
pub use repo::EntityRepository;
pub use schema::{Accessor, Entity, PropertyCase, Schema, SchemaBuilder};
pub use store::{IsolationLevel, Store, TransactionManager, TxToken};
pub use traits::{CommandRepository, QueryRepository, Repository, RepositoryResult};
pub use unit_of_work::UnitOfWork;
pub use value::{FieldType, Value, ValueKind};
