//! Repository trait definitions
//!
//! This module provides the generic query and command contracts using RPITIT
//! (Return Position Impl Trait In Traits), available since Rust 1.75.
//!
//! # Overview
//!
//! - [`QueryRepository`]: reads, including the dynamic paged query
//! - [`CommandRepository`]: writes, staged or autocommitted depending on the
//!   unit-of-work scope
//! - [`Repository`]: both, implemented automatically
//!
//! Every method is non-blocking. The blocking forms live on
//! [`Blocking`](crate::repository::Blocking) and drive these same futures.
//!
//! # Example
//!
//! ```rust,ignore
//! use repokit::repository::{Filter, QueryRepository, PagedOptions};
//!
//! async fn oldest_first(repo: &impl QueryRepository<User>) -> RepositoryResult<Vec<User>> {
//!     repo.get_paged(
//!         "age",
//!         Some(Filter::new(|u: &User| u.active)),
//!         Some(PagedOptions::new().descending().with_size(10)),
//!         &[],
//!     )
//!     .await
//! }
//! ```

use std::future::Future;

use super::error::RepositoryError;
use super::expr::{Filter, Projection};
use super::pagination::PagedOptions;
use super::patch::Patch;
use super::schema::Entity;

/// Result type for repository operations
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Read operations over one entity type
///
/// Inside an open unit-of-work scope, reads observe the scope's own pending
/// writes. Outside one, they read committed storage.
pub trait QueryRepository<T: Entity>: Send + Sync {
    /// First entity matching `filter`, in storage order
    ///
    /// # Errors
    ///
    /// `NotFound` if nothing matches, `UnknownRelation` for a bad include.
    fn get_one(
        &self,
        filter: Filter<T>,
        includes: &[&str],
    ) -> impl Future<Output = RepositoryResult<T>> + Send;

    /// First entity matching `filter` (if any), mapped through `projection`
    fn get_one_as<R: Send + 'static>(
        &self,
        projection: Projection<T, R>,
        filter: Option<Filter<T>>,
        includes: &[&str],
    ) -> impl Future<Output = RepositoryResult<R>> + Send;

    /// Every entity matching `filter`, in storage order
    fn get_all(
        &self,
        filter: Option<Filter<T>>,
        includes: &[&str],
    ) -> impl Future<Output = RepositoryResult<Vec<T>>> + Send;

    /// Every entity matching `filter`, mapped through `projection`
    fn get_all_as<R: Send + 'static>(
        &self,
        projection: Projection<T, R>,
        filter: Option<Filter<T>>,
        includes: &[&str],
    ) -> impl Future<Output = RepositoryResult<Vec<R>>> + Send;

    /// One page of entities ordered by the property named `sort_property`
    ///
    /// `options` defaults to the first page, ascending, configured page size.
    /// Ties keep storage order in both directions.
    ///
    /// # Errors
    ///
    /// - `InvalidSortProperty` if `sort_property` is blank
    /// - `UnknownProperty` / `NotOrderable` if it does not resolve
    fn get_paged(
        &self,
        sort_property: &str,
        filter: Option<Filter<T>>,
        options: Option<PagedOptions>,
        includes: &[&str],
    ) -> impl Future<Output = RepositoryResult<Vec<T>>> + Send;

    /// One page of projected results
    fn get_paged_as<R: Send + 'static>(
        &self,
        projection: Projection<T, R>,
        sort_property: &str,
        filter: Option<Filter<T>>,
        options: Option<PagedOptions>,
        includes: &[&str],
    ) -> impl Future<Output = RepositoryResult<Vec<R>>> + Send;

    /// Entity with the given key
    ///
    /// # Errors
    ///
    /// `NotFound` if no entity has this key.
    fn find(&self, key: &T::Key) -> impl Future<Output = RepositoryResult<T>> + Send;

    /// Whether any entity matches `filter` (any entity at all if `None`)
    fn any(&self, filter: Option<Filter<T>>) -> impl Future<Output = RepositoryResult<bool>> + Send;

    /// Number of entities matching `filter` (all entities if `None`)
    fn count(&self, filter: Option<Filter<T>>) -> impl Future<Output = RepositoryResult<u64>> + Send;
}

/// Write operations over one entity type
///
/// Inside an open unit-of-work scope, writes are validated immediately and
/// staged until `save`. A failing write rolls the whole scope back. Outside a
/// scope, each call commits on its own.
pub trait CommandRepository<T: Entity>: Send + Sync {
    /// Insert one entity
    ///
    /// # Errors
    ///
    /// `DuplicateKey` if the key is already present.
    fn add(&self, item: T) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Insert several entities, all or nothing
    fn add_range(&self, items: Vec<T>) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Replace the entity stored under `key`
    ///
    /// # Errors
    ///
    /// `NotFound` if `key` is absent, `InvalidPatch` if `item` carries a
    /// different key.
    fn update(&self, key: &T::Key, item: T) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Merge the fields present in `patch` into the entity stored under `key`
    ///
    /// # Errors
    ///
    /// `NotFound` if `key` is absent, `InvalidPatch` if the patch names an
    /// unknown field, has the wrong shape, or changes the key.
    fn update_partial(&self, key: &T::Key, patch: Patch) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Remove the entity stored under `key`
    ///
    /// # Errors
    ///
    /// `NotFound` if `key` is absent.
    fn delete(&self, key: &T::Key) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Remove every entity matching `filter`, returning how many were removed
    ///
    /// Matching nothing is not an error.
    fn delete_where(&self, filter: Filter<T>) -> impl Future<Output = RepositoryResult<u64>> + Send;
}

/// Full repository contract
pub trait Repository<T: Entity>: QueryRepository<T> + CommandRepository<T> {}

impl<T: Entity, R> Repository<T> for R where R: QueryRepository<T> + CommandRepository<T> {}
