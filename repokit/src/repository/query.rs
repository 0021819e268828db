//! Incremental query builder
//!
//! [`Query`] composes the same plan as
//! [`QueryRepository::get_paged`](crate::repository::QueryRepository::get_paged),
//! one step at a time. Include names and the sort property are checked as
//! they are added; the first bad name is held and returned by the terminal
//! call (`to_vec`, `first`, `count`, `any` or `plan`) before any storage is
//! touched. On a repository taking part in a unit of work, that error rolls
//! the open scope back like any other failed call.
//!
//! ```rust,ignore
//! let page = repo
//!     .query()
//!     .filter(Filter::new(|u: &User| u.active))
//!     .include("orders")
//!     .order_by("name", OrderDirection::Descending)
//!     .page(2, 25)
//!     .select(Projection::new(|u: &User| u.name.clone()))
//!     .to_vec()
//!     .await?;
//! ```

use std::fmt;

use super::error::{RepositoryError, RepositoryOperation};
use super::expr::{Filter, Projection};
use super::pagination::{OrderDirection, PagedOptions};
use super::plan::{compose, QueryPlan};
use super::repo::EntityRepository;
use super::schema::Entity;
use super::store::Store;
use super::traits::RepositoryResult;

/// Query under construction, created by [`EntityRepository::query`]
pub struct Query<'r, T: Entity, S, R = T> {
    repo: &'r EntityRepository<T, S>,
    filter: Option<Filter<T>>,
    includes: Vec<String>,
    sort: Option<(String, OrderDirection)>,
    page: Option<(u32, u32)>,
    projection: Projection<T, R>,
    error: Option<RepositoryError>,
}

impl<T: Entity, S, R> fmt::Debug for Query<'_, T, S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("entity", &T::NAME)
            .field("filter", &self.filter.is_some())
            .field("includes", &self.includes)
            .field("sort", &self.sort)
            .field("page", &self.page)
            .field("error", &self.error)
            .finish()
    }
}

impl<'r, T, S> Query<'r, T, S>
where
    T: Entity,
    S: Store<T> + Clone + 'static,
{
    pub(crate) fn new(repo: &'r EntityRepository<T, S>) -> Self {
        Self {
            repo,
            filter: None,
            includes: Vec::new(),
            sort: None,
            page: None,
            projection: Projection::identity(),
            error: None,
        }
    }
}

impl<'r, T, S, R> Query<'r, T, S, R>
where
    T: Entity,
    S: Store<T> + Clone + 'static,
    R: Send + 'static,
{
    /// Narrow the result; repeated calls are and-combined
    #[must_use]
    pub fn filter(mut self, filter: Filter<T>) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Expand a registered relation before filtering
    ///
    /// An unregistered `name` is held as `UnknownRelation` for the terminal call.
    #[must_use]
    pub fn include(mut self, name: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.repo.schema().relation(name) {
            Ok(_) if self.includes.iter().any(|existing| existing == name) => {}
            Ok(_) => self.includes.push(name.to_string()),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Sort by a declared property
    ///
    /// A blank name is held as `InvalidSortProperty`, any other bad name as
    /// the resolution error of
    /// [`Schema::resolve`](crate::repository::Schema::resolve).
    #[must_use]
    pub fn order_by(mut self, property: &str, direction: OrderDirection) -> Self {
        if self.error.is_some() {
            return self;
        }
        let resolved = if property.trim().is_empty() {
            Err(RepositoryError::invalid_sort_property(
                T::NAME,
                "sort property must not be empty",
            ))
        } else {
            self.repo.schema().resolve(property).map(|_| ())
        };
        match resolved {
            Ok(()) => self.sort = Some((property.to_string(), direction)),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Select one page; `index` is 1-based
    #[must_use]
    pub fn page(mut self, index: u32, size: u32) -> Self {
        self.page = Some((index, size));
        self
    }

    /// Map each returned entity through `projection`
    pub fn select<R2: Send + 'static>(self, projection: Projection<T, R2>) -> Query<'r, T, S, R2> {
        Query {
            repo: self.repo,
            filter: self.filter,
            includes: self.includes,
            sort: self.sort,
            page: self.page,
            projection,
            error: self.error,
        }
    }

    /// Compose the plan without running it
    ///
    /// # Errors
    ///
    /// The first error held by `include` or `order_by`, otherwise
    /// composition errors.
    pub fn plan(self) -> RepositoryResult<QueryPlan<T, R>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let direction = self.sort.as_ref().map_or(OrderDirection::Ascending, |(_, d)| *d);
        let (index, size) = self.page.unwrap_or((1, 1));
        let options = match direction {
            OrderDirection::Ascending => PagedOptions::new(),
            OrderDirection::Descending => PagedOptions::new().descending(),
        }
        .with_index(index)
        .with_size(size);
        let includes: Vec<&str> = self.includes.iter().map(String::as_str).collect();

        let mut plan = compose(
            self.repo.schema(),
            &includes,
            self.filter,
            self.projection,
            self.sort.as_ref().map(|(name, _)| name.as_str()),
            Some(options),
        )?;
        if self.page.is_none() {
            plan.window = None;
        }
        Ok(plan)
    }

    /// Run the query
    pub async fn to_vec(self) -> RepositoryResult<Vec<R>> {
        let operation = if self.page.is_some() {
            RepositoryOperation::GetPaged
        } else {
            RepositoryOperation::GetAll
        };
        let repo = self.repo;
        repo.run(operation, self.plan()).await
    }

    /// First result of the query
    ///
    /// # Errors
    ///
    /// `NotFound` if the query selects nothing.
    pub async fn first(self) -> RepositoryResult<R> {
        let skip = self.page.map_or(0, |(index, size)| index.max(1).saturating_sub(1).saturating_mul(size.max(1)));
        let repo = self.repo;
        let plan = self.page(skip.saturating_add(1), 1).plan();
        repo.run_one(RepositoryOperation::GetOne, plan).await
    }

    /// Number of entities matching the filter; includes, sort and page are ignored
    pub async fn count(self) -> RepositoryResult<u64> {
        match self.error {
            Some(err) => self.repo.reject(err).await,
            None => self.repo.tally(RepositoryOperation::Count, self.filter.as_ref()).await,
        }
    }

    /// Whether any entity matches the filter
    pub async fn any(self) -> RepositoryResult<bool> {
        let found = match self.error {
            Some(err) => self.repo.reject(err).await?,
            None => self.repo.tally(RepositoryOperation::Any, self.filter.as_ref()).await?,
        };
        Ok(found > 0)
    }
}
