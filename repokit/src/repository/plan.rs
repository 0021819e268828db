//! Query composition
//!
//! [`compose`] validates a query against the entity schema and produces a
//! [`QueryPlan`]: a fixed pipeline of includes, filter, stable sort,
//! projection, and paging window. Composition never touches storage, so every
//! naming mistake surfaces before a row is read.

use std::fmt;
use std::sync::Arc;

use super::error::RepositoryError;
use super::expr::{Filter, Projection};
use super::pagination::{OrderDirection, PagedOptions, Window};
use super::relation::RelationLoader;
use super::schema::{Accessor, Entity, Schema};
use super::traits::RepositoryResult;

/// Resolved sort key
pub(crate) struct SortKey<T> {
    pub(crate) accessor: Accessor<T>,
    pub(crate) direction: OrderDirection,
}

/// A validated, not yet executed query
///
/// Plans are consumed by execution and are not reusable.
pub struct QueryPlan<T, R = T> {
    pub(crate) entity: &'static str,
    pub(crate) includes: Vec<(String, Arc<dyn RelationLoader<T>>)>,
    pub(crate) filter: Option<Filter<T>>,
    pub(crate) sort: Option<SortKey<T>>,
    pub(crate) projection: Projection<T, R>,
    pub(crate) window: Option<Window>,
}

impl<T, R> QueryPlan<T, R> {
    /// Entity the plan reads
    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// Relations expanded before filtering, in request order
    pub fn includes(&self) -> impl Iterator<Item = &str> {
        self.includes.iter().map(|(name, _)| name.as_str())
    }

    /// Whether the plan filters rows
    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    /// Resolved sort property and direction
    pub fn sort(&self) -> Option<(&str, OrderDirection)> {
        self.sort.as_ref().map(|s| (s.accessor.name(), s.direction))
    }

    /// Paging window applied after sorting
    pub fn window(&self) -> Option<Window> {
        self.window
    }
}

impl<T, R> fmt::Debug for QueryPlan<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPlan")
            .field("entity", &self.entity)
            .field("includes", &self.includes().collect::<Vec<_>>())
            .field("filter", &self.filter)
            .field("sort", &self.sort())
            .field("window", &self.window)
            .finish()
    }
}

/// Validate a query and build its plan
///
/// - every include must name a relation registered on `schema` (duplicates
///   load once)
/// - `sort_property`, when given, must be non-blank and resolve to an
///   orderable property; its direction comes from `options`
/// - `options`, when given, select the paging window after clamping
///
/// # Errors
///
/// `UnknownRelation`, `InvalidSortProperty`, `UnknownProperty`, or
/// `NotOrderable`. Nothing is read from storage either way.
pub fn compose<T: Entity, R: 'static>(
    schema: &Schema<T>,
    includes: &[&str],
    filter: Option<Filter<T>>,
    projection: Projection<T, R>,
    sort_property: Option<&str>,
    options: Option<PagedOptions>,
) -> RepositoryResult<QueryPlan<T, R>> {
    let mut loaders: Vec<(String, Arc<dyn RelationLoader<T>>)> = Vec::with_capacity(includes.len());
    for name in includes {
        if loaders.iter().any(|(existing, _)| existing == name) {
            continue;
        }
        loaders.push((name.to_string(), schema.relation(name)?));
    }

    let options = options.map(|o| o.normalized(None));

    let sort = match sort_property {
        None => None,
        Some(name) if name.trim().is_empty() => {
            return Err(RepositoryError::invalid_sort_property(
                schema.entity(),
                "sort property must not be empty",
            ))
        }
        Some(name) => Some(SortKey {
            accessor: schema.resolve(name)?,
            direction: options.map_or(OrderDirection::Ascending, |o| o.direction()),
        }),
    };

    Ok(QueryPlan {
        entity: schema.entity(),
        includes: loaders,
        filter,
        sort,
        projection,
        window: options.map(|o| o.window()),
    })
}
