//! Paged query execution
//!
//! Runs a [`QueryPlan`] against a row source in a fixed order:
//!
//! 1. fetch rows (the filter is pushed down to the source when no include
//!    needs to run first)
//! 2. expand includes, one batch load per relation
//! 3. filter, if not already pushed down
//! 4. stable sort on the resolved key
//! 5. skip/take the paging window
//! 6. project the surviving rows
//!
//! Rows outside the window are never projected.

use std::future::Future;

use super::error::RepositoryOperation;
use super::expr::Filter;
use super::plan::QueryPlan;
use super::schema::Entity;
use super::store::TxToken;
use super::traits::RepositoryResult;

/// Where a plan reads its rows from
pub(crate) trait RowSource<T: Entity>: Sync {
    /// Rows matching `filter` in storage order, evaluating it once per row
    fn rows(&self, filter: Option<&Filter<T>>) -> impl Future<Output = RepositoryResult<Vec<T>>> + Send;

    /// Storage transaction the rows are read in, if any
    fn tx(&self) -> Option<TxToken>;
}

impl<T: Entity, R: Send + 'static> QueryPlan<T, R> {
    /// Run the plan, consuming it
    pub(crate) async fn execute<S: RowSource<T>>(self, source: &S) -> RepositoryResult<Vec<R>> {
        let QueryPlan {
            entity,
            includes,
            filter,
            sort,
            projection,
            window,
        } = self;

        let mut rows = if includes.is_empty() {
            source.rows(filter.as_ref()).await?
        } else {
            let mut rows = source.rows(None).await?;
            for (name, loader) in &includes {
                loader.load(&mut rows).await.map_err(|e| {
                    tracing::warn!(entity, relation = %name, error = %e, "include failed");
                    e.with_operation(RepositoryOperation::Include)
                })?;
            }
            if let Some(filter) = &filter {
                rows.retain(|row| filter.matches(row));
            }
            rows
        };
        let matched = rows.len();

        if let Some(sort) = sort {
            let mut keyed: Vec<_> = rows.into_iter().map(|row| (sort.accessor.get(&row), row)).collect();
            // `sort_by` is stable, so ties keep storage order in both directions
            keyed.sort_by(|(a, _), (b, _)| sort.direction.apply(a.compare(b)));
            rows = keyed.into_iter().map(|(_, row)| row).collect();
        }

        let (skip, take) = window.map_or((0, usize::MAX), |w| w.bounds());
        let results: Vec<R> = rows
            .iter()
            .skip(skip)
            .take(take)
            .map(|row| projection.apply(row))
            .collect();

        tracing::debug!(
            entity,
            tx = ?source.tx(),
            matched,
            returned = results.len(),
            "query plan executed"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{
        compose, PagedOptions, Projection, RelationLoader, RepositoryError, RepositoryErrorKind, Schema,
    };
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        id: u32,
        name: String,
        age: u32,
        #[serde(skip)]
        pets: Vec<String>,
    }

    impl Entity for Person {
        type Key = u32;
        const NAME: &'static str = "Person";

        fn key(&self) -> u32 {
            self.id
        }

        fn schema() -> Schema<Self> {
            Schema::builder(Self::NAME)
                .property("id", |p: &Person| p.id)
                .property("name", |p: &Person| p.name.clone())
                .property("age", |p: &Person| p.age)
                .build()
        }
    }

    fn person(id: u32, name: &str, age: u32) -> Person {
        Person {
            id,
            name: name.to_string(),
            age,
            pets: vec![],
        }
    }

    struct Rows(Vec<Person>);

    impl RowSource<Person> for Rows {
        async fn rows(&self, filter: Option<&Filter<Person>>) -> RepositoryResult<Vec<Person>> {
            Ok(self
                .0
                .iter()
                .filter(|p| filter.map_or(true, |f| f.matches(p)))
                .cloned()
                .collect())
        }

        fn tx(&self) -> Option<TxToken> {
            None
        }
    }

    // A=30, B=25, C=30, D=40 in key order
    fn people() -> Rows {
        Rows(vec![
            person(1, "A", 30),
            person(2, "B", 25),
            person(3, "C", 30),
            person(4, "D", 40),
        ])
    }

    fn names(rows: &[Person]) -> Vec<&str> {
        rows.iter().map(|p| p.name.as_str()).collect()
    }

    async fn paged(sort: &str, options: PagedOptions) -> Vec<Person> {
        compose(&Person::schema(), &[], None, Projection::identity(), Some(sort), Some(options))
            .unwrap()
            .execute(&people())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ascending_pages() {
        let first = paged("age", PagedOptions::new().with_index(1).with_size(2)).await;
        assert_eq!(names(&first), vec!["B", "A"]);

        let second = paged("age", PagedOptions::new().with_index(2).with_size(2)).await;
        assert_eq!(names(&second), vec!["C", "D"]);
    }

    #[tokio::test]
    async fn test_descending_keeps_tie_order() {
        let rows = paged("age", PagedOptions::new().descending().with_size(3)).await;
        assert_eq!(names(&rows), vec!["D", "A", "C"]);
    }

    #[tokio::test]
    async fn test_page_past_end_is_empty() {
        let rows = paged("age", PagedOptions::new().with_index(3).with_size(2)).await;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_filter_then_sort() {
        let plan = compose(
            &Person::schema(),
            &[],
            Some(Filter::new(|p: &Person| p.age >= 30)),
            Projection::identity(),
            Some("name"),
            Some(PagedOptions::new().descending()),
        )
        .unwrap();
        let rows = plan.execute(&people()).await.unwrap();
        assert_eq!(names(&rows), vec!["D", "C", "A"]);
    }

    #[tokio::test]
    async fn test_filter_evaluated_once_per_row() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let filter = Filter::new(move |_: &Person| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        compose(&Person::schema(), &[], Some(filter), Projection::identity(), None, None)
            .unwrap()
            .execute(&people())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_only_window_rows_are_projected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let projection = Projection::new(move |p: &Person| {
            counter.fetch_add(1, Ordering::SeqCst);
            p.id
        });

        let ids = compose(
            &Person::schema(),
            &[],
            None,
            projection,
            Some("id"),
            Some(PagedOptions::new().with_index(2).with_size(1)),
        )
        .unwrap()
        .execute(&people())
        .await
        .unwrap();

        assert_eq!(ids, vec![2]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct Pets;

    #[async_trait]
    impl RelationLoader<Person> for Pets {
        async fn load(&self, people: &mut [Person]) -> RepositoryResult<()> {
            for person in people.iter_mut() {
                if person.id % 2 == 0 {
                    person.pets.push("cat".to_string());
                }
            }
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl RelationLoader<Person> for Broken {
        async fn load(&self, _people: &mut [Person]) -> RepositoryResult<()> {
            Err(RepositoryError::storage_unavailable(RepositoryOperation::GetAll, "offline"))
        }
    }

    #[tokio::test]
    async fn test_includes_expand_before_filter() {
        let mut schema = Person::schema();
        schema.register_relation("pets", Arc::new(Pets));

        let rows = compose(
            &schema,
            &["pets"],
            Some(Filter::new(|p: &Person| !p.pets.is_empty())),
            Projection::identity(),
            None,
            None,
        )
        .unwrap()
        .execute(&people())
        .await
        .unwrap();

        assert_eq!(names(&rows), vec!["B", "D"]);
    }

    #[tokio::test]
    async fn test_include_failure_propagates() {
        let mut schema = Person::schema();
        schema.register_relation("pets", Arc::new(Broken));

        let err = compose(&schema, &["pets"], None, Projection::identity(), None, None)
            .unwrap()
            .execute(&people())
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::StorageUnavailable);
        assert_eq!(err.operation, RepositoryOperation::Include);
    }
}
