//! The concrete repository
//!
//! [`EntityRepository`] implements [`QueryRepository`] and
//! [`CommandRepository`] for any entity type over any [`Store`]. Created with
//! [`EntityRepository::new`] it is autocommit: every call is its own atomic
//! unit against the store. Created with
//! [`UnitOfWork::repository`](crate::repository::UnitOfWork::repository) it
//! joins that unit of work whenever a transaction is open.

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::blocking::Blocking;
use super::engine::RowSource;
use super::error::{RepositoryError, RepositoryOperation};
use super::expr::{Filter, FilterCondition, Projection};
use super::pagination::PagedOptions;
use super::patch::Patch;
use super::plan::{compose, QueryPlan};
use super::query::Query;
use super::relation::RelationLoader;
use super::schema::{Entity, PropertyCase, Schema};
use super::store::{Store, TxToken};
use super::traits::{CommandRepository, QueryRepository, RepositoryResult};
use super::unit_of_work::{Effect, PendingEffect, Scope, StagedEffect};
use crate::config::{Config, PagingConfig};

type Effects = Vec<Box<dyn PendingEffect>>;

/// Repository for entity type `T` over store `S`
pub struct EntityRepository<T: Entity, S> {
    store: S,
    schema: Arc<Schema<T>>,
    scope: Option<Arc<Scope>>,
    paging: PagingConfig,
}

impl<T: Entity, S: Clone> Clone for EntityRepository<T, S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            schema: Arc::clone(&self.schema),
            scope: self.scope.clone(),
            paging: self.paging,
        }
    }
}

impl<T: Entity, S> fmt::Debug for EntityRepository<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRepository")
            .field("entity", &T::NAME)
            .field("schema", &self.schema)
            .field("bound", &self.scope.is_some())
            .field("paging", &self.paging)
            .finish()
    }
}

impl<T, S> EntityRepository<T, S>
where
    T: Entity,
    S: Store<T> + Clone + 'static,
{
    /// Autocommit repository over `store`
    pub fn new(store: S) -> Self {
        Self {
            store,
            schema: Arc::new(T::schema()),
            scope: None,
            paging: PagingConfig::default(),
        }
    }

    /// Apply paging and property settings
    #[must_use]
    pub fn with_config(self, config: &Config) -> Self {
        self.with_paging(config.paging)
            .with_property_case(config.property_case())
    }

    /// Default and maximum page sizes for `get_paged`
    #[must_use]
    pub fn with_paging(mut self, paging: PagingConfig) -> Self {
        self.paging = paging;
        self
    }

    /// Property name matching mode
    #[must_use]
    pub fn with_property_case(mut self, case: PropertyCase) -> Self {
        Arc::make_mut(&mut self.schema).set_case(case);
        self
    }

    /// Register a relation include hints can name
    #[must_use]
    pub fn with_relation(mut self, name: impl Into<String>, loader: impl RelationLoader<T> + 'static) -> Self {
        Arc::make_mut(&mut self.schema).register_relation(name, Arc::new(loader));
        self
    }

    pub(crate) fn bind(mut self, scope: Arc<Scope>) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Entity schema, including registered relations
    pub fn schema(&self) -> &Schema<T> {
        &self.schema
    }

    /// Underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether this repository takes part in a unit of work
    pub fn is_bound(&self) -> bool {
        self.scope.is_some()
    }

    /// Incremental query over this repository
    pub fn query(&self) -> Query<'_, T, S> {
        Query::new(self)
    }

    /// Blocking forms of every operation
    pub fn blocking(&self) -> Blocking<'_, T, Self> {
        Blocking::new(self)
    }

    /// Compile a named condition against this repository's schema
    ///
    /// Inside an open unit of work a bad condition rolls the scope back.
    pub async fn filter_by(&self, condition: &FilterCondition) -> RepositoryResult<Filter<T>> {
        let compiled = condition.compile(&self.schema);
        self.settle(self.scoped(), compiled).await
    }

    fn scoped(&self) -> Option<(&Scope, TxToken)> {
        let scope = self.scope.as_deref()?;
        scope.current().map(|tx| (scope, tx))
    }

    fn view(&self, operation: RepositoryOperation) -> ReadView<'_, T, S> {
        ReadView {
            store: &self.store,
            scoped: self.scoped(),
            operation,
            _marker: PhantomData,
        }
    }

    fn staged(&self, effect: Effect<T>) -> Box<dyn PendingEffect> {
        StagedEffect::boxed(self.store.clone(), effect)
    }

    // A failure inside an open scope rolls the scope back before surfacing
    async fn settle<O>(&self, scoped: Option<(&Scope, TxToken)>, result: RepositoryResult<O>) -> RepositoryResult<O> {
        if let (Err(err), Some((scope, tx))) = (&result, scoped) {
            scope.abort(tx, err).await;
        }
        result
    }

    async fn stage(
        &self,
        scope: &Scope,
        tx: TxToken,
        operation: RepositoryOperation,
        effects: RepositoryResult<Effects>,
    ) -> RepositoryResult<()> {
        let result = effects.and_then(|effects| scope.stage(tx, operation, effects));
        self.settle(Some((scope, tx)), result).await
    }

    pub(crate) async fn run<R: Send + 'static>(
        &self,
        operation: RepositoryOperation,
        plan: RepositoryResult<QueryPlan<T, R>>,
    ) -> RepositoryResult<Vec<R>> {
        let view = self.view(operation);
        let result = match plan {
            Ok(plan) => plan.execute(&view).await,
            Err(err) => Err(err),
        };
        self.settle(view.scoped, result).await
    }

    pub(crate) async fn run_one<R: Send + 'static>(
        &self,
        operation: RepositoryOperation,
        plan: RepositoryResult<QueryPlan<T, R>>,
    ) -> RepositoryResult<R> {
        let view = self.view(operation);
        let result = match plan {
            Ok(plan) => plan
                .execute(&view)
                .await
                .and_then(|rows| rows.into_iter().next().ok_or_else(|| RepositoryError::no_match(T::NAME))),
            Err(err) => Err(err),
        };
        self.settle(view.scoped, result).await
    }

    /// Surface an error found before any storage call
    pub(crate) async fn reject<O>(&self, err: RepositoryError) -> RepositoryResult<O> {
        self.settle(self.scoped(), Err(err)).await
    }

    pub(crate) async fn tally(
        &self,
        operation: RepositoryOperation,
        filter: Option<&Filter<T>>,
    ) -> RepositoryResult<u64> {
        let view = self.view(operation);
        let result = view.count(filter).await;
        self.settle(view.scoped, result).await
    }

    fn options(&self, options: Option<PagedOptions>) -> PagedOptions {
        self.paging.options(options)
    }

    async fn insert(&self, items: Vec<T>, operation: RepositoryOperation) -> RepositoryResult<()> {
        let Some((scope, tx)) = self.scoped() else {
            let result = match <[T; 1]>::try_from(items) {
                Ok([item]) => self.store.insert(item, None).await,
                Err(items) => self.store.insert_many(items, None).await,
            };
            return result.map_err(|e| e.with_operation(operation));
        };

        let view = self.view(operation);
        let effects: RepositoryResult<Effects> = async {
            let mut seen = HashSet::with_capacity(items.len());
            for item in &items {
                let key = item.key();
                if !seen.insert(key.clone()) || view.get(&key).await?.is_some() {
                    return Err(RepositoryError::duplicate_key(T::NAME, key.to_string()).with_operation(operation));
                }
            }
            Ok(items.into_iter().map(|item| self.staged(Effect::Insert(item))).collect())
        }
        .await;
        self.stage(scope, tx, operation, effects).await
    }
}

impl<T, S> QueryRepository<T> for EntityRepository<T, S>
where
    T: Entity,
    S: Store<T> + Clone + 'static,
{
    async fn get_one(&self, filter: Filter<T>, includes: &[&str]) -> RepositoryResult<T> {
        self.get_one_as(Projection::identity(), Some(filter), includes).await
    }

    async fn get_one_as<R: Send + 'static>(
        &self,
        projection: Projection<T, R>,
        filter: Option<Filter<T>>,
        includes: &[&str],
    ) -> RepositoryResult<R> {
        let first = Some(PagedOptions::new().with_size(1));
        let plan = compose(&self.schema, includes, filter, projection, None, first);
        self.run_one(RepositoryOperation::GetOne, plan).await
    }

    async fn get_all(&self, filter: Option<Filter<T>>, includes: &[&str]) -> RepositoryResult<Vec<T>> {
        self.get_all_as(Projection::identity(), filter, includes).await
    }

    async fn get_all_as<R: Send + 'static>(
        &self,
        projection: Projection<T, R>,
        filter: Option<Filter<T>>,
        includes: &[&str],
    ) -> RepositoryResult<Vec<R>> {
        let plan = compose(&self.schema, includes, filter, projection, None, None);
        self.run(RepositoryOperation::GetAll, plan).await
    }

    async fn get_paged(
        &self,
        sort_property: &str,
        filter: Option<Filter<T>>,
        options: Option<PagedOptions>,
        includes: &[&str],
    ) -> RepositoryResult<Vec<T>> {
        self.get_paged_as(Projection::identity(), sort_property, filter, options, includes)
            .await
    }

    async fn get_paged_as<R: Send + 'static>(
        &self,
        projection: Projection<T, R>,
        sort_property: &str,
        filter: Option<Filter<T>>,
        options: Option<PagedOptions>,
        includes: &[&str],
    ) -> RepositoryResult<Vec<R>> {
        let options = self.options(options);
        let plan = compose(
            &self.schema,
            includes,
            filter,
            projection,
            Some(sort_property),
            Some(options),
        );
        self.run(RepositoryOperation::GetPaged, plan).await
    }

    async fn find(&self, key: &T::Key) -> RepositoryResult<T> {
        let view = self.view(RepositoryOperation::Find);
        let result = view
            .get(key)
            .await
            .and_then(|row| row.ok_or_else(|| RepositoryError::not_found(T::NAME, key.to_string())));
        self.settle(view.scoped, result).await
    }

    async fn any(&self, filter: Option<Filter<T>>) -> RepositoryResult<bool> {
        Ok(self.tally(RepositoryOperation::Any, filter.as_ref()).await? > 0)
    }

    async fn count(&self, filter: Option<Filter<T>>) -> RepositoryResult<u64> {
        self.tally(RepositoryOperation::Count, filter.as_ref()).await
    }
}

impl<T, S> CommandRepository<T> for EntityRepository<T, S>
where
    T: Entity,
    S: Store<T> + Clone + 'static,
{
    async fn add(&self, item: T) -> RepositoryResult<()> {
        self.insert(vec![item], RepositoryOperation::Add).await
    }

    async fn add_range(&self, items: Vec<T>) -> RepositoryResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.insert(items, RepositoryOperation::AddRange).await
    }

    async fn update(&self, key: &T::Key, item: T) -> RepositoryResult<()> {
        let operation = RepositoryOperation::Update;
        let scoped = self.scoped();

        if item.key() != *key {
            let err = RepositoryError::invalid_patch(T::NAME, "the entity key cannot change")
                .with_operation(operation)
                .with_entity(T::NAME, key.to_string());
            return self.settle(scoped, Err(err)).await;
        }

        let Some((scope, tx)) = scoped else {
            return self
                .store
                .replace(item, None)
                .await
                .map_err(|e| e.with_operation(operation));
        };

        let effects = self.view(operation).require(key).await.map(|_| vec![self.staged(Effect::Replace(item))]);
        self.stage(scope, tx, operation, effects).await
    }

    async fn update_partial(&self, key: &T::Key, patch: Patch) -> RepositoryResult<()> {
        let operation = RepositoryOperation::UpdatePartial;
        let view = self.view(operation);
        let merged = match view.require(key).await {
            Ok(current) => patch.apply(&current).map_err(|e| e.with_entity(T::NAME, key.to_string())),
            Err(err) => Err(err),
        };

        match view.scoped {
            None => self
                .store
                .replace(merged?, None)
                .await
                .map_err(|e| e.with_operation(operation)),
            Some((scope, tx)) => {
                let effects = merged.map(|merged| vec![self.staged(Effect::Replace(merged))]);
                self.stage(scope, tx, operation, effects).await
            }
        }
    }

    async fn delete(&self, key: &T::Key) -> RepositoryResult<()> {
        let operation = RepositoryOperation::Delete;
        let Some((scope, tx)) = self.scoped() else {
            return self
                .store
                .remove(key, None)
                .await
                .map_err(|e| e.with_operation(operation));
        };

        let effects = self
            .view(operation)
            .require(key)
            .await
            .map(|_| vec![self.staged(Effect::Remove(key.clone()))]);
        self.stage(scope, tx, operation, effects).await
    }

    async fn delete_where(&self, filter: Filter<T>) -> RepositoryResult<u64> {
        let operation = RepositoryOperation::DeleteWhere;
        let Some((scope, tx)) = self.scoped() else {
            return self
                .store
                .remove_where(&filter, None)
                .await
                .map_err(|e| e.with_operation(operation));
        };

        let effects: RepositoryResult<Effects> = self.view(operation).rows(Some(&filter)).await.map(|rows| {
            rows.into_iter()
                .map(|row| self.staged(Effect::Remove(row.key())))
                .collect()
        });
        let removed = effects.as_ref().map_or(0, |effects| effects.len() as u64);
        self.stage(scope, tx, operation, effects).await.map(|()| removed)
    }
}

/// Rows as seen by one repository call: committed storage, or the open
/// transaction overlaid with the scope's pending effects
struct ReadView<'a, T: Entity, S> {
    store: &'a S,
    scoped: Option<(&'a Scope, TxToken)>,
    operation: RepositoryOperation,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity, S: Store<T>> ReadView<'_, T, S> {
    fn pending(&self) -> RepositoryResult<bool> {
        match self.scoped {
            Some((scope, tx)) => scope.has_pending::<T>(tx, self.operation),
            None => Ok(false),
        }
    }

    async fn get(&self, key: &T::Key) -> RepositoryResult<Option<T>> {
        if let Some((scope, tx)) = self.scoped {
            if let Some(pending) = scope.pending_row::<T>(tx, self.operation, key)? {
                return Ok(pending);
            }
        }
        self.store
            .get(key, self.tx())
            .await
            .map_err(|e| e.with_operation(self.operation))
    }

    async fn require(&self, key: &T::Key) -> RepositoryResult<T> {
        self.get(key).await?.ok_or_else(|| {
            RepositoryError::not_found(T::NAME, key.to_string()).with_operation(self.operation)
        })
    }

    async fn count(&self, filter: Option<&Filter<T>>) -> RepositoryResult<u64> {
        if self.pending()? {
            return Ok(self.rows(filter).await?.len() as u64);
        }
        self.store
            .count(filter, self.tx())
            .await
            .map_err(|e| e.with_operation(self.operation))
    }
}

impl<T: Entity, S: Store<T>> RowSource<T> for ReadView<'_, T, S> {
    async fn rows(&self, filter: Option<&Filter<T>>) -> RepositoryResult<Vec<T>> {
        let overlaid = match self.scoped {
            Some(scoped) if self.pending()? => Some(scoped),
            _ => None,
        };
        let Some((scope, tx)) = overlaid else {
            return self
                .store
                .scan(filter, self.tx())
                .await
                .map_err(|e| e.with_operation(self.operation));
        };

        let rows = self
            .store
            .scan(None, Some(tx))
            .await
            .map_err(|e| e.with_operation(self.operation))?;
        let rows = scope.overlay(tx, self.operation, rows)?;
        Ok(match filter {
            Some(filter) => rows.into_iter().filter(|row| filter.matches(row)).collect(),
            None => rows,
        })
    }

    fn tx(&self) -> Option<TxToken> {
        self.scoped.map(|(_, tx)| tx)
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::repository::{HasMany, MemoryDatabase, MemoryTable, RepositoryErrorKind, UnitOfWork};
    use crate::repository::IsolationLevel;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Customer {
        id: u32,
        name: String,
        age: u32,
        email: Option<String>,
        #[serde(skip)]
        orders: Vec<Order>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u32,
        customer_id: u32,
        total: f64,
    }

    impl Entity for Customer {
        type Key = u32;
        const NAME: &'static str = "Customer";

        fn key(&self) -> u32 {
            self.id
        }

        fn schema() -> Schema<Self> {
            Schema::builder(Self::NAME)
                .property("id", |c: &Customer| c.id)
                .property("name", |c: &Customer| c.name.clone())
                .property("age", |c: &Customer| c.age)
                .property("email", |c: &Customer| c.email.clone())
                .build()
        }
    }

    impl Entity for Order {
        type Key = u32;
        const NAME: &'static str = "Order";

        fn key(&self) -> u32 {
            self.id
        }

        fn schema() -> Schema<Self> {
            Schema::builder(Self::NAME)
                .property("id", |o: &Order| o.id)
                .property("total", |o: &Order| o.total)
                .build()
        }
    }

    fn customer(id: u32, name: &str, age: u32) -> Customer {
        Customer {
            id,
            name: name.to_string(),
            age,
            email: None,
            orders: vec![],
        }
    }

    type Customers = EntityRepository<Customer, MemoryTable<Customer>>;

    async fn repo_with(rows: Vec<Customer>) -> Customers {
        let db = MemoryDatabase::new();
        let repo = EntityRepository::new(db.table::<Customer>());
        repo.add_range(rows).await.unwrap();
        repo
    }

    fn names(rows: &[Customer]) -> Vec<&str> {
        rows.iter().map(|c| c.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_descending_pages_by_name() {
        let repo = repo_with(vec![customer(1, "c", 30), customer(2, "a", 20), customer(3, "b", 40)]).await;
        let desc = PagedOptions::new().descending().with_size(2);

        let page1 = repo.get_paged("name", None, Some(desc.with_index(1)), &[]).await.unwrap();
        let page2 = repo.get_paged("name", None, Some(desc.with_index(2)), &[]).await.unwrap();
        assert_eq!(names(&page1), vec!["c", "b"]);
        assert_eq!(names(&page2), vec!["a"]);
    }

    #[tokio::test]
    async fn test_pages_partition_the_result() {
        let rows: Vec<Customer> = (1..=23).map(|i| customer(i, &format!("n{:02}", 24 - i), i % 5)).collect();
        let repo = repo_with(rows).await;
        let adults = || Some(Filter::new(|c: &Customer| c.id % 3 != 0));
        let total = repo.count(adults()).await.unwrap() as usize;
        let expected = repo.get_paged("age", adults(), Some(PagedOptions::new().with_size(1000)), &[]).await.unwrap();
        assert_eq!(expected.len(), total);

        for size in [1_u32, 2, 4, 7, 16, 40] {
            let mut collected = Vec::new();
            let pages = (total as u32).div_ceil(size);
            for index in 1..=pages + 1 {
                let options = PagedOptions::new().with_index(index).with_size(size);
                let page = repo.get_paged("age", adults(), Some(options), &[]).await.unwrap();
                let skipped = ((index - 1) * size) as usize;
                assert_eq!(page.len(), (size as usize).min(total.saturating_sub(skipped)));
                collected.extend(page);
            }
            assert_eq!(collected, expected, "page size {}", size);
        }
    }

    #[tokio::test]
    async fn test_default_page_size_from_config() {
        let rows: Vec<Customer> = (1..=30).map(|i| customer(i, "x", i)).collect();
        let db = MemoryDatabase::new();
        let mut config = Config::default();
        config.paging.default_size = 7;
        config.paging.max_size = Some(10);
        let repo = EntityRepository::new(db.table::<Customer>()).with_config(&config);
        repo.add_range(rows).await.unwrap();

        assert_eq!(repo.get_paged("id", None, None, &[]).await.unwrap().len(), 7);
        let huge = PagedOptions::new().with_size(500);
        assert_eq!(repo.get_paged("id", None, Some(huge), &[]).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_sort_property_errors_fail_fast() {
        let db = MemoryDatabase::new();
        let repo = EntityRepository::new(db.table::<Customer>());
        db.set_available(false);

        // composition errors surface even though storage is offline
        let err = repo.get_paged("", None, None, &[]).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidSortProperty);
        let err = repo.get_paged("salary", None, None, &[]).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::UnknownProperty);
        let err = repo.get_all(None, &["orders"]).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::UnknownRelation);
    }

    #[tokio::test]
    async fn test_case_insensitive_properties() {
        let mut config = Config::default();
        config.properties.case_insensitive = true;
        let repo = repo_with(vec![customer(1, "b", 1), customer(2, "a", 2)]).await.with_config(&config);
        let rows = repo.get_paged("NAME", None, None, &[]).await.unwrap();
        assert_eq!(names(&rows), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_get_one_and_find() {
        let repo = repo_with(vec![customer(1, "ann", 30), customer(2, "bob", 30)]).await;

        let first = repo.get_one(Filter::new(|c: &Customer| c.age == 30), &[]).await.unwrap();
        assert_eq!(first.name, "ann");

        let err = repo.get_one(Filter::new(|c: &Customer| c.age > 90), &[]).await.unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(repo.find(&2).await.unwrap().name, "bob");
        let err = repo.find(&9).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NotFound);
        assert_eq!(err.entity_id.as_deref(), Some("9"));
    }

    #[tokio::test]
    async fn test_projections() {
        let repo = repo_with(vec![customer(1, "ann", 30), customer(2, "bob", 25)]).await;
        let name = || Projection::new(|c: &Customer| c.name.to_uppercase());

        let all = repo.get_all_as(name(), None, &[]).await.unwrap();
        assert_eq!(all, vec!["ANN", "BOB"]);

        let youngest = repo
            .get_paged_as(name(), "age", None, Some(PagedOptions::new().with_size(1)), &[])
            .await
            .unwrap();
        assert_eq!(youngest, vec!["BOB"]);

        let one = repo.get_one_as(name(), None, &[]).await.unwrap();
        assert_eq!(one, "ANN");
    }

    #[tokio::test]
    async fn test_count_matches_get_all() {
        let repo = repo_with(vec![customer(1, "ann", 30), customer(2, "bob", 25), customer(3, "cy", 41)]).await;
        let filters: Vec<Option<Filter<Customer>>> = vec![
            None,
            Some(Filter::new(|c: &Customer| c.age > 26)),
            Some(Filter::new(|c: &Customer| c.age > 100)),
        ];
        for filter in filters {
            let count = repo.count(filter.clone()).await.unwrap();
            let all = repo.get_all(filter.clone(), &[]).await.unwrap();
            assert_eq!(count as usize, all.len());
            assert_eq!(repo.any(filter).await.unwrap(), !all.is_empty());
        }
    }

    #[tokio::test]
    async fn test_add_then_find_and_duplicate() {
        let repo = repo_with(vec![]).await;
        let ann = customer(1, "ann", 30);
        repo.add(ann.clone()).await.unwrap();
        assert_eq!(repo.find(&1).await.unwrap(), ann);

        let err = repo.add(customer(1, "impostor", 99)).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::DuplicateKey);
        assert_eq!(err.operation, RepositoryOperation::Add);
        assert_eq!(repo.find(&1).await.unwrap(), ann);
    }

    #[tokio::test]
    async fn test_add_range_applies_nothing_on_failure() {
        let repo = repo_with(vec![customer(2, "bob", 25)]).await;
        let err = repo
            .add_range(vec![customer(1, "ann", 30), customer(2, "dup", 1)])
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::DuplicateKey);
        assert_eq!(err.operation, RepositoryOperation::AddRange);
        assert_eq!(repo.count(None).await.unwrap(), 1);
        assert!(repo.add_range(vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_partial_changes_only_named_fields() {
        let repo = repo_with(vec![customer(1, "ann", 30)]).await;
        let before = repo.find(&1).await.unwrap();

        repo.update_partial(&1, Patch::new().set("age", 31).set("email", "ann@example.com"))
            .await
            .unwrap();
        let after = repo.find(&1).await.unwrap();

        assert_eq!(after.age, 31);
        assert_eq!(after.email.as_deref(), Some("ann@example.com"));
        assert_eq!(
            Customer {
                age: before.age,
                email: before.email.clone(),
                ..after
            },
            before
        );
    }

    #[tokio::test]
    async fn test_update_errors() {
        let repo = repo_with(vec![customer(1, "ann", 30)]).await;

        let err = repo.update(&9, customer(9, "x", 1)).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NotFound);

        let err = repo.update(&1, customer(2, "x", 1)).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidPatch);

        let err = repo.update_partial(&9, Patch::new().set("age", 1)).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NotFound);

        let err = repo.update_partial(&1, Patch::new().set("salary", 1)).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidPatch);
        assert_eq!(repo.find(&1).await.unwrap(), customer(1, "ann", 30));
    }

    #[tokio::test]
    async fn test_delete_and_delete_where() {
        let repo = repo_with(vec![customer(1, "ann", 30), customer(2, "bob", 25), customer(3, "cy", 41)]).await;

        repo.delete(&1).await.unwrap();
        let err = repo.delete(&1).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NotFound);

        let removed = repo.delete_where(Filter::new(|c: &Customer| c.age > 40)).await.unwrap();
        assert_eq!(removed, 1);
        let removed = repo.delete_where(Filter::new(|c: &Customer| c.age > 40)).await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(repo.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_includes_expand_before_filter() {
        let db = MemoryDatabase::new();
        let orders = EntityRepository::new(db.table::<Order>());
        orders
            .add_range(vec![
                Order { id: 1, customer_id: 1, total: 10.0 },
                Order { id: 2, customer_id: 1, total: 5.0 },
                Order { id: 3, customer_id: 3, total: 7.5 },
            ])
            .await
            .unwrap();

        let customers = EntityRepository::new(db.table::<Customer>()).with_relation(
            "orders",
            HasMany::new(
                orders,
                |c: &Customer| c.id,
                |o: &Order| o.customer_id,
                |c: &mut Customer, orders| c.orders = orders,
            ),
        );
        customers
            .add_range(vec![customer(1, "ann", 30), customer(2, "bob", 25), customer(3, "cy", 41)])
            .await
            .unwrap();

        let buyers = customers
            .get_paged(
                "name",
                Some(Filter::new(|c: &Customer| !c.orders.is_empty())),
                Some(PagedOptions::new().descending()),
                &["orders", "orders"],
            )
            .await
            .unwrap();
        assert_eq!(names(&buyers), vec!["cy", "ann"]);
        assert_eq!(buyers[1].orders.len(), 2);
    }

    #[tokio::test]
    async fn test_unit_of_work_add_delete_then_failure_leaves_storage_untouched() {
        let db = MemoryDatabase::new();
        let table = db.table::<Customer>();
        EntityRepository::new(table.clone())
            .add_range(vec![customer(1, "ann", 30), customer(2, "bob", 25)])
            .await
            .unwrap();
        let before = table.scan(None, None).await.unwrap();

        let uow = UnitOfWork::new(db.clone());
        let repo = uow.repository(table.clone());
        uow.open_transaction(IsolationLevel::ReadCommitted).await.unwrap();
        repo.add(customer(3, "cy", 41)).await.unwrap();
        repo.delete(&1).await.unwrap();
        let err = repo.update_partial(&2, Patch::new().set("nickname", "b")).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidPatch);

        assert!(!uow.is_open());
        assert_eq!(table.scan(None, None).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_delete_where_inside_scope_counts_pending_rows() {
        let db = MemoryDatabase::new();
        let uow = UnitOfWork::new(db.clone());
        let repo = uow.repository(db.table::<Customer>());
        repo.add(customer(1, "ann", 30)).await.unwrap();

        uow.open_transaction(IsolationLevel::ReadCommitted).await.unwrap();
        repo.add(customer(2, "bob", 31)).await.unwrap();
        let removed = repo.delete_where(Filter::new(|c: &Customer| c.age >= 30)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(repo.count(None).await.unwrap(), 0);
        uow.save().await.unwrap();

        assert!(db.table::<Customer>().is_empty());
    }

    #[tokio::test]
    async fn test_filter_by_condition() {
        let repo = repo_with(vec![customer(1, "ann", 30), customer(2, "bob", 25)]).await;
        let filter = repo.filter_by(&FilterCondition::lt("age", 28)).await.unwrap();
        assert_eq!(names(&repo.get_all(Some(filter), &[]).await.unwrap()), vec!["bob"]);
        assert!(repo.filter_by(&FilterCondition::eq("salary", 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_bad_condition_rolls_back_scope() {
        let db = MemoryDatabase::new();
        let uow = UnitOfWork::new(db.clone());
        let repo = uow.repository(db.table::<Customer>());

        uow.open_transaction(IsolationLevel::ReadCommitted).await.unwrap();
        repo.add(customer(1, "ann", 30)).await.unwrap();
        let err = repo.filter_by(&FilterCondition::eq("salary", 1)).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::UnknownProperty);

        assert!(!uow.is_open());
        assert_eq!(uow.pending_changes(), 0);
        assert_eq!(db.open_transactions(), 0);
        assert!(db.table::<Customer>().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_readers() {
        let repo = Arc::new(repo_with((1..=50).map(|i| customer(i, "x", i % 7)).collect()).await);
        let mut handles = Vec::new();
        for size in 1..=8_u32 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                let options = PagedOptions::new().with_size(size);
                repo.get_paged("age", None, Some(options), &[]).await.map(|rows| rows.len())
            }));
        }
        for (size, handle) in (1..=8_usize).zip(handles) {
            assert_eq!(handle.await.unwrap().unwrap(), size);
        }
    }
}
