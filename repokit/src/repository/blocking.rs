//! Blocking forms of the repository and unit-of-work operations
//!
//! Every operation is asynchronous at its core. The wrappers here drive the
//! same futures to completion on the calling thread, so both forms share one
//! implementation and one set of semantics.
//!
//! Do not call these from inside an async runtime worker; use the
//! non-blocking forms there.

use std::marker::PhantomData;

use futures::executor::block_on;

use super::expr::{Filter, Projection};
use super::pagination::PagedOptions;
use super::patch::Patch;
use super::schema::Entity;
use super::store::IsolationLevel;
use super::traits::{CommandRepository, QueryRepository, RepositoryResult};
use super::unit_of_work::UnitOfWork;

/// Blocking view of a repository
///
/// Works over anything implementing the repository traits:
///
/// ```rust,ignore
/// let users = EntityRepository::new(db.table::<User>());
/// let page = users.blocking().get_paged("name", None, None, &[])?;
/// ```
pub struct Blocking<'a, T, Repo> {
    repo: &'a Repo,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T, Repo> Blocking<'a, T, Repo> {
    /// Wrap a repository
    pub fn new(repo: &'a Repo) -> Self {
        Self {
            repo,
            _marker: PhantomData,
        }
    }

    /// The wrapped repository
    pub fn inner(&self) -> &'a Repo {
        self.repo
    }
}

impl<T: Entity, Repo: QueryRepository<T>> Blocking<'_, T, Repo> {
    /// Blocking [`QueryRepository::get_one`]
    pub fn get_one(&self, filter: Filter<T>, includes: &[&str]) -> RepositoryResult<T> {
        block_on(self.repo.get_one(filter, includes))
    }

    /// Blocking [`QueryRepository::get_one_as`]
    pub fn get_one_as<R: Send + 'static>(
        &self,
        projection: Projection<T, R>,
        filter: Option<Filter<T>>,
        includes: &[&str],
    ) -> RepositoryResult<R> {
        block_on(self.repo.get_one_as(projection, filter, includes))
    }

    /// Blocking [`QueryRepository::get_all`]
    pub fn get_all(&self, filter: Option<Filter<T>>, includes: &[&str]) -> RepositoryResult<Vec<T>> {
        block_on(self.repo.get_all(filter, includes))
    }

    /// Blocking [`QueryRepository::get_all_as`]
    pub fn get_all_as<R: Send + 'static>(
        &self,
        projection: Projection<T, R>,
        filter: Option<Filter<T>>,
        includes: &[&str],
    ) -> RepositoryResult<Vec<R>> {
        block_on(self.repo.get_all_as(projection, filter, includes))
    }

    /// Blocking [`QueryRepository::get_paged`]
    pub fn get_paged(
        &self,
        sort_property: &str,
        filter: Option<Filter<T>>,
        options: Option<PagedOptions>,
        includes: &[&str],
    ) -> RepositoryResult<Vec<T>> {
        block_on(self.repo.get_paged(sort_property, filter, options, includes))
    }

    /// Blocking [`QueryRepository::get_paged_as`]
    pub fn get_paged_as<R: Send + 'static>(
        &self,
        projection: Projection<T, R>,
        sort_property: &str,
        filter: Option<Filter<T>>,
        options: Option<PagedOptions>,
        includes: &[&str],
    ) -> RepositoryResult<Vec<R>> {
        block_on(
            self.repo
                .get_paged_as(projection, sort_property, filter, options, includes),
        )
    }

    /// Blocking [`QueryRepository::find`]
    pub fn find(&self, key: &T::Key) -> RepositoryResult<T> {
        block_on(self.repo.find(key))
    }

    /// Blocking [`QueryRepository::any`]
    pub fn any(&self, filter: Option<Filter<T>>) -> RepositoryResult<bool> {
        block_on(self.repo.any(filter))
    }

    /// Blocking [`QueryRepository::count`]
    pub fn count(&self, filter: Option<Filter<T>>) -> RepositoryResult<u64> {
        block_on(self.repo.count(filter))
    }
}

impl<T: Entity, Repo: CommandRepository<T>> Blocking<'_, T, Repo> {
    /// Blocking [`CommandRepository::add`]
    pub fn add(&self, item: T) -> RepositoryResult<()> {
        block_on(self.repo.add(item))
    }

    /// Blocking [`CommandRepository::add_range`]
    pub fn add_range(&self, items: Vec<T>) -> RepositoryResult<()> {
        block_on(self.repo.add_range(items))
    }

    /// Blocking [`CommandRepository::update`]
    pub fn update(&self, key: &T::Key, item: T) -> RepositoryResult<()> {
        block_on(self.repo.update(key, item))
    }

    /// Blocking [`CommandRepository::update_partial`]
    pub fn update_partial(&self, key: &T::Key, patch: Patch) -> RepositoryResult<()> {
        block_on(self.repo.update_partial(key, patch))
    }

    /// Blocking [`CommandRepository::delete`]
    pub fn delete(&self, key: &T::Key) -> RepositoryResult<()> {
        block_on(self.repo.delete(key))
    }

    /// Blocking [`CommandRepository::delete_where`]
    pub fn delete_where(&self, filter: Filter<T>) -> RepositoryResult<u64> {
        block_on(self.repo.delete_where(filter))
    }
}

/// Blocking view of a [`UnitOfWork`]
#[derive(Debug)]
pub struct BlockingUnitOfWork<'a> {
    uow: &'a UnitOfWork,
}

impl<'a> BlockingUnitOfWork<'a> {
    pub(crate) fn new(uow: &'a UnitOfWork) -> Self {
        Self { uow }
    }

    /// Blocking [`UnitOfWork::open_transaction`]
    pub fn open_transaction(&self, level: IsolationLevel) -> RepositoryResult<()> {
        block_on(self.uow.open_transaction(level))
    }

    /// Blocking [`UnitOfWork::open_default_transaction`]
    pub fn open_default_transaction(&self) -> RepositoryResult<()> {
        block_on(self.uow.open_default_transaction())
    }

    /// Blocking [`UnitOfWork::save`]
    pub fn save(&self) -> RepositoryResult<()> {
        block_on(self.uow.save())
    }

    /// Blocking [`UnitOfWork::rollback`]
    pub fn rollback(&self) -> RepositoryResult<()> {
        block_on(self.uow.rollback())
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::repository::{EntityRepository, MemoryDatabase, RepositoryErrorKind, Schema};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: u32,
        body: String,
    }

    impl Entity for Note {
        type Key = u32;
        const NAME: &'static str = "Note";

        fn key(&self) -> u32 {
            self.id
        }

        fn schema() -> Schema<Self> {
            Schema::builder(Self::NAME)
                .property("id", |n: &Note| n.id)
                .property("body", |n: &Note| n.body.clone())
                .build()
        }
    }

    fn note(id: u32, body: &str) -> Note {
        Note {
            id,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_blocking_matches_async() {
        let db = MemoryDatabase::new();
        let repo = EntityRepository::new(db.table::<Note>());
        let notes = repo.blocking();

        notes.add_range(vec![note(1, "b"), note(2, "c"), note(3, "a")]).unwrap();
        notes.update_partial(&2, Patch::new().set("body", "z")).unwrap();

        let page = notes
            .get_paged_as(
                Projection::new(|n: &Note| n.body.clone()),
                "body",
                None,
                Some(PagedOptions::new().descending().with_size(2)),
                &[],
            )
            .unwrap();
        assert_eq!(page, vec!["z", "b"]);

        let async_page = block_on(repo.get_paged("body", None, Some(PagedOptions::new().descending().with_size(2)), &[]))
            .unwrap();
        assert_eq!(async_page.iter().map(|n| n.id).collect::<Vec<_>>(), vec![2, 1]);

        assert_eq!(notes.count(None).unwrap(), 3);
        assert!(notes.any(Some(Filter::new(|n: &Note| n.body == "a"))).unwrap());
        assert_eq!(notes.find(&3).unwrap().body, "a");
        assert_eq!(notes.delete_where(Filter::new(|n: &Note| n.id > 1)).unwrap(), 2);
        assert_eq!(notes.get_all(None, &[]).unwrap(), vec![note(1, "b")]);

        let err = notes.delete(&9).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NotFound);
    }

    #[test]
    fn test_blocking_unit_of_work() {
        let db = MemoryDatabase::new();
        let uow = UnitOfWork::new(db.clone());
        let notes = uow.repository(db.table::<Note>());

        uow.blocking().open_default_transaction().unwrap();
        notes.blocking().add(note(1, "draft")).unwrap();
        notes.blocking().update(&1, note(1, "final")).unwrap();
        assert_eq!(db.table::<Note>().len(), 0);
        uow.blocking().save().unwrap();

        assert_eq!(notes.blocking().find(&1).unwrap().body, "final");

        uow.blocking().open_transaction(IsolationLevel::Serializable).unwrap();
        notes.blocking().delete(&1).unwrap();
        uow.blocking().rollback().unwrap();
        assert_eq!(notes.blocking().count(None).unwrap(), 1);

        let err = uow.blocking().save().unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NoOpenTransaction);
    }
}
