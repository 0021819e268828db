//! In-memory storage backend
//!
//! [`MemoryDatabase`] holds one table per entity type and implements
//! [`TransactionManager`]; [`MemoryTable`] implements [`Store`] for a single
//! entity type. Both are cheap to clone and share their state.
//!
//! Transactions buffer their writes per table and apply them at commit under
//! an exclusive gate, after re-validating every buffered write against the
//! committed rows. A commit therefore either applies across all tables or not
//! at all. Every isolation level is served with read-committed guarantees;
//! the requested level is recorded but not otherwise enforced.
//!
//! # Example
//!
//! ```rust,ignore
//! let db = MemoryDatabase::new();
//! let users = EntityRepository::new(db.table::<User>());
//! users.add(user).await?;
//! ```

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::error::{RepositoryError, RepositoryOperation};
use super::expr::Filter;
use super::schema::Entity;
use super::store::{IsolationLevel, Store, TransactionManager, TxToken};
use super::traits::RepositoryResult;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Type-erased view of one table, used at commit time
trait TableHandle: Send + Sync {
    fn entity(&self) -> &'static str;
    fn validate(&self, tx: TxToken) -> RepositoryResult<()>;
    fn apply(&self, tx: TxToken) -> usize;
    fn discard(&self, tx: TxToken);
}

#[derive(Clone)]
struct Registered {
    handle: Arc<dyn TableHandle>,
    data: Arc<dyn Any + Send + Sync>,
}

#[derive(Debug, Clone, Copy)]
struct OpenTransaction {
    level: IsolationLevel,
    started_at: DateTime<Utc>,
}

struct Shared {
    tables: DashMap<TypeId, Registered>,
    transactions: DashMap<TxToken, OpenTransaction>,
    // Readers and autocommit writers share it, commits hold it exclusively
    gate: RwLock<()>,
    available: AtomicBool,
}

impl Shared {
    fn ensure_available(&self, operation: RepositoryOperation) -> RepositoryResult<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(RepositoryError::storage_unavailable(operation, "in-memory database is offline"))
        }
    }

    fn begin(&self, level: IsolationLevel) -> RepositoryResult<TxToken> {
        self.ensure_available(RepositoryOperation::OpenTransaction)?;
        let tx = TxToken::new();
        self.transactions.insert(
            tx,
            OpenTransaction {
                level,
                started_at: Utc::now(),
            },
        );
        tracing::debug!(tx = %tx, isolation = %level, "transaction started");
        Ok(tx)
    }

    fn commit(&self, tx: TxToken) -> RepositoryResult<()> {
        self.ensure_available(RepositoryOperation::Save)?;
        let _gate = write(&self.gate);

        let Some((_, info)) = self.transactions.remove(&tx) else {
            return Err(RepositoryError::no_open_transaction(RepositoryOperation::Save));
        };
        let handles: Vec<Arc<dyn TableHandle>> =
            self.tables.iter().map(|entry| Arc::clone(&entry.handle)).collect();

        if let Err(err) = handles.iter().try_for_each(|table| table.validate(tx)) {
            handles.iter().for_each(|table| table.discard(tx));
            tracing::warn!(tx = %tx, error = %err, "transaction rejected at commit");
            return Err(err);
        }

        let mut changes = 0;
        for table in &handles {
            let applied = table.apply(tx);
            if applied > 0 {
                tracing::trace!(tx = %tx, entity = table.entity(), applied, "table changes applied");
            }
            changes += applied;
        }

        tracing::debug!(
            tx = %tx,
            isolation = %info.level,
            changes,
            elapsed_ms = (Utc::now() - info.started_at).num_milliseconds(),
            "transaction committed"
        );
        Ok(())
    }

    fn rollback(&self, tx: TxToken) {
        let _gate = write(&self.gate);
        for entry in self.tables.iter() {
            entry.handle.discard(tx);
        }
        if self.transactions.remove(&tx).is_some() {
            tracing::debug!(tx = %tx, "transaction rolled back");
        }
    }
}

/// In-memory database: a set of tables plus a transaction manager
#[derive(Clone)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl MemoryDatabase {
    /// Empty, available database
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: DashMap::new(),
                transactions: DashMap::new(),
                gate: RwLock::new(()),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Table for entity type `T`, created on first use
    pub fn table<T: Entity>(&self) -> MemoryTable<T> {
        let registered = self
            .shared
            .tables
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                let data = Arc::new(TableData::<T>::new());
                Registered {
                    handle: data.clone(),
                    data,
                }
            })
            .clone();

        let data = match registered.data.downcast::<TableData<T>>() {
            Ok(data) => data,
            Err(_) => unreachable!("tables are keyed by the TypeId of their entity"),
        };
        MemoryTable {
            shared: Arc::clone(&self.shared),
            data,
        }
    }

    /// Simulate an outage: while unavailable every operation fails with
    /// `StorageUnavailable`, except rollback
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::Release);
        tracing::info!(available, "in-memory database availability changed");
    }

    /// Whether the database accepts operations
    pub fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::Acquire)
    }

    /// Number of transactions begun but not yet finished
    pub fn open_transactions(&self) -> usize {
        self.shared.transactions.len()
    }

    /// Isolation level a still-open transaction was begun with
    pub fn isolation_level(&self, tx: TxToken) -> Option<IsolationLevel> {
        self.shared.transactions.get(&tx).map(|t| t.level)
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("tables", &self.shared.tables.len())
            .field("open_transactions", &self.shared.transactions.len())
            .field("available", &self.is_available())
            .finish()
    }
}

#[async_trait]
impl TransactionManager for MemoryDatabase {
    async fn begin(&self, level: IsolationLevel) -> RepositoryResult<TxToken> {
        self.shared.begin(level)
    }

    async fn commit(&self, tx: TxToken) -> RepositoryResult<()> {
        self.shared.commit(tx)
    }

    async fn rollback(&self, tx: TxToken) -> RepositoryResult<()> {
        self.shared.rollback(tx);
        Ok(())
    }

    fn release(&self, tx: TxToken) {
        self.shared.rollback(tx);
    }
}

enum Staged<T> {
    Inserted(T),
    Replaced(T),
    Removed,
}

struct TableData<T: Entity> {
    rows: RwLock<BTreeMap<T::Key, T>>,
    staged: DashMap<TxToken, BTreeMap<T::Key, Staged<T>>>,
}

impl<T: Entity> TableData<T> {
    fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            staged: DashMap::new(),
        }
    }
}

impl<T: Entity> TableHandle for TableData<T> {
    fn entity(&self) -> &'static str {
        T::NAME
    }

    fn validate(&self, tx: TxToken) -> RepositoryResult<()> {
        let Some(staged) = self.staged.get(&tx) else {
            return Ok(());
        };
        let rows = read(&self.rows);
        for (key, change) in staged.iter() {
            match change {
                Staged::Inserted(_) if rows.contains_key(key) => {
                    return Err(RepositoryError::duplicate_key(T::NAME, key.to_string())
                        .with_operation(RepositoryOperation::Save));
                }
                Staged::Replaced(_) | Staged::Removed if !rows.contains_key(key) => {
                    return Err(RepositoryError::not_found(T::NAME, key.to_string())
                        .with_operation(RepositoryOperation::Save));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply(&self, tx: TxToken) -> usize {
        let Some((_, staged)) = self.staged.remove(&tx) else {
            return 0;
        };
        let applied = staged.len();
        let mut rows = write(&self.rows);
        for (key, change) in staged {
            match change {
                Staged::Inserted(item) | Staged::Replaced(item) => {
                    rows.insert(key, item);
                }
                Staged::Removed => {
                    rows.remove(&key);
                }
            }
        }
        applied
    }

    fn discard(&self, tx: TxToken) {
        self.staged.remove(&tx);
    }
}

/// Rows of one entity type in a [`MemoryDatabase`]
pub struct MemoryTable<T: Entity> {
    shared: Arc<Shared>,
    data: Arc<TableData<T>>,
}

impl<T: Entity> Clone for MemoryTable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Entity> fmt::Debug for MemoryTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTable")
            .field("entity", &T::NAME)
            .field("rows", &read(&self.data.rows).len())
            .finish()
    }
}

impl<T: Entity> MemoryTable<T> {
    /// Committed row count, ignoring open transactions
    pub fn len(&self) -> usize {
        read(&self.data.rows).len()
    }

    /// Whether no row is committed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn enter(
        &self,
        tx: Option<TxToken>,
        operation: RepositoryOperation,
    ) -> RepositoryResult<RwLockReadGuard<'_, ()>> {
        self.shared.ensure_available(operation)?;
        let gate = read(&self.shared.gate);
        if let Some(tx) = tx {
            if !self.shared.transactions.contains_key(&tx) {
                return Err(RepositoryError::no_open_transaction(operation).with_entity(T::NAME, tx.to_string()));
            }
        }
        Ok(gate)
    }

    // Visit the rows visible to `tx` in key order
    fn visit(&self, tx: Option<TxToken>, mut each: impl FnMut(&T)) {
        let rows = read(&self.data.rows);
        match tx.and_then(|tx| self.data.staged.get(&tx)) {
            None => rows.values().for_each(each),
            Some(staged) => {
                let mut view: BTreeMap<&T::Key, &T> = rows.iter().collect();
                for (key, change) in staged.iter() {
                    match change {
                        Staged::Inserted(item) | Staged::Replaced(item) => {
                            view.insert(key, item);
                        }
                        Staged::Removed => {
                            view.remove(key);
                        }
                    }
                }
                view.values().for_each(|item| each(*item));
            }
        }
    }

    fn lookup(&self, key: &T::Key, tx: Option<TxToken>) -> Option<T> {
        if let Some(staged) = tx.and_then(|tx| self.data.staged.get(&tx)) {
            if let Some(change) = staged.get(key) {
                return match change {
                    Staged::Inserted(item) | Staged::Replaced(item) => Some(item.clone()),
                    Staged::Removed => None,
                };
            }
        }
        read(&self.data.rows).get(key).cloned()
    }

    fn exists(&self, key: &T::Key, tx: Option<TxToken>) -> bool {
        if let Some(staged) = tx.and_then(|tx| self.data.staged.get(&tx)) {
            if let Some(change) = staged.get(key) {
                return !matches!(change, Staged::Removed);
            }
        }
        read(&self.data.rows).contains_key(key)
    }

    fn stage_insert(&self, tx: TxToken, item: T) {
        let key = item.key();
        let committed = read(&self.data.rows).contains_key(&key);
        let change = if committed {
            Staged::Replaced(item)
        } else {
            Staged::Inserted(item)
        };
        self.data.staged.entry(tx).or_default().insert(key, change);
    }

    fn stage_replace(&self, tx: TxToken, item: T) {
        let mut staged = self.data.staged.entry(tx).or_default();
        let key = item.key();
        let change = match staged.get(&key) {
            Some(Staged::Inserted(_)) => Staged::Inserted(item),
            _ => Staged::Replaced(item),
        };
        staged.insert(key, change);
    }

    fn stage_remove(&self, tx: TxToken, key: &T::Key) {
        let mut staged = self.data.staged.entry(tx).or_default();
        if matches!(staged.get(key), Some(Staged::Inserted(_))) {
            staged.remove(key);
        } else {
            staged.insert(key.clone(), Staged::Removed);
        }
    }

    fn scan_now(&self, filter: Option<&Filter<T>>, tx: Option<TxToken>) -> RepositoryResult<Vec<T>> {
        let _gate = self.enter(tx, RepositoryOperation::GetAll)?;
        let mut out = Vec::new();
        self.visit(tx, |item| {
            if filter.map_or(true, |f| f.matches(item)) {
                out.push(item.clone());
            }
        });
        Ok(out)
    }

    fn count_now(&self, filter: Option<&Filter<T>>, tx: Option<TxToken>) -> RepositoryResult<u64> {
        let _gate = self.enter(tx, RepositoryOperation::Count)?;
        let mut count = 0;
        self.visit(tx, |item| {
            if filter.map_or(true, |f| f.matches(item)) {
                count += 1;
            }
        });
        Ok(count)
    }

    fn get_now(&self, key: &T::Key, tx: Option<TxToken>) -> RepositoryResult<Option<T>> {
        let _gate = self.enter(tx, RepositoryOperation::Find)?;
        Ok(self.lookup(key, tx))
    }

    fn insert_now(&self, items: Vec<T>, tx: Option<TxToken>) -> RepositoryResult<()> {
        let operation = if items.len() == 1 {
            RepositoryOperation::Add
        } else {
            RepositoryOperation::AddRange
        };
        let _gate = self.enter(tx, operation)?;

        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            let key = item.key();
            if self.exists(&key, tx) || !seen.insert(key.clone()) {
                return Err(RepositoryError::duplicate_key(T::NAME, key.to_string()).with_operation(operation));
            }
        }

        match tx {
            None => {
                let mut rows = write(&self.data.rows);
                // Re-check under the write lock; another writer may have won
                if let Some(item) = items.iter().find(|item| rows.contains_key(&item.key())) {
                    return Err(RepositoryError::duplicate_key(T::NAME, item.key().to_string())
                        .with_operation(operation));
                }
                for item in items {
                    rows.insert(item.key(), item);
                }
            }
            Some(tx) => items.into_iter().for_each(|item| self.stage_insert(tx, item)),
        }
        Ok(())
    }

    fn replace_now(&self, item: T, tx: Option<TxToken>) -> RepositoryResult<()> {
        let _gate = self.enter(tx, RepositoryOperation::Update)?;
        let key = item.key();
        let missing = || RepositoryError::not_found(T::NAME, key.to_string()).with_operation(RepositoryOperation::Update);

        match tx {
            None => match write(&self.data.rows).get_mut(&key) {
                Some(slot) => *slot = item,
                None => return Err(missing()),
            },
            Some(tx) => {
                if !self.exists(&key, Some(tx)) {
                    return Err(missing());
                }
                self.stage_replace(tx, item);
            }
        }
        Ok(())
    }

    fn remove_now(&self, key: &T::Key, tx: Option<TxToken>) -> RepositoryResult<()> {
        let _gate = self.enter(tx, RepositoryOperation::Delete)?;
        let missing = || RepositoryError::not_found(T::NAME, key.to_string()).with_operation(RepositoryOperation::Delete);

        match tx {
            None => {
                if write(&self.data.rows).remove(key).is_none() {
                    return Err(missing());
                }
            }
            Some(tx) => {
                if !self.exists(key, Some(tx)) {
                    return Err(missing());
                }
                self.stage_remove(tx, key);
            }
        }
        Ok(())
    }

    fn remove_where_now(&self, filter: &Filter<T>, tx: Option<TxToken>) -> RepositoryResult<u64> {
        let _gate = self.enter(tx, RepositoryOperation::DeleteWhere)?;

        let keys: Vec<T::Key> = match tx {
            None => {
                let mut rows = write(&self.data.rows);
                let keys: Vec<T::Key> = rows
                    .iter()
                    .filter(|(_, item)| filter.matches(item))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in &keys {
                    rows.remove(key);
                }
                keys
            }
            Some(tx) => {
                let mut keys = Vec::new();
                self.visit(Some(tx), |item| {
                    if filter.matches(item) {
                        keys.push(item.key());
                    }
                });
                keys.iter().for_each(|key| self.stage_remove(tx, key));
                keys
            }
        };
        Ok(keys.len() as u64)
    }
}

impl<T: Entity> Store<T> for MemoryTable<T> {
    async fn scan(&self, filter: Option<&Filter<T>>, tx: Option<TxToken>) -> RepositoryResult<Vec<T>> {
        self.scan_now(filter, tx)
    }

    async fn count(&self, filter: Option<&Filter<T>>, tx: Option<TxToken>) -> RepositoryResult<u64> {
        self.count_now(filter, tx)
    }

    async fn get(&self, key: &T::Key, tx: Option<TxToken>) -> RepositoryResult<Option<T>> {
        self.get_now(key, tx)
    }

    async fn insert(&self, item: T, tx: Option<TxToken>) -> RepositoryResult<()> {
        self.insert_now(vec![item], tx)
    }

    async fn insert_many(&self, items: Vec<T>, tx: Option<TxToken>) -> RepositoryResult<()> {
        self.insert_now(items, tx)
    }

    async fn replace(&self, item: T, tx: Option<TxToken>) -> RepositoryResult<()> {
        self.replace_now(item, tx)
    }

    async fn remove(&self, key: &T::Key, tx: Option<TxToken>) -> RepositoryResult<()> {
        self.remove_now(key, tx)
    }

    async fn remove_where(&self, filter: &Filter<T>, tx: Option<TxToken>) -> RepositoryResult<u64> {
        self.remove_where_now(filter, tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{RepositoryErrorKind, Schema};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: u32,
        text: String,
    }

    impl Entity for Note {
        type Key = u32;
        const NAME: &'static str = "Note";

        fn key(&self) -> u32 {
            self.id
        }

        fn schema() -> Schema<Self> {
            Schema::builder(Self::NAME).property("id", |n: &Note| n.id).build()
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tag {
        name: String,
    }

    impl Entity for Tag {
        type Key = String;
        const NAME: &'static str = "Tag";

        fn key(&self) -> String {
            self.name.clone()
        }

        fn schema() -> Schema<Self> {
            Schema::builder(Self::NAME).property("name", |t: &Tag| t.name.clone()).build()
        }
    }

    fn note(id: u32, text: &str) -> Note {
        Note {
            id,
            text: text.to_string(),
        }
    }

    fn tag(name: &str) -> Tag {
        Tag { name: name.to_string() }
    }

    #[tokio::test]
    async fn test_autocommit_crud() {
        let db = MemoryDatabase::new();
        let notes = db.table::<Note>();

        notes.insert(note(2, "b"), None).await.unwrap();
        notes.insert(note(1, "a"), None).await.unwrap();
        assert_eq!(notes.len(), 2);

        // key order regardless of insertion order
        let all = notes.scan(None, None).await.unwrap();
        assert_eq!(all, vec![note(1, "a"), note(2, "b")]);

        notes.replace(note(1, "A"), None).await.unwrap();
        assert_eq!(notes.get(&1, None).await.unwrap(), Some(note(1, "A")));

        notes.remove(&1, None).await.unwrap();
        assert_eq!(notes.get(&1, None).await.unwrap(), None);
        assert_eq!(notes.count(None, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_autocommit_errors() {
        let db = MemoryDatabase::new();
        let notes = db.table::<Note>();
        notes.insert(note(1, "a"), None).await.unwrap();

        let dup = notes.insert(note(1, "again"), None).await.unwrap_err();
        assert_eq!(dup.kind, RepositoryErrorKind::DuplicateKey);

        let missing = notes.replace(note(9, "x"), None).await.unwrap_err();
        assert_eq!(missing.kind, RepositoryErrorKind::NotFound);

        let missing = notes.remove(&9, None).await.unwrap_err();
        assert_eq!(missing.kind, RepositoryErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_insert_many_is_all_or_nothing() {
        let db = MemoryDatabase::new();
        let notes = db.table::<Note>();
        notes.insert(note(2, "b"), None).await.unwrap();

        let err = notes
            .insert_many(vec![note(1, "a"), note(2, "dup"), note(3, "c")], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::DuplicateKey);
        assert_eq!(notes.len(), 1);

        let err = notes
            .insert_many(vec![note(5, "a"), note(5, "twice")], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::DuplicateKey);
        assert_eq!(notes.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_where_counts() {
        let db = MemoryDatabase::new();
        let notes = db.table::<Note>();
        notes
            .insert_many(vec![note(1, "keep"), note(2, "drop"), note(3, "drop")], None)
            .await
            .unwrap();

        let drop = Filter::new(|n: &Note| n.text == "drop");
        assert_eq!(notes.remove_where(&drop, None).await.unwrap(), 2);
        assert_eq!(notes.remove_where(&drop, None).await.unwrap(), 0);
        assert_eq!(notes.len(), 1);
    }

    #[tokio::test]
    async fn test_transaction_writes_are_private_until_commit() {
        let db = MemoryDatabase::new();
        let notes = db.table::<Note>();
        notes.insert(note(1, "a"), None).await.unwrap();

        let tx = db.begin(IsolationLevel::ReadCommitted).await.unwrap();
        notes.insert(note(2, "b"), Some(tx)).await.unwrap();
        notes.replace(note(1, "A"), Some(tx)).await.unwrap();

        // the transaction sees its own writes
        assert_eq!(notes.count(None, Some(tx)).await.unwrap(), 2);
        assert_eq!(notes.get(&1, Some(tx)).await.unwrap(), Some(note(1, "A")));
        // everyone else does not
        assert_eq!(notes.count(None, None).await.unwrap(), 1);
        assert_eq!(notes.get(&1, None).await.unwrap(), Some(note(1, "a")));

        db.commit(tx).await.unwrap();
        assert_eq!(notes.scan(None, None).await.unwrap(), vec![note(1, "A"), note(2, "b")]);
        assert_eq!(db.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let db = MemoryDatabase::new();
        let notes = db.table::<Note>();

        let tx = db.begin(IsolationLevel::Serializable).await.unwrap();
        assert_eq!(db.isolation_level(tx), Some(IsolationLevel::Serializable));
        notes.insert(note(1, "a"), Some(tx)).await.unwrap();
        db.rollback(tx).await.unwrap();

        assert!(notes.is_empty());
        assert_eq!(db.open_transactions(), 0);

        let err = notes.insert(note(2, "b"), Some(tx)).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NoOpenTransaction);
    }

    #[tokio::test]
    async fn test_staged_insert_then_remove_cancels() {
        let db = MemoryDatabase::new();
        let notes = db.table::<Note>();

        let tx = db.begin(IsolationLevel::ReadCommitted).await.unwrap();
        notes.insert(note(1, "a"), Some(tx)).await.unwrap();
        notes.remove(&1, Some(tx)).await.unwrap();
        assert_eq!(notes.count(None, Some(tx)).await.unwrap(), 0);

        // re-inserting a removed committed row stages a replacement
        notes.insert(note(1, "b"), None).await.unwrap();
        notes.remove(&1, Some(tx)).await.unwrap();
        notes.insert(note(1, "c"), Some(tx)).await.unwrap();
        db.commit(tx).await.unwrap();

        assert_eq!(notes.scan(None, None).await.unwrap(), vec![note(1, "c")]);
    }

    #[tokio::test]
    async fn test_commit_is_atomic_across_tables() {
        let db = MemoryDatabase::new();
        let notes = db.table::<Note>();
        let tags = db.table::<Tag>();

        let tx = db.begin(IsolationLevel::ReadCommitted).await.unwrap();
        notes.insert(note(1, "a"), Some(tx)).await.unwrap();
        tags.insert(tag("rust"), Some(tx)).await.unwrap();

        // a concurrent autocommit write invalidates the staged tag insert
        tags.insert(tag("rust"), None).await.unwrap();

        let err = db.commit(tx).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::DuplicateKey);
        assert_eq!(err.operation, RepositoryOperation::Save);
        assert!(notes.is_empty());
        assert_eq!(tags.len(), 1);
        assert_eq!(db.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_storage() {
        let db = MemoryDatabase::new();
        let notes = db.table::<Note>();
        let tx = db.begin(IsolationLevel::ReadCommitted).await.unwrap();

        db.set_available(false);
        let err = notes.scan(None, None).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::StorageUnavailable);
        assert!(err.is_retriable());
        assert!(db.begin(IsolationLevel::ReadCommitted).await.is_err());
        assert!(db.commit(tx).await.is_err());

        // rollback still releases the transaction
        db.rollback(tx).await.unwrap();
        assert_eq!(db.open_transactions(), 0);

        db.set_available(true);
        assert!(notes.scan(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_discards() {
        let db = MemoryDatabase::new();
        let notes = db.table::<Note>();
        let tx = db.begin(IsolationLevel::ReadCommitted).await.unwrap();
        notes.insert(note(1, "a"), Some(tx)).await.unwrap();

        db.release(tx);
        assert_eq!(db.open_transactions(), 0);
        assert!(db.commit(tx).await.is_err());
        assert!(notes.is_empty());
    }

    #[test]
    fn test_same_table_is_shared() {
        let db = MemoryDatabase::new();
        let a = db.table::<Note>();
        let b = db.clone().table::<Note>();
        a.insert_now(vec![note(1, "a")], None).unwrap();
        assert_eq!(b.len(), 1);
    }
}
