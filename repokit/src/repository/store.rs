//! Storage seam
//!
//! Repositories never talk to a database directly. They go through two
//! narrow traits:
//!
//! - [`Store`] reads and writes rows of one entity type, either in autocommit
//!   mode (`tx = None`) or inside a storage transaction
//! - [`TransactionManager`] begins, commits, and rolls back storage
//!   transactions and is shared by every store of one database
//!
//! The in-memory backend in [`crate::repository::memory`] implements both.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::expr::Filter;
use super::schema::Entity;
use super::traits::RepositoryResult;

/// Transaction isolation level
///
/// The level is passed to the storage backend unchanged. Backends without
/// native isolation document which guarantees they actually provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Dirty reads allowed
    ReadUncommitted,
    /// Only committed data is visible
    #[default]
    ReadCommitted,
    /// Rows read once read the same for the rest of the transaction
    RepeatableRead,
    /// Transactions behave as if run one after another
    Serializable,
    /// Reads see a consistent snapshot taken at the start
    Snapshot,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadUncommitted => write!(f, "read_uncommitted"),
            Self::ReadCommitted => write!(f, "read_committed"),
            Self::RepeatableRead => write!(f, "repeatable_read"),
            Self::Serializable => write!(f, "serializable"),
            Self::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Handle to one open storage transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxToken(Uuid);

impl TxToken {
    /// Generate a fresh, time-ordered token
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TxToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Begins and finishes storage transactions
///
/// Object-safe so a unit of work can hold any backend behind an `Arc`.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Begin a transaction at the given isolation level
    async fn begin(&self, level: IsolationLevel) -> RepositoryResult<TxToken>;

    /// Make every write of the transaction durable, atomically
    async fn commit(&self, tx: TxToken) -> RepositoryResult<()>;

    /// Discard every write of the transaction
    async fn rollback(&self, tx: TxToken) -> RepositoryResult<()>;

    /// Synchronously discard a transaction whose owner went away
    ///
    /// Called from `Drop` paths, where awaiting a rollback is impossible.
    fn release(&self, tx: TxToken) {
        let _ = tx;
    }
}

/// Row access for one entity type
///
/// Every method takes an optional transaction token: `None` means the call is
/// its own atomic unit against storage.
pub trait Store<T: Entity>: Send + Sync {
    /// Rows matching `filter` (all rows if `None`), in key order
    ///
    /// The filter is evaluated at most once per row.
    fn scan(
        &self,
        filter: Option<&Filter<T>>,
        tx: Option<TxToken>,
    ) -> impl Future<Output = RepositoryResult<Vec<T>>> + Send;

    /// Number of rows matching `filter`
    fn count(
        &self,
        filter: Option<&Filter<T>>,
        tx: Option<TxToken>,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send {
        async move { Ok(self.scan(filter, tx).await?.len() as u64) }
    }

    /// Whether any row matches `filter`
    fn any(
        &self,
        filter: Option<&Filter<T>>,
        tx: Option<TxToken>,
    ) -> impl Future<Output = RepositoryResult<bool>> + Send {
        async move { Ok(self.count(filter, tx).await? > 0) }
    }

    /// Row with the given key, if any
    fn get(
        &self,
        key: &T::Key,
        tx: Option<TxToken>,
    ) -> impl Future<Output = RepositoryResult<Option<T>>> + Send;

    /// Insert a new row
    ///
    /// Fails with `DuplicateKey` if the key is already present.
    fn insert(&self, item: T, tx: Option<TxToken>) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Insert several rows
    ///
    /// The default inserts one at a time and is only atomic inside a
    /// transaction. Backends that can do better should override it.
    fn insert_many(
        &self,
        items: Vec<T>,
        tx: Option<TxToken>,
    ) -> impl Future<Output = RepositoryResult<()>> + Send {
        async move {
            for item in items {
                self.insert(item, tx).await?;
            }
            Ok(())
        }
    }

    /// Replace the row with the same key
    ///
    /// Fails with `NotFound` if no such row exists.
    fn replace(&self, item: T, tx: Option<TxToken>) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Remove the row with the given key
    ///
    /// Fails with `NotFound` if no such row exists.
    fn remove(&self, key: &T::Key, tx: Option<TxToken>) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Remove every row matching `filter`, returning how many were removed
    ///
    /// The default scans then removes row by row and is only atomic inside a
    /// transaction.
    fn remove_where(
        &self,
        filter: &Filter<T>,
        tx: Option<TxToken>,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send {
        async move {
            let rows = self.scan(Some(filter), tx).await?;
            for row in &rows {
                self.remove(&row.key(), tx).await?;
            }
            Ok(rows.len() as u64)
        }
    }
}
