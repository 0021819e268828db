//! Unit of work
//!
//! A [`UnitOfWork`] groups repository commands into one storage transaction
//! with a single commit point:
//!
//! ```text
//! Closed --open_transaction(level)--> Open --save()--> Closed (commit)
//!                                      |
//!                                      +--any failure / rollback()--> Closed (rollback)
//! ```
//!
//! While the scope is open, commands issued through repositories created by
//! [`UnitOfWork::repository`] are validated immediately and staged in call
//! order. Nothing reaches storage until [`UnitOfWork::save`], which applies
//! every staged effect inside the storage transaction and commits it. Any
//! failure while open rolls the whole scope back before the error is returned.
//!
//! A unit of work is meant for one logical caller at a time.
//!
//! # Example
//!
//! ```rust,ignore
//! let db = MemoryDatabase::new();
//! let uow = UnitOfWork::new(db.clone());
//! let users = uow.repository(db.table::<User>());
//! let audit = uow.repository(db.table::<AuditEntry>());
//!
//! uow.open_transaction(IsolationLevel::Serializable).await?;
//! users.add(user).await?;
//! audit.add(entry).await?;
//! uow.save().await?; // both or neither
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use super::blocking::BlockingUnitOfWork;
use super::error::{RepositoryError, RepositoryOperation};
use super::repo::EntityRepository;
use super::schema::{Entity, PropertyCase};
use super::store::{IsolationLevel, Store, TransactionManager, TxToken};
use super::traits::RepositoryResult;
use crate::config::{Config, PagingConfig};

/// One staged write of one entity type
pub(crate) enum Effect<T: Entity> {
    Insert(T),
    Replace(T),
    Remove(T::Key),
}

/// A staged write with the store it will be applied to
pub(crate) trait PendingEffect: Send + Sync {
    fn entity(&self) -> &'static str;

    /// The `Effect<T>` inside, for read-your-writes overlays
    fn effect(&self) -> &(dyn Any + Send + Sync);

    fn apply(self: Box<Self>, tx: TxToken) -> BoxFuture<'static, RepositoryResult<()>>;
}

pub(crate) struct StagedEffect<T: Entity, S> {
    store: S,
    effect: Effect<T>,
}

impl<T: Entity, S: Store<T> + 'static> StagedEffect<T, S> {
    pub(crate) fn boxed(store: S, effect: Effect<T>) -> Box<dyn PendingEffect> {
        Box::new(Self { store, effect })
    }
}

impl<T: Entity, S: Store<T> + 'static> PendingEffect for StagedEffect<T, S> {
    fn entity(&self) -> &'static str {
        T::NAME
    }

    fn effect(&self) -> &(dyn Any + Send + Sync) {
        &self.effect
    }

    fn apply(self: Box<Self>, tx: TxToken) -> BoxFuture<'static, RepositoryResult<()>> {
        Box::pin(async move {
            let StagedEffect { store, effect } = *self;
            match effect {
                Effect::Insert(item) => store.insert(item, Some(tx)).await,
                Effect::Replace(item) => store.replace(item, Some(tx)).await,
                Effect::Remove(key) => store.remove(&key, Some(tx)).await,
            }
        })
    }
}

struct OpenScope {
    tx: TxToken,
    level: IsolationLevel,
    opened_at: DateTime<Utc>,
    pending: Vec<Box<dyn PendingEffect>>,
}

impl OpenScope {
    fn effects<T: Entity>(&self) -> impl Iterator<Item = &Effect<T>> {
        self.pending
            .iter()
            .filter_map(|p| p.effect().downcast_ref::<Effect<T>>())
    }
}

enum ScopeState {
    Closed,
    Open(OpenScope),
}

/// Transaction scope shared by a unit of work and its repositories
pub(crate) struct Scope {
    manager: Arc<dyn TransactionManager>,
    state: Mutex<ScopeState>,
}

impl Scope {
    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_open<O>(
        &self,
        tx: TxToken,
        operation: RepositoryOperation,
        f: impl FnOnce(&mut OpenScope) -> O,
    ) -> RepositoryResult<O> {
        match &mut *self.lock() {
            ScopeState::Open(open) if open.tx == tx => Ok(f(open)),
            _ => Err(RepositoryError::no_open_transaction(operation)),
        }
    }

    /// Storage transaction of the open scope, if any
    pub(crate) fn current(&self) -> Option<TxToken> {
        match &*self.lock() {
            ScopeState::Open(open) => Some(open.tx),
            ScopeState::Closed => None,
        }
    }

    pub(crate) fn has_pending<T: Entity>(&self, tx: TxToken, operation: RepositoryOperation) -> RepositoryResult<bool> {
        self.with_open(tx, operation, |open| open.effects::<T>().next().is_some())
    }

    /// Replay pending effects over rows read inside the transaction
    ///
    /// Rows come back in key order.
    pub(crate) fn overlay<T: Entity>(
        &self,
        tx: TxToken,
        operation: RepositoryOperation,
        rows: Vec<T>,
    ) -> RepositoryResult<Vec<T>> {
        self.with_open(tx, operation, |open| {
            let mut effects = open.effects::<T>().peekable();
            if effects.peek().is_none() {
                return rows;
            }
            let mut view: BTreeMap<T::Key, T> = rows.into_iter().map(|row| (row.key(), row)).collect();
            for effect in effects {
                match effect {
                    Effect::Insert(item) | Effect::Replace(item) => {
                        view.insert(item.key(), item.clone());
                    }
                    Effect::Remove(key) => {
                        view.remove(key);
                    }
                }
            }
            view.into_values().collect()
        })
    }

    /// Latest pending state of one key: `Some(None)` if removed, `None` if untouched
    pub(crate) fn pending_row<T: Entity>(
        &self,
        tx: TxToken,
        operation: RepositoryOperation,
        key: &T::Key,
    ) -> RepositoryResult<Option<Option<T>>> {
        self.with_open(tx, operation, |open| {
            open.effects::<T>().fold(None, |state, effect| match effect {
                Effect::Insert(item) | Effect::Replace(item) if item.key() == *key => Some(Some(item.clone())),
                Effect::Remove(removed) if removed == key => Some(None),
                _ => state,
            })
        })
    }

    /// Append effects, in order, to the open scope
    pub(crate) fn stage(
        &self,
        tx: TxToken,
        operation: RepositoryOperation,
        effects: Vec<Box<dyn PendingEffect>>,
    ) -> RepositoryResult<()> {
        let staged = effects.len();
        let total = self.with_open(tx, operation, move |open| {
            open.pending.extend(effects);
            open.pending.len()
        })?;
        tracing::debug!(tx = %tx, operation = %operation, staged, pending = total, "effects staged");
        Ok(())
    }

    /// Close the scope if it still belongs to `tx`, handing back its contents
    fn close(&self, tx: Option<TxToken>) -> Option<OpenScope> {
        let mut state = self.lock();
        match &*state {
            ScopeState::Open(open) if tx.map_or(true, |tx| tx == open.tx) => {}
            _ => return None,
        }
        match std::mem::replace(&mut *state, ScopeState::Closed) {
            ScopeState::Open(open) => Some(open),
            ScopeState::Closed => None,
        }
    }

    /// Roll the scope back after a failure inside it
    pub(crate) async fn abort(&self, tx: TxToken, cause: &RepositoryError) {
        let Some(open) = self.close(Some(tx)) else {
            return;
        };
        tracing::warn!(
            tx = %tx,
            error = %cause,
            discarded = open.pending.len(),
            "rolling back unit of work after failure"
        );
        self.rollback_storage(tx).await;
    }

    async fn rollback_storage(&self, tx: TxToken) {
        let guard = ReleaseGuard::new(self.manager.as_ref(), tx);
        if let Err(err) = self.manager.rollback(tx).await {
            tracing::error!(tx = %tx, error = %err, "storage rollback failed");
        }
        guard.disarm();
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let ScopeState::Open(open) = state {
            tracing::warn!(
                tx = %open.tx,
                discarded = open.pending.len(),
                "unit of work dropped with an open transaction"
            );
            self.manager.release(open.tx);
        }
    }
}

// Releases a storage transaction if the future driving it is dropped
struct ReleaseGuard<'a> {
    manager: &'a dyn TransactionManager,
    tx: Option<TxToken>,
}

impl<'a> ReleaseGuard<'a> {
    fn new(manager: &'a dyn TransactionManager, tx: TxToken) -> Self {
        Self { manager, tx: Some(tx) }
    }

    fn disarm(mut self) {
        self.tx = None;
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::warn!(tx = %tx, "transaction abandoned, releasing");
            self.manager.release(tx);
        }
    }
}

/// Coordinates one transaction across any number of repositories
#[derive(Clone)]
pub struct UnitOfWork {
    scope: Arc<Scope>,
    default_isolation: IsolationLevel,
    paging: PagingConfig,
    case: PropertyCase,
}

impl UnitOfWork {
    /// Unit of work over a transaction manager
    pub fn new(manager: impl TransactionManager + 'static) -> Self {
        Self::from_shared(Arc::new(manager))
    }

    /// Unit of work over a shared transaction manager
    pub fn from_shared(manager: Arc<dyn TransactionManager>) -> Self {
        Self {
            scope: Arc::new(Scope {
                manager,
                state: Mutex::new(ScopeState::Closed),
            }),
            default_isolation: IsolationLevel::default(),
            paging: PagingConfig::default(),
            case: PropertyCase::default(),
        }
    }

    /// Apply transaction, paging and property settings
    ///
    /// Repositories created afterwards inherit the paging and property settings.
    #[must_use]
    pub fn with_config(mut self, config: &Config) -> Self {
        self.default_isolation = config.transactions.default_isolation;
        self.paging = config.paging;
        self.case = config.property_case();
        self
    }

    /// Repository over `store` that takes part in this unit of work
    pub fn repository<T, S>(&self, store: S) -> EntityRepository<T, S>
    where
        T: Entity,
        S: Store<T> + Clone + 'static,
    {
        EntityRepository::new(store)
            .with_paging(self.paging)
            .with_property_case(self.case)
            .bind(Arc::clone(&self.scope))
    }

    /// Open a transaction at `level`
    ///
    /// # Errors
    ///
    /// `TransactionAlreadyOpen` if a scope is open; storage errors from `begin`.
    pub async fn open_transaction(&self, level: IsolationLevel) -> RepositoryResult<()> {
        if self.is_open() {
            return Err(RepositoryError::transaction_already_open());
        }

        let tx = self
            .scope
            .manager
            .begin(level)
            .await
            .map_err(|e| e.with_operation(RepositoryOperation::OpenTransaction))?;
        let guard = ReleaseGuard::new(self.scope.manager.as_ref(), tx);

        {
            let mut state = self.scope.lock();
            if matches!(*state, ScopeState::Open(_)) {
                // Another caller opened a scope while we were beginning ours
                return Err(RepositoryError::transaction_already_open());
            }
            *state = ScopeState::Open(OpenScope {
                tx,
                level,
                opened_at: Utc::now(),
                pending: Vec::new(),
            });
        }
        guard.disarm();

        tracing::debug!(tx = %tx, isolation = %level, "unit of work opened");
        Ok(())
    }

    /// Open a transaction at the configured default isolation level
    pub async fn open_default_transaction(&self) -> RepositoryResult<()> {
        self.open_transaction(self.default_isolation).await
    }

    /// Apply every staged effect and commit, atomically
    ///
    /// The scope is closed afterwards whether or not the commit succeeded.
    ///
    /// # Errors
    ///
    /// `NoOpenTransaction` if no scope is open. Any error applying an effect
    /// or committing rolls everything back and is returned unchanged (tagged
    /// with the `save` operation).
    pub async fn save(&self) -> RepositoryResult<()> {
        let Some(open) = self.scope.close(None) else {
            return Err(RepositoryError::no_open_transaction(RepositoryOperation::Save));
        };
        let OpenScope {
            tx,
            level,
            opened_at,
            pending,
        } = open;
        let manager = self.scope.manager.as_ref();
        let guard = ReleaseGuard::new(manager, tx);
        let effects = pending.len();

        for effect in pending {
            let entity = effect.entity();
            if let Err(err) = effect.apply(tx).await {
                let err = err.with_operation(RepositoryOperation::Save);
                tracing::warn!(tx = %tx, entity, error = %err, "staged effect failed, rolling back");
                guard.disarm();
                self.scope.rollback_storage(tx).await;
                return Err(err);
            }
        }

        if let Err(err) = manager.commit(tx).await {
            let err = err.with_operation(RepositoryOperation::Save);
            tracing::warn!(tx = %tx, error = %err, "commit failed, rolling back");
            guard.disarm();
            self.scope.rollback_storage(tx).await;
            return Err(err);
        }
        guard.disarm();

        tracing::info!(
            tx = %tx,
            isolation = %level,
            effects,
            elapsed_ms = (Utc::now() - opened_at).num_milliseconds(),
            "unit of work committed"
        );
        Ok(())
    }

    /// Discard every staged effect and roll the storage transaction back
    ///
    /// # Errors
    ///
    /// `NoOpenTransaction` if no scope is open.
    pub async fn rollback(&self) -> RepositoryResult<()> {
        let Some(open) = self.scope.close(None) else {
            return Err(RepositoryError::no_open_transaction(RepositoryOperation::Rollback));
        };
        tracing::debug!(tx = %open.tx, discarded = open.pending.len(), "unit of work rolled back");
        self.scope.rollback_storage(open.tx).await;
        Ok(())
    }

    /// Whether a scope is open
    pub fn is_open(&self) -> bool {
        self.scope.current().is_some()
    }

    /// Isolation level of the open scope
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        match &*self.scope.lock() {
            ScopeState::Open(open) => Some(open.level),
            ScopeState::Closed => None,
        }
    }

    /// Storage transaction of the open scope
    pub fn transaction(&self) -> Option<TxToken> {
        self.scope.current()
    }

    /// Number of staged effects in the open scope
    pub fn pending_changes(&self) -> usize {
        match &*self.scope.lock() {
            ScopeState::Open(open) => open.pending.len(),
            ScopeState::Closed => 0,
        }
    }

    /// Blocking forms of the scope operations
    pub fn blocking(&self) -> BlockingUnitOfWork<'_> {
        BlockingUnitOfWork::new(self)
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("transaction", &self.transaction())
            .field("isolation_level", &self.isolation_level())
            .field("pending_changes", &self.pending_changes())
            .field("default_isolation", &self.default_isolation)
            .finish()
    }
}
