//! Eager loading of related entities
//!
//! Include hints name relations registered on an entity's schema. Each
//! relation is a [`RelationLoader`] that fills in related data for a whole
//! batch of rows at once, so loading an include costs one query per relation
//! rather than one per row.
//!
//! Two batch loaders cover the common shapes:
//!
//! - [`HasMany`]: parent rows collect every child whose foreign key matches
//! - [`BelongsTo`]: child rows pick up the single parent they reference
//!
//! Both read through a [`QueryRepository`], so a loader built on a repository
//! bound to a unit of work sees that scope's pending writes.
//!
//! # Example
//!
//! ```rust,ignore
//! let orders = uow.repository(db.table::<Order>());
//! let customers = uow
//!     .repository(db.table::<Customer>())
//!     .with_relation(
//!         "orders",
//!         HasMany::new(
//!             orders.clone(),
//!             |c: &Customer| c.id,
//!             |o: &Order| o.customer_id,
//!             |c: &mut Customer, orders| c.orders = orders,
//!         ),
//!     );
//!
//! let with_orders = customers.get_all(None, &["orders"]).await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use super::expr::Filter;
use super::schema::Entity;
use super::traits::{QueryRepository, RepositoryResult};

/// Loads related data into a batch of entities
#[async_trait]
pub trait RelationLoader<T>: Send + Sync {
    /// Populate the relation on every entity in `entities`
    async fn load(&self, entities: &mut [T]) -> RepositoryResult<()>;
}

type KeyFn<E, K> = Arc<dyn Fn(&E) -> K + Send + Sync>;
type AssignFn<E, V> = Arc<dyn Fn(&mut E, V) + Send + Sync>;

/// One-to-many relation: each parent receives its children
pub struct HasMany<P, C, Q, K> {
    children: Q,
    parent_key: KeyFn<P, K>,
    foreign_key: KeyFn<C, K>,
    assign: AssignFn<P, Vec<C>>,
    _marker: PhantomData<fn() -> (P, C)>,
}

impl<P, C, Q, K> HasMany<P, C, Q, K>
where
    P: Send + Sync + 'static,
    C: Entity,
    Q: QueryRepository<C>,
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Relation matching `foreign_key(child)` against `parent_key(parent)`
    pub fn new(
        children: Q,
        parent_key: impl Fn(&P) -> K + Send + Sync + 'static,
        foreign_key: impl Fn(&C) -> K + Send + Sync + 'static,
        assign: impl Fn(&mut P, Vec<C>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            children,
            parent_key: Arc::new(parent_key),
            foreign_key: Arc::new(foreign_key),
            assign: Arc::new(assign),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<P, C, Q, K> RelationLoader<P> for HasMany<P, C, Q, K>
where
    P: Send + Sync + 'static,
    C: Entity,
    Q: QueryRepository<C>,
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    async fn load(&self, parents: &mut [P]) -> RepositoryResult<()> {
        if parents.is_empty() {
            return Ok(());
        }

        let wanted: HashSet<K> = parents.iter().map(|p| (self.parent_key)(p)).collect();
        let foreign_key = Arc::clone(&self.foreign_key);
        let filter = Filter::new(move |c: &C| wanted.contains(&foreign_key(c)));
        let children = self.children.get_all(Some(filter), &[]).await?;

        let mut groups: HashMap<K, Vec<C>> = HashMap::new();
        for child in children {
            groups.entry((self.foreign_key)(&child)).or_default().push(child);
        }

        for parent in parents.iter_mut() {
            let related = groups.get(&(self.parent_key)(parent)).cloned().unwrap_or_default();
            (self.assign)(parent, related);
        }

        tracing::trace!(entity = C::NAME, groups = groups.len(), "has-many relation loaded");
        Ok(())
    }
}

/// Many-to-one relation: each child receives the parent it references
pub struct BelongsTo<C, P: Entity, Q> {
    parents: Q,
    foreign_key: KeyFn<C, Option<P::Key>>,
    assign: AssignFn<C, Option<P>>,
}

impl<C, P, Q> BelongsTo<C, P, Q>
where
    C: Send + Sync + 'static,
    P: Entity,
    Q: QueryRepository<P>,
{
    /// Relation resolving `foreign_key(child)` against parent keys
    ///
    /// Children whose foreign key is `None`, or points at a missing parent,
    /// receive `None`.
    pub fn new(
        parents: Q,
        foreign_key: impl Fn(&C) -> Option<P::Key> + Send + Sync + 'static,
        assign: impl Fn(&mut C, Option<P>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            parents,
            foreign_key: Arc::new(foreign_key),
            assign: Arc::new(assign),
        }
    }
}

#[async_trait]
impl<C, P, Q> RelationLoader<C> for BelongsTo<C, P, Q>
where
    C: Send + Sync + 'static,
    P: Entity,
    Q: QueryRepository<P>,
{
    async fn load(&self, children: &mut [C]) -> RepositoryResult<()> {
        let wanted: HashSet<P::Key> = children.iter().filter_map(|c| (self.foreign_key)(c)).collect();

        let parents: HashMap<P::Key, P> = if wanted.is_empty() {
            HashMap::new()
        } else {
            let filter = Filter::new(move |p: &P| wanted.contains(&p.key()));
            self.parents
                .get_all(Some(filter), &[])
                .await?
                .into_iter()
                .map(|p| (p.key(), p))
                .collect()
        };

        for child in children.iter_mut() {
            let parent = (self.foreign_key)(child).and_then(|key| parents.get(&key).cloned());
            (self.assign)(child, parent);
        }
        Ok(())
    }
}
