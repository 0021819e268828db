//! # repokit
//!
//! Generic repositories with a dynamic paged-query engine and a unit of work.
//!
//! ## Features
//!
//! - **One contract per entity**: [`QueryRepository`](repository::QueryRepository)
//!   and [`CommandRepository`](repository::CommandRepository) for any
//!   [`Entity`](repository::Entity)
//! - **Dynamic paging**: sort by a property named at runtime, filter, project
//!   and page in one call
//! - **Relation includes**: batch-load related entities before filtering
//! - **Unit of work**: stage writes across repositories, commit atomically at
//!   a chosen isolation level
//! - **Blocking and non-blocking**: every operation in both forms
//! - **In-memory backend**: a transactional reference store (`memory` feature)
//!
//! ## Example
//!
//! ```rust,no_run
//! use repokit::prelude::*;
//!
//! #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
//! struct Product {
//!     id: u32,
//!     name: String,
//!     price: f64,
//! }
//!
//! impl Entity for Product {
//!     type Key = u32;
//!     const NAME: &'static str = "Product";
//!
//!     fn key(&self) -> u32 {
//!         self.id
//!     }
//!
//!     fn schema() -> Schema<Self> {
//!         Schema::builder(Self::NAME)
//!             .property("id", |p: &Product| p.id)
//!             .property("name", |p: &Product| p.name.clone())
//!             .property("price", |p: &Product| p.price)
//!             .build()
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let db = MemoryDatabase::new();
//!     let uow = UnitOfWork::new(db.clone()).with_config(&config);
//!     let products = uow.repository(db.table::<Product>());
//!
//!     uow.blocking().open_default_transaction()?;
//!     products.blocking().add(Product { id: 1, name: "lamp".into(), price: 30.0 })?;
//!     uow.blocking().save()?;
//!
//!     let cheapest = products.blocking().get_paged(
//!         "price",
//!         None,
//!         Some(PagedOptions::new().with_size(10)),
//!         &[],
//!     )?;
//!     println!("{cheapest:?}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod repository;

#[cfg(feature = "observability")]
pub mod observability;

/// Common imports
pub mod prelude {
    pub use crate::config::{Config, PagingConfig, PropertyConfig, ServiceConfig, TransactionConfig};
    pub use crate::error::{Error, Result};

    #[cfg(feature = "observability")]
    pub use crate::observability::{init_tracing, shutdown_tracing};

    pub use crate::repository::{
        BelongsTo, Blocking, BlockingUnitOfWork, CommandRepository, Entity, EntityRepository, Filter,
        FilterCondition, FilterOperator, HasMany, IsolationLevel, OrderDirection, PagedOptions, Patch,
        Projection, PropertyCase, QueryRepository, Repository, RepositoryError, RepositoryErrorKind,
        RepositoryResult, Schema, Store, TransactionManager, UnitOfWork,
    };

    #[cfg(feature = "memory")]
    pub use crate::repository::{MemoryDatabase, MemoryTable};
}
