//! Planflow — plan aggregate store with optimistic concurrency and an
//! eventually consistent parent-child search index, powered by Postgres.
//!
//! The aggregate store is the source of truth; every accepted mutation
//! publishes a [`channel::ChangeEvent`] onto a durable FIFO feed, and
//! the [`indexer::DocumentIndexer`] folds those events into a
//! parent-child indexed view, including cascading deletion.

pub mod aggregates;
pub mod channel;
mod error;
pub mod fingerprint;
pub mod index;
pub mod indexer;
pub mod metrics;
pub mod model;
pub mod schema;
pub mod service;
pub mod store;
pub mod testing;
pub mod validate;

pub use error::{Error, Result, StatusKind, ValidationErrors, WithContext};
pub use schema::{SchemaConfig, SchemaManager, SchemaPlan};
pub use service::{Mutated, PlanService, Preconditions, Retrieval};
pub use store::Store;

pub mod prelude {
    pub use crate::{Error, PlanService, Preconditions, Result, Retrieval, Store};
}
