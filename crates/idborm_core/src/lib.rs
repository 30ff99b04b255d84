//! # idborm Core
//!
//! An ORM storage backend on top of a versioned, schema-less object store.
//!
//! The object store only offers keyed get/put/delete, cursor scans and
//! structural changes inside version upgrades. This crate turns that into
//! the contract an ORM expects: filtered, ordered and paginated queries,
//! aggregates, unique fields, batched transactions and lazily created
//! collections.
//!
//! ## Components
//!
//! - [`ConnectionManager`] - connect / disconnect, and the upgrade queue
//!   that serializes every structural change
//! - [`ParsedFilter`] / [`FilterOp`] - the filter matcher
//! - [`QueryState`] - queries, run by [`Backend::execute`] as full scans
//! - CRUD and bulk operations on [`Backend`], with unique validation
//! - [`Transaction`] - queued writes committed in one native transaction
//! - [`Aggregation`] - count / sum / avg / min / max
//! - [`SchemaEditor`] - structural changes deferred to the next upgrade
//!
//! ## Example
//!
//! ```rust
//! use idborm_codec::{Record, Value};
//! use idborm_core::{Aggregation, Backend, BackendConfig, QueryState};
//! use idborm_storage::InMemoryFactory;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let backend = Backend::new(BackendConfig::new("shop"), Arc::new(InMemoryFactory::new()));
//! backend.connect().await.unwrap();
//!
//! for amount in [100i64, 200, 300] {
//!     backend.insert("orders", Record::new().with("amount", amount)).await.unwrap();
//! }
//!
//! let big = QueryState::new("orders").filter("amount__gte", 200i64).order_by("-amount");
//! assert_eq!(backend.count(&big).await.unwrap(), 2);
//!
//! let totals = backend
//!     .aggregate(&QueryState::new("orders"), &[Aggregation::sum("amount")])
//!     .await
//!     .unwrap();
//! assert_eq!(totals.get("amount__sum"), Some(&Value::Integer(600)));
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod aggregate;
mod backend;
mod config;
mod connection;
mod crud;
mod error;
mod filter;
mod query;
mod schema;
mod schema_editor;
mod transaction;

pub use aggregate::{Aggregation, ALL_FIELDS};
pub use backend::Backend;
pub use config::{BackendConfig, ENGINE};
pub use connection::{ConnectionManager, META_COLLECTION};
pub use crud::{BulkFailure, BulkResult};
pub use error::{BackendError, BackendResult};
pub use filter::{matches_all, FilterOp, ParsedFilter, LOOKUP_SEP};
pub use query::{paginate, sort_records, CompiledQuery, OrderBy, QueryState};
pub use schema::{EntitySchema, FieldSchema};
pub use schema_editor::{PendingChange, SchemaEditor};
pub use transaction::{QueuedWrite, Transaction, TransactionState};
