//! # idborm Storage
//!
//! Native object store client traits and an in-memory implementation.
//!
//! The backend never talks to a global object store. It is handed a
//! [`StoreFactory`] and goes through the connection, transaction and version
//! change handles that factory produces.
//!
//! ## Design Principles
//!
//! - Structural changes (stores, indexes) happen only inside a version change
//! - Every request is asynchronous and scoped to a transaction
//! - A failed request aborts its read-write transaction
//! - Implementations must be `Send + Sync` to be shared across tasks
//!
//! ## Available Factories
//!
//! - [`InMemoryFactory`] - For tests and ephemeral databases
//!
//! ## Example
//!
//! ```rust
//! use idborm_codec::Record;
//! use idborm_storage::{
//!     InMemoryFactory, ObjectStoreParams, StoreFactory, TransactionMode, VersionChange,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let factory = InMemoryFactory::new();
//! let db = factory
//!     .open(
//!         "app",
//!         Some(1),
//!         Some(Box::new(|change: &mut dyn VersionChange| {
//!             change.create_object_store("posts", ObjectStoreParams::new("id").auto_increment())
//!         })),
//!     )
//!     .await
//!     .unwrap();
//!
//! let mut tx = db.transaction(&["posts".to_string()], TransactionMode::ReadWrite).unwrap();
//! let key = tx.add("posts", Record::new().with("title", "A")).await.unwrap();
//! tx.commit().await.unwrap();
//! assert_eq!(key, 1i64.into());
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;

pub use backend::{
    IndexParams, NativeDatabase, NativeTransaction, ObjectStoreParams, StoreFactory,
    TransactionMode, UpgradeHandler, VersionChange,
};
pub use error::{StorageError, StorageResult};
pub use memory::{FactoryStats, InMemoryFactory};
