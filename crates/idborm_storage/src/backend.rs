//! Native object store client traits.
//!
//! These traits are the capability-scoped replacement for the browser's
//! global object store API. The backend receives an `Arc<dyn StoreFactory>`
//! and never reaches for ambient runtime state, which keeps it testable
//! against [`super::InMemoryFactory`].

use crate::error::StorageResult;
use async_trait::async_trait;
use idborm_codec::{Record, Value};
use std::sync::Arc;

/// Access mode of a native transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

/// Parameters for creating an object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStoreParams {
    /// Field holding the primary key of each record.
    pub key_path: String,
    /// Whether missing keys are generated from a per-store counter.
    pub auto_increment: bool,
}

impl ObjectStoreParams {
    /// Creates parameters keyed by `key_path`.
    pub fn new(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            auto_increment: false,
        }
    }

    /// Enables key generation.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// Parameters for creating an index on an object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexParams {
    /// Name of the index.
    pub name: String,
    /// Indexed fields. More than one field makes a compound index.
    pub key_path: Vec<String>,
    /// Whether the index rejects duplicate keys.
    pub unique: bool,
}

/// Structural operations, only available inside a version change.
///
/// An implementation applies everything done through this handle atomically
/// with the version bump: if the upgrade callback fails, none of it sticks.
pub trait VersionChange: Send {
    /// Version before the upgrade (0 for a new database).
    fn old_version(&self) -> u32;

    /// Version being upgraded to.
    fn new_version(&self) -> u32;

    /// Names of the object stores present at this point of the upgrade.
    fn object_store_names(&self) -> Vec<String>;

    /// Creates an object store.
    ///
    /// # Errors
    ///
    /// Fails with a constraint error if the store already exists.
    fn create_object_store(&mut self, name: &str, params: ObjectStoreParams) -> StorageResult<()>;

    /// Deletes an object store and all of its records.
    ///
    /// # Errors
    ///
    /// Fails with not found if the store does not exist.
    fn delete_object_store(&mut self, name: &str) -> StorageResult<()>;

    /// Names of the indexes defined on a store.
    fn index_names(&self, store: &str) -> StorageResult<Vec<String>>;

    /// Creates an index on a store.
    ///
    /// # Errors
    ///
    /// Fails if the store is missing, the index exists, or a unique index
    /// cannot be built because existing records already collide.
    fn create_index(&mut self, store: &str, index: IndexParams) -> StorageResult<()>;

    /// Deletes an index from a store.
    fn delete_index(&mut self, store: &str, name: &str) -> StorageResult<()>;
}

/// Callback run inside the version change of an [`StoreFactory::open`].
pub type UpgradeHandler = Box<dyn FnOnce(&mut dyn VersionChange) -> StorageResult<()> + Send>;

/// Entry point of a native object store: opens and deletes databases.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    /// Opens a database.
    ///
    /// With `version = None` the database is opened at its current version,
    /// creating it at version 1 if it does not exist. A version higher than
    /// the stored one runs `on_upgrade` inside a version change first.
    ///
    /// # Errors
    ///
    /// - `VersionError` if `version` is lower than the stored version
    /// - `Blocked` if an upgrade is needed while other connections are open
    /// - any error returned by `on_upgrade`
    async fn open(
        &self,
        name: &str,
        version: Option<u32>,
        on_upgrade: Option<UpgradeHandler>,
    ) -> StorageResult<Arc<dyn NativeDatabase>>;

    /// Deletes a database. Deleting a missing database succeeds.
    ///
    /// # Errors
    ///
    /// Returns `Blocked` while connections to the database remain open.
    async fn delete_database(&self, name: &str) -> StorageResult<()>;
}

/// An open connection to a native database.
pub trait NativeDatabase: Send + Sync {
    /// Name of the database.
    fn name(&self) -> &str;

    /// Version the connection was opened at.
    fn version(&self) -> u32;

    /// Names of the object stores.
    fn object_store_names(&self) -> Vec<String>;

    /// Starts a transaction spanning exactly `stores`.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidState` on a closed connection and `NotFound` if a
    /// store does not exist.
    fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> StorageResult<Box<dyn NativeTransaction>>;

    /// Closes the connection. Closing twice is a no-op.
    fn close(&self);
}

/// A native transaction.
///
/// Every request is asynchronous. A request that fails inside a read-write
/// transaction aborts the whole transaction, undoing its earlier writes.
#[async_trait]
pub trait NativeTransaction: Send {
    /// Reads the record stored under `key`.
    async fn get(&mut self, store: &str, key: &Value) -> StorageResult<Option<Record>>;

    /// Reads every record of a store in key order, as a cursor walk would.
    async fn get_all(&mut self, store: &str) -> StorageResult<Vec<Record>>;

    /// Inserts a record, failing if its key already exists.
    ///
    /// Returns the key the record was stored under.
    async fn add(&mut self, store: &str, record: Record) -> StorageResult<Value>;

    /// Inserts or replaces a record.
    ///
    /// Returns the key the record was stored under.
    async fn put(&mut self, store: &str, record: Record) -> StorageResult<Value>;

    /// Removes the record stored under `key`. Missing keys are not an error.
    async fn delete(&mut self, store: &str, key: &Value) -> StorageResult<()>;

    /// Removes every record of a store.
    async fn clear(&mut self, store: &str) -> StorageResult<()>;

    /// Counts the records of a store.
    async fn count(&mut self, store: &str) -> StorageResult<usize>;

    /// Waits for the transaction to complete.
    ///
    /// # Errors
    ///
    /// Returns the abort reason if the transaction did not complete.
    async fn commit(&mut self) -> StorageResult<()>;

    /// Aborts the transaction and undoes its writes.
    async fn abort(&mut self);
}
