//! Schema editor: structural changes deferred to the next upgrade cycle.

use crate::connection::ConnectionManager;
use crate::error::BackendResult;
use idborm_codec::PRIMARY_KEY;
use idborm_storage::{IndexParams, ObjectStoreParams, StorageResult, VersionChange};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A structural change waiting for the next upgrade cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PendingChange {
    /// Create a collection.
    CreateCollection {
        /// Collection name.
        collection: String,
    },
    /// Drop a collection and its records.
    DropCollection {
        /// Collection name.
        collection: String,
    },
    /// Create an index.
    CreateIndex {
        /// Collection name.
        collection: String,
        /// Index name.
        index: String,
        /// Indexed fields.
        fields: Vec<String>,
        /// Whether the index rejects duplicates.
        unique: bool,
    },
    /// Drop an index.
    DropIndex {
        /// Collection name.
        collection: String,
        /// Index name.
        index: String,
    },
}

impl PendingChange {
    /// Applies the change inside a version change.
    ///
    /// Changes are idempotent: creating something that exists or dropping
    /// something that does not is skipped.
    pub(crate) fn apply(&self, change: &mut dyn VersionChange) -> StorageResult<()> {
        match self {
            Self::CreateCollection { collection } => {
                if !has_store(&*change, collection) {
                    change.create_object_store(collection, collection_params())?;
                }
            }
            Self::DropCollection { collection } => {
                if has_store(&*change, collection) {
                    change.delete_object_store(collection)?;
                }
            }
            Self::CreateIndex {
                collection,
                index,
                fields,
                unique,
            } => {
                if !has_store(&*change, collection) {
                    change.create_object_store(collection, collection_params())?;
                }
                if !change.index_names(collection)?.contains(index) {
                    change.create_index(
                        collection,
                        IndexParams {
                            name: index.clone(),
                            key_path: fields.clone(),
                            unique: *unique,
                        },
                    )?;
                }
            }
            Self::DropIndex { collection, index } => {
                if has_store(&*change, collection) && change.index_names(collection)?.contains(index)
                {
                    change.delete_index(collection, index)?;
                }
            }
        }
        Ok(())
    }
}

fn has_store(change: &dyn VersionChange, name: &str) -> bool {
    change.object_store_names().iter().any(|s| s == name)
}

/// Object store parameters for an entity collection.
pub(crate) fn collection_params() -> ObjectStoreParams {
    ObjectStoreParams::new(PRIMARY_KEY).auto_increment()
}

/// Records structural changes for the next upgrade cycle.
///
/// Nothing is applied when a method is called. Pending changes are drained
/// into the next upgrade cycle, which runs when a write needs a new
/// collection or when [`SchemaEditor::apply`] forces one.
pub struct SchemaEditor {
    connection: Arc<ConnectionManager>,
}

impl SchemaEditor {
    pub(crate) fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    /// Queues creation of a collection.
    pub fn create_collection(&self, collection: impl Into<String>) {
        self.connection.queue_change(PendingChange::CreateCollection {
            collection: collection.into(),
        });
    }

    /// Queues removal of a collection.
    pub fn drop_collection(&self, collection: impl Into<String>) {
        self.connection.queue_change(PendingChange::DropCollection {
            collection: collection.into(),
        });
    }

    /// Does nothing: records carry arbitrary fields.
    pub fn add_field(&self, _collection: &str, _field: &str) {}

    /// Does nothing: records carry arbitrary fields.
    pub fn remove_field(&self, _collection: &str, _field: &str) {}

    /// Queues creation of an index over `fields`.
    pub fn create_index<S: Into<String>>(
        &self,
        collection: impl Into<String>,
        index: impl Into<String>,
        fields: impl IntoIterator<Item = S>,
        unique: bool,
    ) {
        self.connection.queue_change(PendingChange::CreateIndex {
            collection: collection.into(),
            index: index.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            unique,
        });
    }

    /// Queues removal of an index.
    pub fn drop_index(&self, collection: impl Into<String>, index: impl Into<String>) {
        self.connection.queue_change(PendingChange::DropIndex {
            collection: collection.into(),
            index: index.into(),
        });
    }

    /// Changes waiting for the next upgrade cycle, oldest first.
    pub fn pending(&self) -> Vec<PendingChange> {
        self.connection.pending_changes()
    }

    /// Runs an upgrade cycle now if changes are pending.
    ///
    /// Returns whether a cycle ran.
    pub async fn apply(&self) -> BackendResult<bool> {
        self.connection.apply_pending().await
    }
}
