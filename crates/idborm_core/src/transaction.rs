//! Transaction Wrapper.
//!
//! Writes are queued and only reach the store on [`Transaction::commit`],
//! which issues all of them inside one native read-write transaction.
//! [`Transaction::rollback`] discards the queue without opening a native
//! transaction: nothing was written, so there is nothing to undo.

use crate::connection::ConnectionManager;
use crate::crud::write_record;
use crate::error::{BackendError, BackendResult};
use idborm_codec::{Record, Value};
use idborm_storage::TransactionMode;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting operations.
    Active,
    /// Committed successfully.
    Committed,
    /// Discarded by `rollback()`.
    RolledBack,
    /// Commit failed; nothing was written.
    Failed,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Failed => "failed",
        })
    }
}

/// A write waiting for commit.
#[derive(Debug, Clone, PartialEq)]
pub enum QueuedWrite {
    /// Upsert a record, or add it when it has no id.
    Put {
        /// Target collection.
        collection: String,
        /// Record to write.
        record: Record,
    },
    /// Remove the record stored under `id`.
    Delete {
        /// Target collection.
        collection: String,
        /// Key of the record.
        id: Value,
    },
}

impl QueuedWrite {
    fn collection(&self) -> &str {
        match self {
            Self::Put { collection, .. } | Self::Delete { collection, .. } => collection,
        }
    }
}

/// Batches writes into a single atomic native commit.
///
/// Separate wrappers commit as independent native transactions. Once
/// committed, rolled back, or failed, every further call fails with
/// [`BackendError::TransactionInactive`].
pub struct Transaction {
    connection: Arc<ConnectionManager>,
    queue: Vec<QueuedWrite>,
    state: TransactionState,
}

impl Transaction {
    pub(crate) fn new(connection: Arc<ConnectionManager>) -> Self {
        Self {
            connection,
            queue: Vec::new(),
            state: TransactionState::Active,
        }
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true while operations can be queued.
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Queued writes, in order.
    pub fn queued(&self) -> &[QueuedWrite] {
        &self.queue
    }

    fn ensure_active(&self) -> BackendResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(BackendError::TransactionInactive { state: self.state })
        }
    }

    /// Queues an upsert.
    pub fn put(&mut self, collection: impl Into<String>, record: Record) -> BackendResult<()> {
        self.ensure_active()?;
        self.queue.push(QueuedWrite::Put {
            collection: collection.into(),
            record,
        });
        Ok(())
    }

    /// Queues a delete.
    pub fn delete(&mut self, collection: impl Into<String>, id: impl Into<Value>) -> BackendResult<()> {
        self.ensure_active()?;
        let id = id.into();
        if id.is_null() {
            return Err(BackendError::missing_primary_key("delete"));
        }
        self.queue.push(QueuedWrite::Delete {
            collection: collection.into(),
            id,
        });
        Ok(())
    }

    /// Writes every queued operation in one native transaction.
    ///
    /// Returns the written records with their resolved ids, in queue order.
    /// Missing collections are created first. On failure the native
    /// transaction is aborted and nothing is written.
    pub async fn commit(&mut self) -> BackendResult<Vec<Record>> {
        self.ensure_active()?;
        let queue = std::mem::take(&mut self.queue);
        match self.commit_queue(&queue).await {
            Ok(written) => {
                self.state = TransactionState::Committed;
                debug!(operations = queue.len(), "transaction committed");
                Ok(written)
            }
            Err(e) => {
                self.state = TransactionState::Failed;
                warn!(operations = queue.len(), error = %e, "transaction failed");
                Err(e)
            }
        }
    }

    async fn commit_queue(&self, queue: &[QueuedWrite]) -> BackendResult<Vec<Record>> {
        if queue.is_empty() {
            return Ok(Vec::new());
        }

        let collections: Vec<String> = queue
            .iter()
            .map(|op| op.collection().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.connection.ensure_collections(&collections).await?;

        let session = self.connection.session().await?;
        let mut tx = session.transaction(&collections, TransactionMode::ReadWrite)?;

        let issued = async {
            let mut written = Vec::new();
            for op in queue {
                match op {
                    QueuedWrite::Put { collection, record } => {
                        written.push(write_record(tx.as_mut(), collection, record.clone()).await?);
                    }
                    QueuedWrite::Delete { collection, id } => {
                        tx.delete(collection, id).await?;
                    }
                }
            }
            Ok::<_, BackendError>(written)
        }
        .await;

        match issued {
            Ok(written) => {
                tx.commit().await?;
                Ok(written)
            }
            Err(e) => {
                tx.abort().await;
                Err(e)
            }
        }
    }

    /// Discards the queued operations. Nothing reaches the store.
    pub fn rollback(&mut self) -> BackendResult<()> {
        self.ensure_active()?;
        debug!(discarded = self.queue.len(), "transaction rolled back");
        self.queue.clear();
        self.state = TransactionState::RolledBack;
        Ok(())
    }
}
