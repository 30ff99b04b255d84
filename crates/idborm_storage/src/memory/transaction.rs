//! Transactions over the in-memory factory.

use super::store::{StoreData, StoreKey};
use super::DatabaseEntry;
use crate::backend::{NativeTransaction, TransactionMode};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use idborm_codec::{Record, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Clone, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    Aborted(String),
}

/// A transaction whose writes apply immediately and are undone on abort.
///
/// Read-write transactions on the same database are serialized: the first
/// request takes the database's write lock and holds it until the
/// transaction finishes or is dropped. Dropping an active transaction keeps
/// its writes, matching auto-commit.
pub(crate) struct MemoryTransaction {
    entry: Arc<DatabaseEntry>,
    scope: Vec<String>,
    mode: TransactionMode,
    state: TxState,
    undo: HashMap<String, StoreData>,
    write_guard: Option<OwnedMutexGuard<()>>,
}

impl MemoryTransaction {
    pub(crate) fn new(entry: Arc<DatabaseEntry>, scope: Vec<String>, mode: TransactionMode) -> Self {
        Self {
            entry,
            scope,
            mode,
            state: TxState::Active,
            undo: HashMap::new(),
            write_guard: None,
        }
    }

    async fn begin_request(&mut self, store: &str, write: bool) -> StorageResult<()> {
        tokio::task::yield_now().await;

        if self.state != TxState::Active {
            return Err(StorageError::TransactionInactive);
        }
        if !self.scope.iter().any(|s| s == store) {
            return Err(StorageError::not_found(format!(
                "object store '{store}' is not in the transaction scope"
            )));
        }
        if write && self.mode == TransactionMode::ReadOnly {
            return Err(StorageError::ReadOnly {
                store: store.to_string(),
            });
        }

        if self.mode == TransactionMode::ReadWrite && self.write_guard.is_none() {
            let guard = Arc::clone(&self.entry.write_lock).lock_owned().await;
            self.write_guard = Some(guard);
        }

        if write && !self.undo.contains_key(store) {
            let snapshot = self
                .entry
                .state
                .read()
                .stores
                .get(store)
                .cloned()
                .ok_or_else(|| StorageError::not_found(store))?;
            self.undo.insert(store.to_string(), snapshot);
        }
        Ok(())
    }

    fn with_store<T>(
        &self,
        store: &str,
        f: impl FnOnce(&StoreData) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let state = self.entry.state.read();
        let data = state
            .stores
            .get(store)
            .ok_or_else(|| StorageError::not_found(store))?;
        f(data)
    }

    fn with_store_mut<T>(
        &mut self,
        store: &str,
        f: impl FnOnce(&mut StoreData) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let result = {
            let mut state = self.entry.state.write();
            match state.stores.get_mut(store) {
                Some(data) => f(data),
                None => Err(StorageError::not_found(store)),
            }
        };
        if let Err(e) = &result {
            self.rollback(e.to_string());
        }
        result
    }

    fn rollback(&mut self, reason: String) {
        {
            let mut state = self.entry.state.write();
            for (name, snapshot) in self.undo.drain() {
                state.stores.insert(name, snapshot);
            }
        }
        tracing::debug!(database = %self.entry.name, %reason, "in-memory transaction aborted");
        self.state = TxState::Aborted(reason);
        self.write_guard = None;
    }
}

#[async_trait]
impl NativeTransaction for MemoryTransaction {
    async fn get(&mut self, store: &str, key: &Value) -> StorageResult<Option<Record>> {
        self.begin_request(store, false).await?;
        let key = StoreKey::new(key.clone())?;
        self.with_store(store, |data| Ok(data.get(&key).cloned()))
    }

    async fn get_all(&mut self, store: &str) -> StorageResult<Vec<Record>> {
        self.begin_request(store, false).await?;
        self.with_store(store, |data| Ok(data.all()))
    }

    async fn add(&mut self, store: &str, record: Record) -> StorageResult<Value> {
        self.begin_request(store, true).await?;
        self.with_store_mut(store, |data| data.insert(record, false))
    }

    async fn put(&mut self, store: &str, record: Record) -> StorageResult<Value> {
        self.begin_request(store, true).await?;
        self.with_store_mut(store, |data| data.insert(record, true))
    }

    async fn delete(&mut self, store: &str, key: &Value) -> StorageResult<()> {
        self.begin_request(store, true).await?;
        let key = key.clone();
        self.with_store_mut(store, |data| {
            data.remove(&StoreKey::new(key)?);
            Ok(())
        })
    }

    async fn clear(&mut self, store: &str) -> StorageResult<()> {
        self.begin_request(store, true).await?;
        self.with_store_mut(store, |data| {
            data.clear();
            Ok(())
        })
    }

    async fn count(&mut self, store: &str) -> StorageResult<usize> {
        self.begin_request(store, false).await?;
        self.with_store(store, |data| Ok(data.len()))
    }

    async fn commit(&mut self) -> StorageResult<()> {
        tokio::task::yield_now().await;
        match &self.state {
            TxState::Active => {
                self.state = TxState::Committed;
                self.undo.clear();
                self.write_guard = None;
                Ok(())
            }
            TxState::Aborted(reason) => Err(StorageError::aborted(reason.clone())),
            TxState::Committed => Err(StorageError::TransactionInactive),
        }
    }

    async fn abort(&mut self) {
        if self.state == TxState::Active {
            self.rollback("aborted by caller".to_string());
        }
    }
}
