//! In-memory object store for testing.

mod store;
mod transaction;
mod upgrade;

use crate::backend::{
    NativeDatabase, NativeTransaction, StoreFactory, TransactionMode, UpgradeHandler,
};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use transaction::MemoryTransaction;
use upgrade::{DatabaseState, MemoryVersionChange};

/// Counters describing what a factory has been asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactoryStats {
    /// Successful and failed `open` calls.
    pub opens: usize,
    /// Version changes that started.
    pub upgrades_started: usize,
    /// Version changes that committed.
    pub upgrades_completed: usize,
    /// Highest number of version changes running at the same time.
    pub max_concurrent_upgrades: usize,
}

#[derive(Debug, Default)]
struct Counters {
    stats: FactoryStats,
    running_upgrades: usize,
}

pub(crate) struct DatabaseEntry {
    pub(crate) name: String,
    pub(crate) state: RwLock<DatabaseState>,
    pub(crate) open_connections: AtomicUsize,
    pub(crate) write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl DatabaseEntry {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(DatabaseState::default()),
            open_connections: AtomicUsize::new(0),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

#[derive(Default)]
struct FactoryInner {
    databases: Mutex<HashMap<String, Arc<DatabaseEntry>>>,
    counters: Mutex<Counters>,
}

/// An in-memory object store factory.
///
/// Behaves like a browser object store closely enough to test the backend
/// against it: versioned schema changes, auto-increment keys, unique
/// indexes, transaction rollback, and blocked upgrades or deletions while
/// other connections are open. Nothing is persisted.
///
/// Clones share the same databases.
///
/// # Example
///
/// ```rust
/// use idborm_storage::{InMemoryFactory, StoreFactory};
///
/// # tokio_test_block_on(async {
/// let factory = InMemoryFactory::new();
/// let db = factory.open("app", None, None).await.unwrap();
/// assert_eq!(db.version(), 1);
/// db.close();
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryFactory {
    inner: Arc<FactoryInner>,
}

impl InMemoryFactory {
    /// Creates a factory with no databases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counters recorded so far.
    pub fn stats(&self) -> FactoryStats {
        self.inner.counters.lock().stats
    }

    /// Names of the existing databases, sorted.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.databases.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stored version of a database, if it exists.
    pub fn version_of(&self, name: &str) -> Option<u32> {
        self.entry(name).map(|e| e.state.read().version)
    }

    /// Number of open connections to a database.
    pub fn open_connections(&self, name: &str) -> usize {
        self.entry(name)
            .map_or(0, |e| e.open_connections.load(Ordering::SeqCst))
    }

    fn entry(&self, name: &str) -> Option<Arc<DatabaseEntry>> {
        self.inner.databases.lock().get(name).cloned()
    }

    fn entry_or_create(&self, name: &str) -> Arc<DatabaseEntry> {
        Arc::clone(
            self.inner
                .databases
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(DatabaseEntry::new(name))),
        )
    }

    fn upgrade_started(&self) {
        let mut counters = self.inner.counters.lock();
        counters.running_upgrades += 1;
        counters.stats.upgrades_started += 1;
        counters.stats.max_concurrent_upgrades = counters
            .stats
            .max_concurrent_upgrades
            .max(counters.running_upgrades);
    }

    fn upgrade_finished(&self, committed: bool) {
        let mut counters = self.inner.counters.lock();
        counters.running_upgrades = counters.running_upgrades.saturating_sub(1);
        if committed {
            counters.stats.upgrades_completed += 1;
        }
    }

    async fn run_upgrade(
        &self,
        entry: &DatabaseEntry,
        current: u32,
        target: u32,
        on_upgrade: Option<UpgradeHandler>,
    ) -> StorageResult<()> {
        self.upgrade_started();
        let staged = entry.state.read().clone();

        // Let other tasks run while the version change is in flight.
        tokio::task::yield_now().await;

        let mut change = MemoryVersionChange::new(staged, target);
        let result = match on_upgrade {
            Some(handler) => handler(&mut change),
            None => Ok(()),
        };

        let result = result.and_then(|()| {
            let mut state = entry.state.write();
            if state.version != current {
                return Err(StorageError::invalid_state(format!(
                    "database '{}' changed version during upgrade",
                    entry.name
                )));
            }
            change.staged.version = target;
            *state = change.staged;
            Ok(())
        });

        self.upgrade_finished(result.is_ok());
        match &result {
            Ok(()) => tracing::debug!(database = %entry.name, from = current, to = target, "upgrade committed"),
            Err(e) => tracing::debug!(database = %entry.name, error = %e, "upgrade rolled back"),
        }
        result
    }
}

#[async_trait]
impl StoreFactory for InMemoryFactory {
    async fn open(
        &self,
        name: &str,
        version: Option<u32>,
        on_upgrade: Option<UpgradeHandler>,
    ) -> StorageResult<Arc<dyn NativeDatabase>> {
        tokio::task::yield_now().await;
        self.inner.counters.lock().stats.opens += 1;

        let entry = self.entry_or_create(name);
        let current = entry.state.read().version;
        let target = match version {
            Some(0) => return Err(StorageError::data("version must be positive")),
            Some(v) => v,
            None => current.max(1),
        };

        if target < current {
            return Err(StorageError::VersionError {
                requested: target,
                current,
            });
        }

        if target > current {
            let connections = entry.open_connections.load(Ordering::SeqCst);
            if connections > 0 {
                return Err(StorageError::Blocked {
                    name: name.to_string(),
                    connections,
                });
            }
            self.run_upgrade(&entry, current, target, on_upgrade).await?;
        }

        entry.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryDatabase {
            entry,
            version: target,
            closed: AtomicBool::new(false),
        }))
    }

    async fn delete_database(&self, name: &str) -> StorageResult<()> {
        tokio::task::yield_now().await;
        let mut databases = self.inner.databases.lock();
        if let Some(entry) = databases.get(name) {
            let connections = entry.open_connections.load(Ordering::SeqCst);
            if connections > 0 {
                return Err(StorageError::Blocked {
                    name: name.to_string(),
                    connections,
                });
            }
            databases.remove(name);
            tracing::debug!(database = %name, "in-memory database deleted");
        }
        Ok(())
    }
}

struct MemoryDatabase {
    entry: Arc<DatabaseEntry>,
    version: u32,
    closed: AtomicBool,
}

impl NativeDatabase for MemoryDatabase {
    fn name(&self) -> &str {
        &self.entry.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn object_store_names(&self) -> Vec<String> {
        self.entry.state.read().stores.keys().cloned().collect()
    }

    fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> StorageResult<Box<dyn NativeTransaction>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::invalid_state("connection is closed"));
        }
        if stores.is_empty() {
            return Err(StorageError::invalid_state("transaction scope is empty"));
        }
        {
            let state = self.entry.state.read();
            if let Some(missing) = stores.iter().find(|s| !state.stores.contains_key(*s)) {
                return Err(StorageError::not_found(missing.clone()));
            }
        }
        Ok(Box::new(MemoryTransaction::new(
            Arc::clone(&self.entry),
            stores.to_vec(),
            mode,
        )))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.entry.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        self.close();
    }
}
