//! Connection Manager and Schema Upgrade Queue.
//!
//! The connection handle lives behind a fair `tokio::sync::RwLock` that
//! doubles as the upgrade queue:
//!
//! - an upgrade cycle holds the write side while it closes, reopens and
//!   upgrades the native connection
//! - every operation that touches the connection holds the read side through
//!   a [`Session`] for as long as it uses the connection
//!
//! Waiters are served in arrival order, so upgrade cycles run one at a time
//! and operations arriving during a cycle wait for it to finish.

use crate::config::BackendConfig;
use crate::error::{BackendError, BackendResult};
use crate::schema_editor::{collection_params, PendingChange};
use chrono::Utc;
use idborm_codec::{Record, Value, PRIMARY_KEY};
use idborm_storage::{
    NativeDatabase, NativeTransaction, ObjectStoreParams, StoreFactory, TransactionMode,
    UpgradeHandler, VersionChange,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

/// Collection holding backend metadata, created with the first upgrade.
pub const META_COLLECTION: &str = "_idborm_meta";

const META_KEY: &str = "schema";

/// The native connection and what is known about it.
#[derive(Default)]
struct ConnectionHandle {
    db: Option<Arc<dyn NativeDatabase>>,
    version: u32,
    collections: BTreeSet<String>,
}

impl ConnectionHandle {
    fn install(&mut self, db: Arc<dyn NativeDatabase>) {
        self.version = db.version();
        self.collections = db
            .object_store_names()
            .into_iter()
            .filter(|name| name != META_COLLECTION)
            .collect();
        self.db = Some(db);
    }

    fn reset(&mut self) {
        if let Some(db) = self.db.take() {
            db.close();
        }
        self.version = 0;
        self.collections.clear();
    }

    fn check_connected(&self) -> BackendResult<()> {
        match self.db {
            Some(_) => Ok(()),
            None => Err(BackendError::NotConnected),
        }
    }
}

/// Shared access to the connection for the length of one operation.
///
/// Upgrade cycles wait until every session has been dropped.
pub(crate) struct Session<'a> {
    handle: RwLockReadGuard<'a, ConnectionHandle>,
}

impl Session<'_> {
    pub(crate) fn has_collection(&self, name: &str) -> bool {
        self.handle.collections.contains(name)
    }

    pub(crate) fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> BackendResult<Box<dyn NativeTransaction>> {
        let db = self.handle.db.as_ref().ok_or(BackendError::NotConnected)?;
        Ok(db.transaction(stores, mode)?)
    }

    /// Reads every record of a collection, or nothing if it does not exist.
    pub(crate) async fn scan(&self, collection: &str) -> BackendResult<Vec<Record>> {
        if !self.has_collection(collection) {
            return Ok(Vec::new());
        }
        let mut tx = self.transaction(&[collection.to_string()], TransactionMode::ReadOnly)?;
        let records = tx.get_all(collection).await?;
        tx.commit().await?;
        Ok(records)
    }
}

/// Owns the native connection and serializes structural changes.
pub struct ConnectionManager {
    factory: Arc<dyn StoreFactory>,
    config: BackendConfig,
    handle: RwLock<ConnectionHandle>,
    pending: Mutex<Vec<PendingChange>>,
}

impl ConnectionManager {
    pub(crate) fn new(config: BackendConfig, factory: Arc<dyn StoreFactory>) -> Self {
        Self {
            factory,
            config,
            handle: RwLock::new(ConnectionHandle::default()),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub(crate) fn factory(&self) -> &Arc<dyn StoreFactory> {
        &self.factory
    }

    /// Opens the database. Does nothing if already connected.
    ///
    /// The database is first opened without a version to learn the stored
    /// version, then reopened at that version or the configured one,
    /// whichever is higher.
    pub async fn connect(&self) -> BackendResult<()> {
        let mut handle = self.handle.write().await;
        if handle.db.is_some() {
            return Ok(());
        }

        let name = self.config.name.as_str();
        let probe = self.factory.open(name, None, None).await?;
        let current = probe.version();
        probe.close();
        drop(probe);

        let target = self.config.target_version(current);
        if target > current {
            let pending = self.take_pending();
            let on_upgrade = upgrade_handler(Vec::new(), pending.clone());
            match self.factory.open(name, Some(target), Some(on_upgrade)).await {
                Ok(db) => handle.install(db),
                Err(e) => {
                    self.restore_pending(pending);
                    return Err(e.into());
                }
            }
            self.write_metadata(&handle).await?;
        } else {
            let db = self.factory.open(name, Some(target), None).await?;
            handle.install(db);
        }

        info!(
            database = %name,
            version = handle.version,
            collections = handle.collections.len(),
            "connected"
        );
        Ok(())
    }

    /// Closes the database and forgets the known collections.
    pub async fn disconnect(&self) {
        let mut handle = self.handle.write().await;
        if handle.db.is_some() {
            handle.reset();
            info!(database = %self.config.name, "disconnected");
        }
    }

    /// Returns true while connected.
    pub async fn is_connected(&self) -> bool {
        self.handle.read().await.db.is_some()
    }

    /// Version of the open connection, 0 when disconnected.
    pub async fn version(&self) -> u32 {
        self.handle.read().await.version
    }

    /// Names of the known collections, sorted.
    pub async fn collections(&self) -> Vec<String> {
        self.handle.read().await.collections.iter().cloned().collect()
    }

    /// Waits for any in-flight upgrade and returns a session on the
    /// connection.
    pub(crate) async fn session(&self) -> BackendResult<Session<'_>> {
        let handle = self.handle.read().await;
        handle.check_connected()?;
        Ok(Session { handle })
    }

    /// Makes sure a collection exists, running an upgrade cycle if needed.
    pub async fn ensure_collection(&self, name: &str) -> BackendResult<()> {
        self.ensure_collections(&[name.to_string()]).await
    }

    /// Makes sure every named collection exists, creating the missing ones
    /// in a single upgrade cycle.
    pub async fn ensure_collections(&self, names: &[String]) -> BackendResult<()> {
        for name in names {
            validate_collection_name(name)?;
        }

        {
            let handle = self.handle.read().await;
            handle.check_connected()?;
            if names.iter().all(|n| handle.collections.contains(n)) {
                return Ok(());
            }
        }

        let mut handle = self.handle.write().await;
        handle.check_connected()?;
        // An earlier cycle may have created them while this one was queued.
        let missing: Vec<String> = names
            .iter()
            .filter(|n| !handle.collections.contains(*n))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        self.upgrade(&mut handle, missing).await
    }

    /// Runs an upgrade cycle if schema changes are pending.
    pub(crate) async fn apply_pending(&self) -> BackendResult<bool> {
        let mut handle = self.handle.write().await;
        handle.check_connected()?;
        if self.pending.lock().is_empty() {
            return Ok(false);
        }
        self.upgrade(&mut handle, Vec::new()).await?;
        Ok(true)
    }

    pub(crate) fn queue_change(&self, change: PendingChange) {
        debug!(?change, "schema change queued");
        self.pending.lock().push(change);
    }

    pub(crate) fn pending_changes(&self) -> Vec<PendingChange> {
        self.pending.lock().clone()
    }

    fn take_pending(&self) -> Vec<PendingChange> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Puts changes back ahead of any queued while they were being applied.
    fn restore_pending(&self, changes: Vec<PendingChange>) {
        let mut pending = self.pending.lock();
        let newer = std::mem::replace(&mut *pending, changes);
        pending.extend(newer);
    }

    /// One upgrade cycle: close, reopen at version + 1, create collections
    /// and apply pending changes inside the version change.
    async fn upgrade(
        &self,
        handle: &mut ConnectionHandle,
        create: Vec<String>,
    ) -> BackendResult<()> {
        let db = handle.db.take().ok_or(BackendError::NotConnected)?;
        let name = self.config.name.as_str();
        let from = handle.version;
        let to = from.saturating_add(1);
        let pending = self.take_pending();

        debug!(
            database = %name,
            from,
            to,
            create = ?create,
            pending = pending.len(),
            "upgrade cycle started"
        );

        db.close();
        drop(db);

        let on_upgrade = upgrade_handler(create.clone(), pending.clone());
        match self.factory.open(name, Some(to), Some(on_upgrade)).await {
            Ok(db) => {
                handle.install(db);
                info!(
                    database = %name,
                    version = to,
                    created = ?create,
                    applied = pending.len(),
                    "upgrade cycle committed"
                );
                self.write_metadata(handle).await
            }
            Err(e) => {
                warn!(database = %name, error = %e, "upgrade cycle failed");
                self.restore_pending(pending);
                match self.factory.open(name, Some(from), None).await {
                    Ok(db) => handle.install(db),
                    Err(reopen) => {
                        warn!(database = %name, error = %reopen, "reopen after failed upgrade failed");
                        handle.reset();
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Records the schema version and collections in the metadata store.
    async fn write_metadata(&self, handle: &ConnectionHandle) -> BackendResult<()> {
        let Some(db) = handle.db.as_ref() else {
            return Ok(());
        };
        let record = Record::new()
            .with(PRIMARY_KEY, META_KEY)
            .with("version", handle.version)
            .with(
                "collections",
                Value::Array(handle.collections.iter().map(|c| Value::from(c.as_str())).collect()),
            )
            .with("updated_at", Utc::now());

        let mut tx = db.transaction(&[META_COLLECTION.to_string()], TransactionMode::ReadWrite)?;
        tx.put(META_COLLECTION, record).await?;
        tx.commit().await?;
        Ok(())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.handle.get_mut().reset();
    }
}

fn validate_collection_name(name: &str) -> BackendResult<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name == META_COLLECTION {
        "name is reserved"
    } else {
        return Ok(());
    };
    Err(BackendError::InvalidCollection {
        name: name.to_string(),
        reason,
    })
}

fn upgrade_handler(create: Vec<String>, pending: Vec<PendingChange>) -> UpgradeHandler {
    Box::new(move |change: &mut dyn VersionChange| {
        // Queued drops run first so they cannot remove a collection the
        // triggering write needs.
        for c in &pending {
            c.apply(change)?;
        }
        let existing = change.object_store_names();
        for name in create.iter().filter(|n| !existing.contains(*n)) {
            change.create_object_store(name, collection_params())?;
        }
        if !existing.iter().any(|n| n == META_COLLECTION) {
            change.create_object_store(META_COLLECTION, ObjectStoreParams::new(PRIMARY_KEY))?;
        }
        Ok(())
    })
}
