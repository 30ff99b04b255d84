//! Version change handle for the in-memory factory.

use super::store::StoreData;
use crate::backend::{IndexParams, ObjectStoreParams, VersionChange};
use crate::error::{StorageError, StorageResult};
use std::collections::BTreeMap;

/// Schema and data of one database.
#[derive(Debug, Clone, Default)]
pub(crate) struct DatabaseState {
    pub(crate) version: u32,
    pub(crate) stores: BTreeMap<String, StoreData>,
}

/// Applies structural changes to a staged copy of a database.
///
/// The factory swaps the staged copy in only when the upgrade callback
/// succeeds.
pub(crate) struct MemoryVersionChange {
    old_version: u32,
    new_version: u32,
    pub(crate) staged: DatabaseState,
}

impl MemoryVersionChange {
    pub(crate) fn new(staged: DatabaseState, new_version: u32) -> Self {
        Self {
            old_version: staged.version,
            new_version,
            staged,
        }
    }

    fn store_mut(&mut self, name: &str) -> StorageResult<&mut StoreData> {
        self.staged
            .stores
            .get_mut(name)
            .ok_or_else(|| StorageError::not_found(name))
    }
}

impl VersionChange for MemoryVersionChange {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn object_store_names(&self) -> Vec<String> {
        self.staged.stores.keys().cloned().collect()
    }

    fn create_object_store(&mut self, name: &str, params: ObjectStoreParams) -> StorageResult<()> {
        if self.staged.stores.contains_key(name) {
            return Err(StorageError::constraint(format!(
                "object store '{name}' already exists"
            )));
        }
        self.staged
            .stores
            .insert(name.to_string(), StoreData::new(params));
        Ok(())
    }

    fn delete_object_store(&mut self, name: &str) -> StorageResult<()> {
        self.staged
            .stores
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(name))
    }

    fn index_names(&self, store: &str) -> StorageResult<Vec<String>> {
        self.staged
            .stores
            .get(store)
            .map(StoreData::index_names)
            .ok_or_else(|| StorageError::not_found(store))
    }

    fn create_index(&mut self, store: &str, index: IndexParams) -> StorageResult<()> {
        self.store_mut(store)?.create_index(index)
    }

    fn delete_index(&mut self, store: &str, name: &str) -> StorageResult<()> {
        self.store_mut(store)?.delete_index(name)
    }
}
