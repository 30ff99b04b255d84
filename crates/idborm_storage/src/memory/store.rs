//! Object store data held by the in-memory factory.

use crate::backend::{IndexParams, ObjectStoreParams};
use crate::error::{StorageError, StorageResult};
use idborm_codec::{Record, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A value that is valid as an object store key.
///
/// Numbers, dates, text, bytes and arrays of keys are valid keys. Null,
/// booleans, maps and NaN are not.
#[derive(Debug, Clone)]
pub(crate) struct StoreKey(Value);

impl StoreKey {
    pub(crate) fn new(value: Value) -> StorageResult<Self> {
        if is_valid_key(&value) {
            Ok(Self(value))
        } else {
            Err(StorageError::data(format!(
                "{} value '{}' is not a valid key",
                value.type_name(),
                value
            )))
        }
    }

    pub(crate) fn value(&self) -> &Value {
        &self.0
    }
}

fn is_valid_key(value: &Value) -> bool {
    match value {
        Value::Integer(_) | Value::Text(_) | Value::Date(_) | Value::Bytes(_) => true,
        Value::Float(x) => !x.is_nan(),
        Value::Array(items) => items.iter().all(is_valid_key),
        Value::Null | Value::Bool(_) | Value::Map(_) => false,
    }
}

impl PartialEq for StoreKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for StoreKey {}

impl PartialOrd for StoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.sort_cmp(&other.0)
    }
}

/// Records and indexes of one object store.
#[derive(Debug, Clone)]
pub(crate) struct StoreData {
    params: ObjectStoreParams,
    next_key: i64,
    records: BTreeMap<StoreKey, Record>,
    indexes: BTreeMap<String, IndexParams>,
}

impl StoreData {
    pub(crate) fn new(params: ObjectStoreParams) -> Self {
        Self {
            params,
            next_key: 1,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub(crate) fn get(&self, key: &StoreKey) -> Option<&Record> {
        self.records.get(key)
    }

    pub(crate) fn all(&self) -> Vec<Record> {
        self.records.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    pub(crate) fn remove(&mut self, key: &StoreKey) -> Option<Record> {
        self.records.remove(key)
    }

    /// Stores a record, generating its key if needed.
    ///
    /// With `overwrite == false` an existing key is a constraint error.
    pub(crate) fn insert(&mut self, mut record: Record, overwrite: bool) -> StorageResult<Value> {
        let key = self.key_for(&mut record)?;

        if !overwrite && self.records.contains_key(&key) {
            return Err(StorageError::constraint(format!(
                "key {} already exists",
                key.value()
            )));
        }

        self.check_unique_indexes(&key, &record)?;

        let value = key.value().clone();
        self.records.insert(key, record);
        Ok(value)
    }

    fn key_for(&mut self, record: &mut Record) -> StorageResult<StoreKey> {
        let key_path = self.params.key_path.as_str();
        match record.get(key_path).filter(|v| !v.is_null()) {
            Some(value) => {
                let key = StoreKey::new(value.clone())?;
                if self.params.auto_increment {
                    if let Some(n) = key.value().as_integer() {
                        if n >= self.next_key {
                            self.next_key = n.saturating_add(1);
                        }
                    }
                }
                Ok(key)
            }
            None if self.params.auto_increment => {
                let n = self.next_key;
                self.next_key = n.saturating_add(1);
                record.set(key_path, n);
                Ok(StoreKey(Value::Integer(n)))
            }
            None => Err(StorageError::data(format!(
                "record has no key at '{key_path}'"
            ))),
        }
    }

    fn check_unique_indexes(&self, key: &StoreKey, record: &Record) -> StorageResult<()> {
        for index in self.indexes.values().filter(|i| i.unique) {
            let Some(candidate) = index_key(record, &index.key_path) else {
                continue;
            };
            let taken = self.records.iter().any(|(other_key, other)| {
                other_key != key && index_key(other, &index.key_path).as_ref() == Some(&candidate)
            });
            if taken {
                return Err(StorageError::constraint(format!(
                    "unique index '{}' already contains {}",
                    index.name,
                    candidate.value()
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    pub(crate) fn create_index(&mut self, index: IndexParams) -> StorageResult<()> {
        if self.indexes.contains_key(&index.name) {
            return Err(StorageError::constraint(format!(
                "index '{}' already exists",
                index.name
            )));
        }

        if index.unique {
            let mut seen: Vec<StoreKey> = Vec::new();
            for record in self.records.values() {
                if let Some(k) = index_key(record, &index.key_path) {
                    if seen.contains(&k) {
                        return Err(StorageError::constraint(format!(
                            "cannot build unique index '{}': duplicate {}",
                            index.name,
                            k.value()
                        )));
                    }
                    seen.push(k);
                }
            }
        }

        self.indexes.insert(index.name.clone(), index);
        Ok(())
    }

    pub(crate) fn delete_index(&mut self, name: &str) -> StorageResult<()> {
        self.indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(name))
    }
}

/// Computes the key a record contributes to an index.
///
/// Records missing an indexed field, or holding an invalid key there, are
/// left out of the index.
fn index_key(record: &Record, key_path: &[String]) -> Option<StoreKey> {
    let value = match key_path {
        [single] => record.get(single)?.clone(),
        fields => Value::Array(
            fields
                .iter()
                .map(|f| record.get(f).cloned())
                .collect::<Option<Vec<_>>>()?,
        ),
    };
    StoreKey::new(value).ok()
}
