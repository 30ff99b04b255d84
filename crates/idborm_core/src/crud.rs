//! CRUD and bulk operations with user-space uniqueness validation.
//!
//! Single-record operations each run in their own native transaction.
//! Bulk operations repeat them record by record and report per-record
//! outcomes; a failure does not undo the records written before it. Use a
//! [`crate::Transaction`] when all-or-nothing behaviour is needed.

use crate::backend::Backend;
use crate::error::{BackendError, BackendResult};
use crate::query::QueryState;
use idborm_codec::{Record, Value, PRIMARY_KEY};
use idborm_storage::{NativeTransaction, TransactionMode};
use tracing::{debug, warn};

/// A record that failed inside a bulk operation.
#[derive(Debug)]
pub struct BulkFailure {
    /// Position of the record in the input.
    pub index: usize,
    /// Why it failed.
    pub error: BackendError,
}

/// Outcome of a bulk operation.
#[derive(Debug, Default)]
pub struct BulkResult {
    /// Records written, with their resolved ids, in input order.
    pub succeeded: Vec<Record>,
    /// Records that failed.
    pub failed: Vec<BulkFailure>,
}

impl BulkResult {
    /// Returns true if every record was written.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fails if another record of the collection already holds one of the
/// record's unique values. Text compares case-insensitively; the record's
/// own stored version is ignored.
pub(crate) async fn check_unique(
    tx: &mut dyn NativeTransaction,
    collection: &str,
    unique_fields: &[String],
    record: &Record,
) -> BackendResult<()> {
    if unique_fields.is_empty() {
        return Ok(());
    }

    let existing = tx.get_all(collection).await?;
    let own_id = record.id();
    for field in unique_fields {
        let Some(value) = record.get(field).filter(|v| !v.is_null()) else {
            continue;
        };
        let conflict = existing.iter().any(|other| {
            let is_self = matches!((own_id, other.id()), (Some(a), Some(b)) if a.strict_eq(b));
            !is_self && other.get(field).is_some_and(|v| v.eq_ignore_case(value))
        });
        if conflict {
            return Err(BackendError::UniqueViolation {
                field: field.clone(),
                value: value.to_string(),
                collection: collection.to_string(),
            });
        }
    }
    Ok(())
}

/// Writes a record: upsert when it has an id, auto-increment add otherwise.
/// Returns the record with its resolved id.
pub(crate) async fn write_record(
    tx: &mut dyn NativeTransaction,
    collection: &str,
    mut record: Record,
) -> BackendResult<Record> {
    let key = if record.id().is_some() {
        tx.put(collection, record.clone()).await?
    } else {
        record.remove(PRIMARY_KEY);
        tx.add(collection, record.clone()).await?
    };
    record.set_id(key);
    Ok(record)
}

impl Backend {
    /// Inserts a record and returns it with its id.
    ///
    /// A record with an id replaces any stored record with that id.
    ///
    /// # Errors
    ///
    /// Fails with [`BackendError::UniqueViolation`] if a unique field
    /// collides with another record.
    pub async fn insert(&self, entity: &str, record: Record) -> BackendResult<Record> {
        self.save(entity, record).await
    }

    /// Replaces a stored record.
    ///
    /// # Errors
    ///
    /// Fails with [`BackendError::MissingPrimaryKey`] if the record has no id.
    pub async fn update(&self, entity: &str, record: Record) -> BackendResult<Record> {
        if record.id().is_none() {
            return Err(BackendError::missing_primary_key("update"));
        }
        self.save(entity, record).await
    }

    async fn save(&self, entity: &str, record: Record) -> BackendResult<Record> {
        self.connection().ensure_collection(entity).await?;
        let unique = self.registry().unique_fields(entity);

        let session = self.connection().session().await?;
        let mut tx = session.transaction(&[entity.to_string()], TransactionMode::ReadWrite)?;

        let written = async {
            check_unique(tx.as_mut(), entity, &unique, &record).await?;
            write_record(tx.as_mut(), entity, record).await
        }
        .await;

        match written {
            Ok(record) => {
                tx.commit().await?;
                debug!(%entity, id = ?record.id(), "record saved");
                Ok(record)
            }
            Err(e) => {
                tx.abort().await;
                Err(e)
            }
        }
    }

    /// Deletes a record by its id.
    ///
    /// # Errors
    ///
    /// Fails with [`BackendError::MissingPrimaryKey`] if the record has no id.
    pub async fn delete(&self, entity: &str, record: &Record) -> BackendResult<()> {
        let id = record
            .id()
            .ok_or(BackendError::missing_primary_key("delete"))?;
        self.delete_by_id(entity, id).await
    }

    /// Deletes the record stored under `id`. Does nothing if the collection
    /// does not exist yet.
    pub async fn delete_by_id(&self, entity: &str, id: &Value) -> BackendResult<()> {
        if id.is_null() {
            return Err(BackendError::missing_primary_key("delete_by_id"));
        }

        let session = self.connection().session().await?;
        if !session.has_collection(entity) {
            return Ok(());
        }
        let mut tx = session.transaction(&[entity.to_string()], TransactionMode::ReadWrite)?;
        tx.delete(entity, id).await?;
        tx.commit().await?;
        debug!(%entity, %id, "record deleted");
        Ok(())
    }

    /// Reads the record stored under `id`.
    pub async fn get_by_id(&self, entity: &str, id: &Value) -> BackendResult<Option<Record>> {
        let session = self.connection().session().await?;
        if !session.has_collection(entity) || id.is_null() {
            return Ok(None);
        }
        let mut tx = session.transaction(&[entity.to_string()], TransactionMode::ReadOnly)?;
        let record = tx.get(entity, id).await?;
        tx.commit().await?;
        Ok(record)
    }

    /// Returns true if a record is stored under `id`.
    pub async fn exists_by_id(&self, entity: &str, id: &Value) -> BackendResult<bool> {
        Ok(self.get_by_id(entity, id).await?.is_some())
    }

    /// Inserts records one by one.
    ///
    /// Each record is validated against everything stored before it,
    /// including earlier records of the batch.
    pub async fn bulk_insert(&self, entity: &str, records: Vec<Record>) -> BackendResult<BulkResult> {
        self.connection().ensure_collection(entity).await?;
        let mut result = BulkResult::default();
        for (index, record) in records.into_iter().enumerate() {
            match self.insert(entity, record).await {
                Ok(saved) => result.succeeded.push(saved),
                Err(error) => {
                    warn!(%entity, index, %error, "bulk insert record failed");
                    result.failed.push(BulkFailure { index, error });
                }
            }
        }
        Ok(result)
    }

    /// Updates the named fields of stored records.
    ///
    /// Each input record supplies the id and the new values; only `fields`
    /// are copied onto the stored record. An empty `fields` copies every
    /// field.
    pub async fn bulk_update(
        &self,
        entity: &str,
        records: Vec<Record>,
        fields: &[&str],
    ) -> BackendResult<BulkResult> {
        let mut result = BulkResult::default();
        for (index, record) in records.into_iter().enumerate() {
            match self.update_fields(entity, &record, fields).await {
                Ok(saved) => result.succeeded.push(saved),
                Err(error) => {
                    warn!(%entity, index, %error, "bulk update record failed");
                    result.failed.push(BulkFailure { index, error });
                }
            }
        }
        Ok(result)
    }

    async fn update_fields(
        &self,
        entity: &str,
        changes: &Record,
        fields: &[&str],
    ) -> BackendResult<Record> {
        let id = changes
            .id()
            .ok_or(BackendError::missing_primary_key("bulk_update"))?;
        let mut stored =
            self.get_by_id(entity, id)
                .await?
                .ok_or_else(|| BackendError::RecordNotFound {
                    collection: entity.to_string(),
                    id: id.to_string(),
                })?;

        if fields.is_empty() {
            stored.merge(changes);
        } else {
            for field in fields.iter().filter(|f| **f != PRIMARY_KEY) {
                if let Some(value) = changes.get(field) {
                    stored.set(*field, value.clone());
                }
            }
        }
        self.update(entity, stored).await
    }

    /// Sets `values` on every record matching the query and returns how many
    /// were updated.
    ///
    /// Ordering, offset and limit select the affected rows exactly as
    /// [`Backend::execute`] would return them; projection is ignored.
    ///
    /// All matches are written in one native transaction: a unique conflict
    /// on any of them leaves every record unchanged.
    pub async fn update_many(&self, state: &QueryState, values: &Record) -> BackendResult<usize> {
        let matches = self.execute(&state.unprojected()).await?;
        if matches.is_empty() {
            return Ok(0);
        }

        let entity = state.entity.as_str();
        let unique = self.registry().unique_fields(entity);
        let mut values = values.clone();
        values.remove(PRIMARY_KEY);

        let session = self.connection().session().await?;
        let mut tx = session.transaction(&[entity.to_string()], TransactionMode::ReadWrite)?;

        let written = async {
            for mut record in matches.iter().cloned() {
                record.merge(&values);
                check_unique(tx.as_mut(), entity, &unique, &record).await?;
                tx.put(entity, record).await?;
            }
            Ok::<_, BackendError>(matches.len())
        }
        .await;

        match written {
            Ok(count) => {
                tx.commit().await?;
                debug!(%entity, count, "records updated");
                Ok(count)
            }
            Err(e) => {
                tx.abort().await;
                Err(e)
            }
        }
    }

    /// Deletes every record matching the query and returns how many were
    /// deleted.
    ///
    /// Ordering, offset and limit narrow the deleted rows as in
    /// [`Backend::execute`].
    pub async fn delete_many(&self, state: &QueryState) -> BackendResult<usize> {
        let matches = self.execute(&state.unprojected()).await?;
        let ids: Vec<Value> = matches.iter().filter_map(|r| r.id().cloned()).collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let entity = state.entity.as_str();
        let session = self.connection().session().await?;
        let mut tx = session.transaction(&[entity.to_string()], TransactionMode::ReadWrite)?;
        for id in &ids {
            tx.delete(entity, id).await?;
        }
        tx.commit().await?;
        debug!(%entity, count = ids.len(), "records deleted");
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idborm_storage::{InMemoryFactory, ObjectStoreParams, StoreFactory, VersionChange};

    async fn users_tx(factory: &InMemoryFactory) -> Box<dyn NativeTransaction> {
        let db = factory
            .open(
                "app",
                Some(1),
                Some(Box::new(|change: &mut dyn VersionChange| {
                    change.create_object_store("users", ObjectStoreParams::new("id").auto_increment())
                })),
            )
            .await
            .unwrap();
        db.transaction(&["users".to_string()], TransactionMode::ReadWrite)
            .unwrap()
    }

    #[tokio::test]
    async fn unique_check_is_case_insensitive() {
        let factory = InMemoryFactory::new();
        let mut tx = users_tx(&factory).await;
        let unique = vec!["email".to_string()];

        write_record(tx.as_mut(), "users", Record::new().with("email", "Ada@Example.com"))
            .await
            .unwrap();

        let err = check_unique(
            tx.as_mut(),
            "users",
            &unique,
            &Record::new().with("email", "ada@example.com"),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("email"));
    }

    #[tokio::test]
    async fn unique_check_ignores_own_record_and_nulls() {
        let factory = InMemoryFactory::new();
        let mut tx = users_tx(&factory).await;
        let unique = vec!["email".to_string()];

        let saved = write_record(tx.as_mut(), "users", Record::new().with("email", "a@x"))
            .await
            .unwrap();
        write_record(tx.as_mut(), "users", Record::new().with("email", Value::Null))
            .await
            .unwrap();

        check_unique(tx.as_mut(), "users", &unique, &saved).await.unwrap();
        check_unique(
            tx.as_mut(),
            "users",
            &unique,
            &Record::new().with("email", Value::Null),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn write_record_strips_null_id_before_add() {
        let factory = InMemoryFactory::new();
        let mut tx = users_tx(&factory).await;

        let saved = write_record(
            tx.as_mut(),
            "users",
            Record::new().with("id", Value::Null).with("name", "Ada"),
        )
        .await
        .unwrap();
        assert_eq!(saved.id(), Some(&Value::Integer(1)));

        let replaced = write_record(
            tx.as_mut(),
            "users",
            Record::new().with("id", 1i64).with("name", "Grace"),
        )
        .await
        .unwrap();
        assert_eq!(replaced.id(), Some(&Value::Integer(1)));
        assert_eq!(tx.count("users").await.unwrap(), 1);
    }
}
