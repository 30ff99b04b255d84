//! The backend facade exposed to the ORM layer.

use crate::config::BackendConfig;
use crate::connection::ConnectionManager;
use crate::error::{BackendError, BackendResult};
use crate::schema::{EntitySchema, SchemaRegistry};
use crate::schema_editor::SchemaEditor;
use crate::transaction::Transaction;
use idborm_storage::{StoreFactory, TransactionMode};
use std::sync::Arc;
use tracing::info;

/// ORM storage backend over a versioned object store.
///
/// Clones share the same connection, schema registry and upgrade queue.
///
/// # Example
///
/// ```rust
/// use idborm_codec::Record;
/// use idborm_core::{Backend, BackendConfig, QueryState};
/// use idborm_storage::InMemoryFactory;
/// use std::sync::Arc;
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let backend = Backend::new(BackendConfig::new("app"), Arc::new(InMemoryFactory::new()));
/// backend.connect().await.unwrap();
///
/// let post = backend.insert("posts", Record::new().with("title", "A")).await.unwrap();
/// assert!(post.id().is_some());
///
/// let all = backend.execute(&QueryState::new("posts")).await.unwrap();
/// assert_eq!(all.len(), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct Backend {
    connection: Arc<ConnectionManager>,
    registry: Arc<SchemaRegistry>,
}

impl Backend {
    /// Creates a backend. Nothing is opened until [`Backend::connect`].
    pub fn new(config: BackendConfig, factory: Arc<dyn StoreFactory>) -> Self {
        Self {
            connection: Arc::new(ConnectionManager::new(config, factory)),
            registry: Arc::new(SchemaRegistry::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BackendConfig {
        self.connection.config()
    }

    /// Returns the connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub(crate) fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Registers the unique fields and relations of an entity.
    pub fn register_entity(&self, schema: EntitySchema) {
        self.registry.register(schema);
    }

    /// Returns the registered schema of an entity.
    pub fn entity_schema(&self, name: &str) -> Option<EntitySchema> {
        self.registry.get(name)
    }

    /// Opens the database. Does nothing if already connected.
    pub async fn connect(&self) -> BackendResult<()> {
        self.connection.connect().await
    }

    /// Closes the database.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    /// Returns true while connected.
    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    /// Returns true if the collection exists.
    pub async fn table_exists(&self, name: &str) -> BackendResult<bool> {
        let session = self.connection.session().await?;
        Ok(session.has_collection(name))
    }

    /// Removes every record of a collection. Unknown collections are left
    /// alone.
    pub async fn clear_collection(&self, name: &str) -> BackendResult<()> {
        let session = self.connection.session().await?;
        if !session.has_collection(name) {
            return Ok(());
        }
        let mut tx = session.transaction(&[name.to_string()], TransactionMode::ReadWrite)?;
        tx.clear(name).await?;
        tx.commit().await?;
        info!(collection = %name, "collection cleared");
        Ok(())
    }

    /// Disconnects and deletes the whole database.
    ///
    /// # Errors
    ///
    /// Fails with the native blocked error while other connections to the
    /// database are open.
    pub async fn delete_database(&self) -> BackendResult<()> {
        self.connection.disconnect().await;
        let name = &self.config().name;
        self.connection.factory().delete_database(name).await?;
        info!(database = %name, "database deleted");
        Ok(())
    }

    /// Raw queries are not supported: there is no query language at this
    /// layer.
    pub async fn execute_raw(&self, _query: &str) -> BackendResult<Vec<idborm_codec::Record>> {
        Err(BackendError::unsupported("execute_raw"))
    }

    /// Returns an editor for deferred schema changes.
    pub fn get_schema_editor(&self) -> SchemaEditor {
        SchemaEditor::new(Arc::clone(&self.connection))
    }

    /// Starts a transaction wrapper bound to the live connection.
    pub async fn begin_transaction(&self) -> BackendResult<Transaction> {
        if !self.connection.is_connected().await {
            return Err(BackendError::NotConnected);
        }
        Ok(Transaction::new(Arc::clone(&self.connection)))
    }
}
