//! Entity schema registry.
//!
//! Collections are schema-less, but the ORM layer knows which fields are
//! unique and which fields point at other collections. It registers that
//! knowledge here so uniqueness validation and nested lookups can use it.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Description of one field of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name as stored in records.
    pub name: String,
    /// Whether values must be unique across the collection.
    #[serde(default)]
    pub unique: bool,
    /// Collection referenced by this field, for foreign keys.
    #[serde(default)]
    pub relation: Option<String>,
}

impl FieldSchema {
    /// Creates a plain field.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique: false,
            relation: None,
        }
    }

    /// Marks the field unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Makes the field a foreign key into `collection`.
    #[must_use]
    pub fn relation(mut self, collection: impl Into<String>) -> Self {
        self.relation = Some(collection.into());
        self
    }
}

/// Description of an entity type, stored in the collection of the same name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Collection name.
    pub name: String,
    /// Fields with constraints or relations. Other fields need no entry.
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl EntitySchema {
    /// Creates a schema with no declared fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Names of the unique fields, excluding the primary key.
    pub fn unique_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.unique && f.name != idborm_codec::PRIMARY_KEY)
            .map(|f| f.name.clone())
            .collect()
    }

    /// Collection referenced by `field`, if it is a foreign key.
    pub fn relation_of(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == field)
            .and_then(|f| f.relation.as_deref())
    }
}

/// Registered entity schemas, keyed by collection name.
#[derive(Debug, Default)]
pub(crate) struct SchemaRegistry {
    entities: RwLock<HashMap<String, EntitySchema>>,
}

impl SchemaRegistry {
    /// Registers a schema, replacing any previous one for the same name.
    pub(crate) fn register(&self, schema: EntitySchema) {
        tracing::debug!(entity = %schema.name, fields = schema.fields.len(), "entity registered");
        self.entities.write().insert(schema.name.clone(), schema);
    }

    pub(crate) fn get(&self, name: &str) -> Option<EntitySchema> {
        self.entities.read().get(name).cloned()
    }

    pub(crate) fn unique_fields(&self, name: &str) -> Vec<String> {
        self.entities
            .read()
            .get(name)
            .map(EntitySchema::unique_fields)
            .unwrap_or_default()
    }

    /// Collection reached from `entity` through `field`.
    ///
    /// Unregistered relations fall back to a collection named like the field.
    pub(crate) fn related_collection(&self, entity: &str, field: &str) -> String {
        self.entities
            .read()
            .get(entity)
            .and_then(|s| s.relation_of(field).map(str::to_string))
            .unwrap_or_else(|| field.to_string())
    }
}
