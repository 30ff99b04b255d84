//! Schema-less record type.

use crate::value::Value;

/// Name of the primary key field.
pub const PRIMARY_KEY: &str = "id";

/// An ordered field-name to value mapping.
///
/// Field order is insertion order. Setting an existing field replaces its
/// value in place. The `id` field is the primary key; a record whose `id` is
/// missing or null has no key yet and is stored with an auto-assigned one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a field, consuming and returning the record.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Returns the value of a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v)
    }

    /// Returns true if the record has the field, even when it is null.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|(name, _)| name == field)
    }

    /// Sets a field, replacing an existing value in place.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    /// Removes a field and returns its value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        let pos = self.fields.iter().position(|(name, _)| name == field)?;
        Some(self.fields.remove(pos).1)
    }

    /// Returns the primary key, or `None` when it is absent or null.
    pub fn id(&self) -> Option<&Value> {
        self.get(PRIMARY_KEY).filter(|v| !v.is_null())
    }

    /// Sets the primary key.
    pub fn set_id(&mut self, id: impl Into<Value>) {
        self.set(PRIMARY_KEY, id);
    }

    /// Iterates over `(field, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the field names in insertion order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns a record with only the given fields, in the requested order.
    ///
    /// Fields missing from this record are omitted.
    #[must_use]
    pub fn project<S: AsRef<str>>(&self, fields: &[S]) -> Record {
        fields
            .iter()
            .filter_map(|f| {
                let f = f.as_ref();
                self.get(f).map(|v| (f.to_string(), v.clone()))
            })
            .collect()
    }

    /// Copies every field of `other` into this record.
    pub fn merge(&mut self, other: &Record) {
        for (k, v) in other.iter() {
            self.set(k, v.clone());
        }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Map(record.fields)
    }
}
