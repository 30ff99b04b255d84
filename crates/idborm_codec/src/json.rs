//! Bridge between JSON documents and records.
//!
//! Upstream layers hand over serialized records as JSON objects. Dates have
//! no JSON representation and arrive as text; they serialize back out as
//! RFC 3339 strings.

use crate::error::{CodecError, CodecResult};
use crate::record::Record;
use crate::value::Value;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value as Json;

impl Value {
    /// Converts a JSON value into a field value.
    ///
    /// Numbers that fit in `i64` become integers, all others floats.
    pub fn from_json(json: Json) -> CodecResult<Value> {
        Ok(match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(
                    n.as_f64()
                        .ok_or_else(|| CodecError::invalid_number(n.to_string()))?,
                ),
            },
            Json::String(s) => Value::Text(s),
            Json::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::from_json)
                    .collect::<CodecResult<_>>()?,
            ),
            Json::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| Value::from_json(v).map(|v| (k, v)))
                    .collect::<CodecResult<_>>()?,
            ),
        })
    }

    /// Converts this value into JSON.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Integer(n) => Json::from(*n),
            Value::Float(x) => serde_json::Number::from_f64(*x).map_or(Json::Null, Json::Number),
            Value::Text(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::Array(b.iter().map(|byte| Json::from(*byte)).collect()),
            Value::Date(d) => Json::String(d.to_rfc3339()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(pairs) => Json::Object(
                pairs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl Record {
    /// Converts a JSON object into a record.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NotAnObject`] if the input is not an object and
    /// [`CodecError::EmptyFieldName`] if a key is empty.
    pub fn from_json(json: Json) -> CodecResult<Record> {
        let map = match json {
            Json::Object(map) => map,
            Json::Null => return Err(CodecError::not_an_object("null")),
            Json::Bool(_) => return Err(CodecError::not_an_object("bool")),
            Json::Number(_) => return Err(CodecError::not_an_object("number")),
            Json::String(_) => return Err(CodecError::not_an_object("string")),
            Json::Array(_) => return Err(CodecError::not_an_object("array")),
        };

        let mut record = Record::new();
        for (k, v) in map {
            if k.is_empty() {
                return Err(CodecError::EmptyFieldName);
            }
            record.set(k, Value::from_json(v)?);
        }
        Ok(record)
    }

    /// Converts this record into a JSON object.
    pub fn to_json(&self) -> Json {
        Json::Object(
            self.iter()
                .map(|(k, v)| (k.to_string(), v.to_json()))
                .collect(),
        )
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(n) => serializer.serialize_i64(*n),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::Date(d) => d.serialize(serializer),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(pairs) => {
                let mut map = serializer.serialize_map(Some(pairs.len()))?;
                for (k, v) in pairs {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (k, v) in self.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
