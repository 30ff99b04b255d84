//! # idborm Codec
//!
//! Dynamic values and schema-less records for idborm.
//!
//! Object stores keep arbitrary field bags per record, so the backend works
//! with a generic ordered map of field name to tagged [`Value`] instead of
//! fixed structs. This lets filtering, ordering, aggregation and uniqueness
//! validation operate uniformly across every entity type.
//!
//! ## Usage
//!
//! ```
//! use idborm_codec::{Record, Value};
//! use serde_json::json;
//!
//! let record = Record::from_json(json!({"title": "A", "views": 3})).unwrap();
//! assert_eq!(record.get("views"), Some(&Value::Integer(3)));
//! assert!(record.id().is_none());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod json;
mod record;
mod value;

pub use error::{CodecError, CodecResult};
pub use record::{Record, PRIMARY_KEY};
pub use value::Value;
