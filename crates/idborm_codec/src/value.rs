//! Dynamic field value type.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;

/// A dynamic field value.
///
/// Records stored in an object store are schema-less, so every field holds
/// one of these tagged values. Integers and floats are both treated as
/// numbers when compared, mirroring the single numeric type of the
/// underlying store.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Text string (UTF-8).
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Point in time.
    Date(DateTime<Utc>),
    /// Array of values.
    Array(Vec<Value>),
    /// Nested map of field name to value, in insertion order.
    Map(Vec<(String, Value)>),
}

impl Value {
    /// Returns a short name for the kind of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Rank of the value kind, used to order values of different kinds.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::Date(_) => 3,
            Value::Text(_) => 4,
            Value::Bytes(_) => 5,
            Value::Array(_) => 6,
            Value::Map(_) => 7,
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is an integer or a float.
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a date, if it is one.
    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a key in this map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Type-sensitive equality.
    ///
    /// Integers and floats compare by numeric value; any other pairing of
    /// different kinds is unequal (`"1"` never equals `1`).
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                cmp_int_float(*a, *b) == Some(Ordering::Equal)
            }
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.strict_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.strict_eq(vb))
            }
            _ => self == other,
        }
    }

    /// Equality with text folded to lowercase on both sides.
    pub fn eq_ignore_case(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a.to_lowercase() == b.to_lowercase(),
            _ => self.strict_eq(other),
        }
    }

    /// Partial ordering between comparable values.
    ///
    /// Numbers, dates, text and booleans are comparable with values of the
    /// same kind. Everything else yields `None`.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Float(b)) => cmp_int_float(*a, *b),
            (Value::Float(a), Value::Integer(b)) => cmp_int_float(*b, *a).map(Ordering::reverse),
            _ => None,
        }
    }

    /// Total ordering used for sorting.
    ///
    /// Values of different kinds are ordered by kind with null first; values
    /// of the same kind use [`Value::compare`] where it is defined.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match self.type_rank().cmp(&other.type_rank()) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.sort_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => a.len().cmp(&b.len()),
            (Value::Float(a), Value::Float(b)) => {
                a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b))
            }
            (Value::Integer(a), Value::Float(b)) => {
                cmp_int_float(*a, *b).unwrap_or_else(|| (*a as f64).total_cmp(b))
            }
            (Value::Float(a), Value::Integer(b)) => {
                cmp_int_float(*b, *a).map_or_else(|| a.total_cmp(&(*b as f64)), Ordering::reverse)
            }
            _ => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }
}

/// Exact ordering of an integer against a float, `None` for NaN.
///
/// Widening the integer to `f64` loses precision above 2^53, so the float
/// is truncated into the integer domain instead.
fn cmp_int_float(i: i64, f: f64) -> Option<Ordering> {
    const BOUND: f64 = 9_223_372_036_854_775_808.0; // 2^63
    if f.is_nan() {
        return None;
    }
    if f >= BOUND {
        return Some(Ordering::Less);
    }
    if f < -BOUND {
        return Some(Ordering::Greater);
    }
    let whole = f.trunc();
    let ord = i.cmp(&(whole as i64)).then_with(|| {
        if f > whole {
            Ordering::Less
        } else if f < whole {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    });
    Some(ord)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Date(d) => f.write_str(&d.to_rfc3339()),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(pairs) => {
                f.write_str("{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn strict_eq_is_type_sensitive() {
        assert!(Value::Integer(1).strict_eq(&Value::Integer(1)));
        assert!(Value::Integer(1).strict_eq(&Value::Float(1.0)));
        assert!(!Value::Integer(1).strict_eq(&Value::Text("1".into())));
        assert!(!Value::Bool(true).strict_eq(&Value::Integer(1)));
        assert!(!Value::Text("a".into()).strict_eq(&Value::Text("A".into())));
        assert!(!Value::Null.strict_eq(&Value::Bool(false)));
    }

    #[test]
    fn eq_ignore_case_folds_text_only() {
        assert!(Value::from("Alice@Example.com").eq_ignore_case(&Value::from("alice@example.com")));
        assert!(!Value::from("1").eq_ignore_case(&Value::Integer(1)));
        assert!(Value::Integer(7).eq_ignore_case(&Value::Integer(7)));
    }

    #[test]
    fn compare_numbers_across_kinds() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Float(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Float(2.0).compare(&Value::Integer(2)),
            Some(Ordering::Equal)
        );
        assert_eq!(Value::Integer(2).compare(&Value::Text("2".into())), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn integer_float_comparison_is_exact_beyond_f64_precision() {
        let big = 1i64 << 53;
        let float = Value::Float(big as f64);

        assert!(!Value::Integer(big + 1).strict_eq(&float));
        assert!(Value::Integer(big).strict_eq(&float));
        assert_eq!(
            Value::Integer(big + 1).compare(&float),
            Some(Ordering::Greater)
        );
        assert_eq!(float.sort_cmp(&Value::Integer(big + 1)), Ordering::Less);
        assert_eq!(Value::Integer(i64::MAX).compare(&Value::Float(1e19)), Some(Ordering::Less));
        assert_eq!(Value::Integer(-3).compare(&Value::Float(-2.5)), Some(Ordering::Less));
        assert_eq!(Value::Integer(2).compare(&Value::Float(f64::NAN)), None);
    }

    #[test]
    fn compare_dates() {
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(
            Value::Date(earlier).compare(&Value::Date(later)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn sort_cmp_puts_null_first() {
        let mut values = vec![
            Value::from("b"),
            Value::Integer(3),
            Value::Null,
            Value::Float(1.5),
            Value::from("a"),
        ];
        values.sort_by(Value::sort_cmp);

        assert_eq!(values[0], Value::Null);
        assert_eq!(values[1], Value::Float(1.5));
        assert_eq!(values[2], Value::Integer(3));
        assert_eq!(values[3], Value::from("a"));
        assert_eq!(values[4], Value::from("b"));
    }

    #[test]
    fn map_get() {
        let map = Value::Map(vec![
            ("name".to_string(), Value::from("Alice")),
            ("age".to_string(), Value::Integer(30)),
        ]);

        assert_eq!(map.get("name"), Some(&Value::from("Alice")));
        assert_eq!(map.get("missing"), None);
        assert_eq!(Value::Integer(1).get("name"), None);
    }

    #[test]
    fn display_formats() {
        assert_eq!(Value::from("x").to_string(), "x");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(
            Value::from(vec![1i64, 2]).to_string(),
            "[1, 2]"
        );
    }

    #[test]
    fn from_impls() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i64), Value::Integer(42));
        assert_eq!(Value::from(42i32), Value::Integer(42));
        assert_eq!(Value::from(2.5f64), Value::Float(2.5));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::Text("a".to_string()));
        assert_eq!(Value::from(()), Value::Null);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn scalar() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(Value::Integer),
                (-1.0e9f64..1.0e9).prop_map(Value::Float),
                "[a-zA-Z]{0,8}".prop_map(Value::Text),
            ]
        }

        proptest! {
            #[test]
            fn sort_cmp_is_antisymmetric(a in scalar(), b in scalar()) {
                prop_assert_eq!(a.sort_cmp(&b), b.sort_cmp(&a).reverse());
            }

            #[test]
            fn strict_eq_is_reflexive(a in scalar()) {
                prop_assert!(a.strict_eq(&a));
            }

            #[test]
            fn compare_agrees_with_strict_eq(a in scalar(), b in scalar()) {
                if a.compare(&b) == Some(Ordering::Equal) {
                    prop_assert!(a.strict_eq(&b));
                }
            }
        }
    }
}
