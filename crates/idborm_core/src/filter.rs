//! Filter Matcher: parsed lookups evaluated against single records.

use idborm_codec::{Record, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Separator between the segments of a lookup.
pub const LOOKUP_SEP: &str = "__";

/// Lookup names recognized as operators but not supported. Filters using
/// them never match.
const UNSUPPORTED_LOOKUPS: &[&str] = &[
    "iexact",
    "icontains",
    "startswith",
    "istartswith",
    "endswith",
    "iendswith",
    "isnull",
    "range",
    "regex",
    "iregex",
    "ne",
];

/// Comparison operator of a filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum FilterOp {
    /// Type-sensitive equality.
    Eq,
    /// Case-sensitive substring of a text field.
    Contains,
    /// Greater than or equal.
    Gte,
    /// Less than or equal.
    Lte,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Membership in a list of values.
    In,
    /// Any other operator. Never matches.
    Other(String),
}

impl FilterOp {
    /// Maps an operator name to an operator. `exact` is an alias of `eq`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "eq" | "exact" => Self::Eq,
            "contains" => Self::Contains,
            "gte" => Self::Gte,
            "lte" => Self::Lte,
            "gt" => Self::Gt,
            "lt" => Self::Lt,
            "in" => Self::In,
            other => Self::Other(other.to_string()),
        }
    }

    /// Name of the operator.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Eq => "eq",
            Self::Contains => "contains",
            Self::Gte => "gte",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::In => "in",
            Self::Other(name) => name,
        }
    }

    fn is_lookup_name(name: &str) -> bool {
        !matches!(Self::from_name(name), Self::Other(_)) || UNSUPPORTED_LOOKUPS.contains(&name)
    }

    /// Evaluates the operator with `field` on the left and `operand` on the
    /// right. A missing field is evaluated as null.
    pub fn evaluate(&self, field: &Value, operand: &Value) -> bool {
        match self {
            Self::Eq => field.strict_eq(operand),
            Self::Contains => match (field.as_text(), operand.as_text()) {
                (Some(haystack), Some(needle)) => haystack.contains(needle),
                _ => false,
            },
            Self::Gte => ordered(field, operand).is_some_and(Ordering::is_ge),
            Self::Lte => ordered(field, operand).is_some_and(Ordering::is_le),
            Self::Gt => ordered(field, operand).is_some_and(Ordering::is_gt),
            Self::Lt => ordered(field, operand).is_some_and(Ordering::is_lt),
            Self::In => match operand.as_array() {
                Some(members) => members.iter().any(|m| field.strict_eq(m)),
                None => field.strict_eq(operand),
            },
            Self::Other(_) => false,
        }
    }
}

/// Ordering for range operators: numbers with numbers, dates with dates,
/// text with text.
fn ordered(field: &Value, operand: &Value) -> Option<Ordering> {
    match (field, operand) {
        (Value::Bool(_), _) | (_, Value::Bool(_)) => None,
        _ => field.compare(operand),
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<FilterOp> for String {
    fn from(op: FilterOp) -> Self {
        op.as_str().to_string()
    }
}

impl From<String> for FilterOp {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

/// One filter of a query.
///
/// `path` has one segment for a plain field. Longer paths traverse
/// relations: `["author", "publisher", "name"]` filters on the name of the
/// publisher of the author.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedFilter {
    /// Relation fields followed by the compared field.
    pub path: Vec<String>,
    /// Comparison operator.
    pub op: FilterOp,
    /// Right-hand operand.
    pub value: Value,
}

impl ParsedFilter {
    /// Creates a filter on a plain field.
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            path: vec![field.into()],
            op,
            value: value.into(),
        }
    }

    /// Parses a lookup such as `author__name__contains`.
    ///
    /// A trailing segment naming an operator sets the operator; otherwise the
    /// operator is `eq` and every segment belongs to the path.
    pub fn parse(lookup: &str, value: impl Into<Value>) -> Self {
        let mut path: Vec<String> = lookup.split(LOOKUP_SEP).map(str::to_string).collect();
        let op = match path.last() {
            Some(last) if path.len() > 1 && FilterOp::is_lookup_name(last) => {
                let op = FilterOp::from_name(last);
                path.pop();
                op
            }
            _ => FilterOp::Eq,
        };
        Self {
            path,
            op,
            value: value.into(),
        }
    }

    /// The compared field, the last segment of the path.
    pub fn field(&self) -> &str {
        self.path.last().map_or("", String::as_str)
    }

    /// Returns true if the filter traverses at least one relation.
    pub fn is_nested(&self) -> bool {
        self.path.len() > 1
    }

    /// The lookup string this filter was parsed from, in canonical form.
    pub fn lookup(&self) -> String {
        let mut lookup = self.path.join(LOOKUP_SEP);
        if self.op != FilterOp::Eq {
            lookup.push_str(LOOKUP_SEP);
            lookup.push_str(self.op.as_str());
        }
        lookup
    }

    /// Evaluates the filter against a record. Only meaningful once nested
    /// paths have been resolved to plain fields.
    pub fn matches(&self, record: &Record) -> bool {
        let field = record.get(self.field()).unwrap_or(&Value::Null);
        self.op.evaluate(field, &self.value)
    }
}

/// Returns true if the record satisfies every filter.
pub fn matches_all(record: &Record, filters: &[ParsedFilter]) -> bool {
    filters.iter().all(|f| f.matches(record))
}
