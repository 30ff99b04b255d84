//! Aggregation Engine.

use crate::backend::Backend;
use crate::error::BackendResult;
use crate::query::QueryState;
use idborm_codec::{Record, Value};
use serde::{Deserialize, Serialize};

/// Field name that makes [`Aggregation::Count`] count rows.
pub const ALL_FIELDS: &str = "*";

/// An aggregate function over one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "lowercase")]
pub enum Aggregation {
    /// Row count for `*`, otherwise the count of non-null values.
    Count {
        /// Counted field, or `*`.
        field: String,
        /// Count distinct values only.
        #[serde(default)]
        distinct: bool,
    },
    /// Sum of numeric values.
    Sum {
        /// Summed field.
        field: String,
    },
    /// Mean of numeric values.
    Avg {
        /// Averaged field.
        field: String,
    },
    /// Smallest numeric value.
    Min {
        /// Inspected field.
        field: String,
    },
    /// Largest numeric value.
    Max {
        /// Inspected field.
        field: String,
    },
}

impl Aggregation {
    /// Counts rows.
    pub fn count_all() -> Self {
        Self::Count {
            field: ALL_FIELDS.to_string(),
            distinct: false,
        }
    }

    /// Counts non-null values of a field.
    pub fn count(field: impl Into<String>) -> Self {
        Self::Count {
            field: field.into(),
            distinct: false,
        }
    }

    /// Counts distinct non-null values of a field.
    pub fn count_distinct(field: impl Into<String>) -> Self {
        Self::Count {
            field: field.into(),
            distinct: true,
        }
    }

    /// Sums a field.
    pub fn sum(field: impl Into<String>) -> Self {
        Self::Sum { field: field.into() }
    }

    /// Averages a field.
    pub fn avg(field: impl Into<String>) -> Self {
        Self::Avg { field: field.into() }
    }

    /// Minimum of a field.
    pub fn min(field: impl Into<String>) -> Self {
        Self::Min { field: field.into() }
    }

    /// Maximum of a field.
    pub fn max(field: impl Into<String>) -> Self {
        Self::Max { field: field.into() }
    }

    /// Key of this aggregation in the result, e.g. `views__sum`.
    pub fn alias(&self) -> String {
        match self {
            Self::Count { field, .. } if field == ALL_FIELDS => "count".to_string(),
            Self::Count { field, .. } => format!("{field}__count"),
            Self::Sum { field } => format!("{field}__sum"),
            Self::Avg { field } => format!("{field}__avg"),
            Self::Min { field } => format!("{field}__min"),
            Self::Max { field } => format!("{field}__max"),
        }
    }

    /// Computes the aggregate over `records`.
    ///
    /// Avg, min and max of an empty set are 0.
    pub fn compute(&self, records: &[Record]) -> Value {
        match self {
            Self::Count { field, distinct } => {
                Value::from(count(records, field, *distinct) as i64)
            }
            Self::Sum { field } => sum(numbers(records, field)),
            Self::Avg { field } => {
                let values = numbers(records, field);
                if values.is_empty() {
                    return Value::Integer(0);
                }
                let total: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
                Value::Float(total / values.len() as f64)
            }
            Self::Min { field } => extreme(numbers(records, field), std::cmp::Ordering::Less),
            Self::Max { field } => extreme(numbers(records, field), std::cmp::Ordering::Greater),
        }
    }
}

fn count(records: &[Record], field: &str, distinct: bool) -> usize {
    if field == ALL_FIELDS {
        return records.len();
    }
    let present = records
        .iter()
        .filter_map(|r| r.get(field))
        .filter(|v| !v.is_null());
    if !distinct {
        return present.count();
    }
    let mut seen: Vec<&Value> = Vec::new();
    for value in present {
        if !seen.iter().any(|s| s.strict_eq(value)) {
            seen.push(value);
        }
    }
    seen.len()
}

fn numbers<'a>(records: &'a [Record], field: &str) -> Vec<&'a Value> {
    records
        .iter()
        .filter_map(|r| r.get(field))
        .filter(|v| v.is_number())
        .collect()
}

/// Integer sum while every value is an integer and the sum fits, float
/// otherwise.
fn sum(values: Vec<&Value>) -> Value {
    let integers: Option<i64> = values
        .iter()
        .try_fold(0i64, |acc, v| acc.checked_add(v.as_integer()?));
    match integers {
        Some(total) => Value::Integer(total),
        None => Value::Float(values.iter().filter_map(|v| v.as_f64()).sum()),
    }
}

fn extreme(values: Vec<&Value>, wanted: std::cmp::Ordering) -> Value {
    values
        .into_iter()
        .reduce(|best, v| if v.sort_cmp(best) == wanted { v } else { best })
        .cloned()
        .unwrap_or(Value::Integer(0))
}

impl Backend {
    /// Computes aggregates over the records matching a query.
    ///
    /// The result maps each aggregation's [`Aggregation::alias`] to its value.
    pub async fn aggregate(
        &self,
        state: &QueryState,
        aggregations: &[Aggregation],
    ) -> BackendResult<Record> {
        let records = self.execute(&state.unbounded()).await?;
        Ok(aggregations
            .iter()
            .map(|a| (a.alias(), a.compute(&records)))
            .collect())
    }
}
