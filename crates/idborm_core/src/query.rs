//! Query Translator and Executor.
//!
//! Queries run as full scans: nested relation filters are resolved to
//! concrete foreign keys, every record of the collection is matched in
//! memory, then survivors are sorted, paginated and projected.

use crate::backend::Backend;
use crate::error::BackendResult;
use crate::filter::{matches_all, FilterOp, ParsedFilter};
use idborm_codec::{Record, Value};
use serde::Serialize;
use serde_json::json;
use std::cmp::Ordering;
use tracing::debug;

/// One ordering key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBy {
    /// Field to sort by.
    pub field: String,
    /// Sort from largest to smallest.
    pub descending: bool,
}

impl OrderBy {
    /// Parses `"field"` (ascending) or `"-field"` (descending).
    pub fn parse(key: &str) -> Self {
        match key.strip_prefix('-') {
            Some(field) => Self {
                field: field.to_string(),
                descending: true,
            },
            None => Self {
                field: key.to_string(),
                descending: false,
            },
        }
    }

    fn as_key(&self) -> String {
        if self.descending {
            format!("-{}", self.field)
        } else {
            self.field.clone()
        }
    }
}

/// Declarative description of a query over one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryState {
    /// Target collection.
    pub entity: String,
    /// Filters, all of which must match.
    pub filters: Vec<ParsedFilter>,
    /// Ordering keys, most significant first.
    pub ordering: Vec<OrderBy>,
    /// Number of leading results to skip.
    pub offset: usize,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Fields to return. `None` returns whole records.
    pub fields: Option<Vec<String>>,
}

impl QueryState {
    /// Creates a query returning every record of `entity`.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            filters: Vec::new(),
            ordering: Vec::new(),
            offset: 0,
            limit: None,
            fields: None,
        }
    }

    /// Adds a filter from a lookup such as `views__gte`.
    #[must_use]
    pub fn filter(mut self, lookup: &str, value: impl Into<Value>) -> Self {
        self.filters.push(ParsedFilter::parse(lookup, value));
        self
    }

    /// Adds an already parsed filter.
    #[must_use]
    pub fn with_filter(mut self, filter: ParsedFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Adds an ordering key; a leading `-` sorts descending.
    #[must_use]
    pub fn order_by(mut self, key: &str) -> Self {
        self.ordering.push(OrderBy::parse(key));
        self
    }

    /// Skips the first `offset` results.
    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Returns at most `limit` results.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns only the named fields of each record.
    #[must_use]
    pub fn only<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.fields = Some(fields.iter().map(|f| f.as_ref().to_string()).collect());
        self
    }

    /// The same rows with every field, keeping ordering and pagination.
    pub(crate) fn unprojected(&self) -> Self {
        Self {
            fields: None,
            ..self.clone()
        }
    }

    /// The same query without pagination or projection.
    pub(crate) fn unbounded(&self) -> Self {
        Self {
            offset: 0,
            limit: None,
            fields: None,
            ..self.clone()
        }
    }
}

/// Descriptive dump of a query, for inspection and logging. Not executable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    /// Native operation the query runs as.
    pub operation: String,
    /// Everything the operation is parameterized with.
    pub params: serde_json::Value,
}

/// Sorts records by the ordering keys. Ties keep their scan order.
pub fn sort_records(records: &mut [Record], ordering: &[OrderBy]) {
    if ordering.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        for key in ordering {
            let left = a.get(&key.field).unwrap_or(&Value::Null);
            let right = b.get(&key.field).unwrap_or(&Value::Null);
            let ord = left.sort_cmp(right);
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Applies offset, then limit.
pub fn paginate(records: Vec<Record>, offset: usize, limit: Option<usize>) -> Vec<Record> {
    let rest = records.into_iter().skip(offset);
    match limit {
        Some(n) => rest.take(n).collect(),
        None => rest.collect(),
    }
}

impl Backend {
    /// Runs a query and returns the matching records.
    ///
    /// The target collection is created if it does not exist yet.
    pub async fn execute(&self, state: &QueryState) -> BackendResult<Vec<Record>> {
        self.connection().ensure_collection(&state.entity).await?;
        let filters = self.resolve_filters(&state.entity, &state.filters).await?;

        let scanned = {
            let session = self.connection().session().await?;
            session.scan(&state.entity).await?
        };
        let total = scanned.len();

        let mut records: Vec<Record> = scanned
            .into_iter()
            .filter(|r| matches_all(r, &filters))
            .collect();
        let matched = records.len();

        sort_records(&mut records, &state.ordering);
        let records = paginate(records, state.offset, state.limit);

        debug!(
            entity = %state.entity,
            scanned = total,
            matched,
            returned = records.len(),
            "query executed"
        );

        Ok(match &state.fields {
            Some(fields) => records.iter().map(|r| r.project(fields)).collect(),
            None => records,
        })
    }

    /// Counts the records a query returns.
    pub async fn count(&self, state: &QueryState) -> BackendResult<usize> {
        let mut state = state.clone();
        state.fields = None;
        Ok(self.execute(&state).await?.len())
    }

    /// Describes how a query would run without running it.
    pub fn compile(&self, state: &QueryState) -> CompiledQuery {
        let filters: Vec<_> = state
            .filters
            .iter()
            .map(|f| {
                json!({
                    "lookup": f.lookup(),
                    "path": f.path,
                    "op": f.op.as_str(),
                    "value": f.value.to_json(),
                })
            })
            .collect();
        let ordering: Vec<_> = state.ordering.iter().map(OrderBy::as_key).collect();

        CompiledQuery {
            operation: "scan".to_string(),
            params: json!({
                "collection": state.entity,
                "filters": filters,
                "order_by": ordering,
                "offset": state.offset,
                "limit": state.limit,
                "fields": state.fields,
            }),
        }
    }

    /// Replaces nested filters with `in` filters on local foreign keys.
    ///
    /// `a__b__name = X` queries the collection reached through `b` for
    /// `name = X`, then the collection reached through `a` for `b in ids`,
    /// and finally filters the target on `a in ids`.
    async fn resolve_filters(
        &self,
        entity: &str,
        filters: &[ParsedFilter],
    ) -> BackendResult<Vec<ParsedFilter>> {
        let mut resolved = Vec::with_capacity(filters.len());
        for filter in filters {
            if !filter.is_nested() {
                resolved.push(filter.clone());
                continue;
            }

            let relations = &filter.path[..filter.path.len() - 1];
            let mut collections = Vec::with_capacity(relations.len());
            let mut current = entity.to_string();
            for field in relations {
                current = self.registry().related_collection(&current, field);
                collections.push(current.clone());
            }

            let mut condition =
                ParsedFilter::new(filter.field(), filter.op.clone(), filter.value.clone());
            for (field, collection) in relations.iter().zip(&collections).rev() {
                let ids = self.matching_ids(collection, &condition).await?;
                debug!(
                    lookup = %filter.lookup(),
                    %collection,
                    matched = ids.len(),
                    "relation resolved"
                );
                condition = ParsedFilter::new(field.clone(), FilterOp::In, Value::Array(ids));
            }
            resolved.push(condition);
        }
        Ok(resolved)
    }

    async fn matching_ids(
        &self,
        collection: &str,
        filter: &ParsedFilter,
    ) -> BackendResult<Vec<Value>> {
        let session = self.connection().session().await?;
        let records = session.scan(collection).await?;
        Ok(records
            .iter()
            .filter(|r| filter.matches(r))
            .filter_map(|r| r.id().cloned())
            .collect())
    }
}
