//! Query options: sort, skip, limit and projection.
//!
//! Value ordering follows document-store conventions so that mixed-type
//! fields still sort deterministically: null < numbers < strings < objects
//! < arrays < booleans. Missing fields sort as null.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{lookup_path, ID_FIELD};
use crate::error::{FeedResult, ValidationError};
use crate::filter::ProjectionSpec;

/// Sort direction for one key.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One sort key.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    /// Ascending sort on `field`.
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    /// Descending sort on `field`.
    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Options passed to the change source alongside the selector.
///
/// A `limit` of `None` or `Some(0)` means unbounded.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<ProjectionSpec>,
}

impl QueryOptions {
    /// Unbounded, unsorted options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip this many rows before the window starts.
    #[must_use]
    pub const fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Cap the window size. Zero means unbounded.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Append a sort key.
    #[must_use]
    pub fn sort_by(mut self, spec: SortSpec) -> Self {
        self.sort.push(spec);
        self
    }

    /// Set the result projection.
    #[must_use]
    pub fn with_fields(mut self, fields: ProjectionSpec) -> Self {
        self.fields = Some(fields);
        self
    }

    /// The effective limit, treating zero as unbounded.
    #[must_use]
    pub fn effective_limit(&self) -> Option<usize> {
        self.limit.filter(|l| *l > 0)
    }

    /// Check option invariants.
    pub fn validate(&self) -> FeedResult<()> {
        if self.sort.iter().any(|s| s.field.trim().is_empty()) {
            return Err(ValidationError::EmptySortField.into());
        }
        Ok(())
    }

    /// Compare two documents by the sort keys, breaking ties on `_id`.
    #[must_use]
    pub fn compare_documents(&self, a: &Value, b: &Value) -> Ordering {
        for spec in &self.sort {
            let ord = compare_optional(lookup_path(a, &spec.field), lookup_path(b, &spec.field));
            let ord = match spec.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        compare_optional(a.get(ID_FIELD), b.get(ID_FIELD))
    }

    /// Sort `docs` and cut the skip/limit window out of them.
    pub fn apply_window<T, F>(&self, mut docs: Vec<T>, key: F) -> Vec<T>
    where
        F: Fn(&T) -> &Value,
    {
        docs.sort_by(|a, b| self.compare_documents(key(a), key(b)));
        let window = docs.into_iter().skip(self.skip);
        match self.effective_limit() {
            Some(limit) => window.take(limit).collect(),
            None => window.collect(),
        }
    }
}

const fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    compare_values(a.unwrap_or(&Value::Null), b.unwrap_or(&Value::Null))
}

/// True when both values belong to the same ordering class.
#[must_use]
pub fn same_type_class(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b)
}

/// Total order over JSON values.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let by_type = type_rank(a).cmp(&type_rank(b));
    if by_type != Ordering::Equal {
        return by_type;
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}
