//! Filter-string to selector translation and result projection.
//!
//! A table shows a set of columns (`FieldDescriptor`s) and a free-text
//! filter box. `FilterSelectorBuilder` turns the text into a `Selector`;
//! `TermFilterBuilder` is the default: every whitespace-separated term must
//! appear (case-insensitively) in at least one searchable column.

use std::collections::BTreeMap;

use regex::escape;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::document::ID_FIELD;
use crate::error::FeedResult;
use crate::selector::Selector;

const fn default_true() -> bool {
    true
}

/// A column of the table, addressed by a dotted document path.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default = "default_true")]
    pub searchable: bool,
}

impl FieldDescriptor {
    /// A searchable column.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: None,
            searchable: true,
        }
    }

    /// Set the column header shown to users.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Exclude this column from filter matching.
    #[must_use]
    pub const fn not_searchable(mut self) -> Self {
        self.searchable = false;
        self
    }
}

/// Field projection applied to query results.
///
/// Inclusion mode when any path maps to `true`, exclusion mode otherwise.
/// `_id` is always kept unless it is explicitly excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectionSpec(BTreeMap<String, bool>);

impl ProjectionSpec {
    /// Keep only the given paths (plus `_id`).
    #[must_use]
    pub fn include<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(paths.into_iter().map(|p| (p.into(), true)).collect())
    }

    /// Drop the given paths.
    #[must_use]
    pub fn exclude<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(paths.into_iter().map(|p| (p.into(), false)).collect())
    }

    /// True when the projection keeps every field.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn is_inclusive(&self) -> bool {
        self.0.iter().any(|(k, v)| *v && k != ID_FIELD)
    }

    /// Apply the projection to one document. Non-objects pass through.
    #[must_use]
    pub fn apply(&self, doc: &Value) -> Value {
        let Value::Object(source) = doc else {
            return doc.clone();
        };
        if self.is_empty() {
            return doc.clone();
        }

        let keep_id = self.0.get(ID_FIELD).copied().unwrap_or(true);

        let mut out = if self.is_inclusive() {
            let mut out = Map::new();
            for (path, include) in &self.0 {
                if *include && path != ID_FIELD {
                    copy_path(source, &mut out, path);
                }
            }
            out
        } else {
            let mut out = source.clone();
            for (path, include) in &self.0 {
                if !*include && path != ID_FIELD {
                    remove_path(&mut out, path);
                }
            }
            out
        };

        if keep_id {
            if let Some(id) = source.get(ID_FIELD) {
                out.insert(ID_FIELD.to_string(), id.clone());
            }
        } else {
            out.remove(ID_FIELD);
        }
        Value::Object(out)
    }
}

fn copy_path(source: &Map<String, Value>, out: &mut Map<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            if let Some(v) = source.get(path) {
                out.insert(path.to_string(), v.clone());
            }
        }
        Some((head, rest)) => {
            let Some(Value::Object(child)) = source.get(head) else {
                return;
            };
            let slot = out
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(child_out) = slot {
                copy_path(child, child_out, rest);
            }
        }
    }
}

fn remove_path(out: &mut Map<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            out.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(child)) = out.get_mut(head) {
                remove_path(child, rest);
            }
        }
    }
}

/// Per-publication overrides for filtering and projection.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSettings {
    /// Columns searched by the filter instead of the displayed ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_fields: Option<Vec<FieldDescriptor>>,
    /// Projection passed to the query instead of the request's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<ProjectionSpec>,
}

/// Builds a selector fragment from user-entered filter text.
pub trait FilterSelectorBuilder: Send + Sync {
    /// Build the selector for `filter` over `fields`.
    ///
    /// `settings.filter_fields`, when present, replaces `fields`.
    fn build(
        &self,
        filter: &str,
        fields: &[FieldDescriptor],
        settings: Option<&FilterSettings>,
    ) -> FeedResult<Selector>;
}

/// Default builder: AND over terms, OR over searchable columns.
#[derive(Debug, Default, Clone, Copy)]
pub struct TermFilterBuilder;

impl TermFilterBuilder {
    fn term_clause(term: &str, fields: &[&FieldDescriptor]) -> Selector {
        let pattern = escape(term);
        let number = term.parse::<f64>().ok().filter(|n| n.is_finite());

        let mut alternatives = Vec::with_capacity(fields.len() * 2);
        for field in fields {
            alternatives.push(
                Selector::new().with(field.key.clone(), json!({"$regex": pattern, "$options": "i"})),
            );
            if let Some(n) = number {
                alternatives.push(Selector::new().with(field.key.clone(), json!(n)));
            }
        }
        Selector::or(alternatives)
    }
}

impl FilterSelectorBuilder for TermFilterBuilder {
    fn build(
        &self,
        filter: &str,
        fields: &[FieldDescriptor],
        settings: Option<&FilterSettings>,
    ) -> FeedResult<Selector> {
        let fields = settings
            .and_then(|s| s.filter_fields.as_deref())
            .unwrap_or(fields);
        let searchable: Vec<&FieldDescriptor> = fields.iter().filter(|f| f.searchable).collect();

        if searchable.is_empty() {
            return Ok(Selector::new());
        }

        let clauses = filter
            .split_whitespace()
            .map(|term| Self::term_clause(term, &searchable))
            .collect();
        Ok(Selector::and(clauses))
    }
}
