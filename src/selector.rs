//! Document selectors.
//!
//! A `Selector` is a Mongo-style JSON predicate. Top-level keys are either
//! dotted field paths or the logical operators `$and`, `$or` and `$nor`.
//! Field conditions are either a literal (equality) or an operator object.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::{json_type_name, lookup_path};
use crate::error::{FeedError, FeedResult, ValidationError};
use crate::query::{compare_values, same_type_class};

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();

fn cached_regex(pattern: &str) -> FeedResult<Regex> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    {
        let guard = cache
            .read()
            .map_err(|_| FeedError::internal("regex cache lock poisoned"))?;
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    let compiled = Regex::new(pattern).map_err(|e| ValidationError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let mut guard = cache
        .write()
        .map_err(|_| FeedError::internal("regex cache lock poisoned"))?;

    if guard.len() >= REGEX_CACHE_MAX {
        guard.clear();
    }

    guard
        .entry(pattern.to_string())
        .or_insert_with(|| compiled.clone());
    Ok(compiled)
}

/// A query predicate selecting which documents belong to a feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selector(Map<String, Value>);

impl Selector {
    /// The empty selector, matching every document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a selector from a JSON object.
    pub fn from_value(value: Value) -> FeedResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ValidationError::InvalidSelector {
                reason: format!("expected an object, found {}", json_type_name(&other)),
            }
            .into()),
        }
    }

    /// Conjunction of several selectors. Empty clauses are dropped.
    #[must_use]
    pub fn and(clauses: Vec<Selector>) -> Self {
        Self::logical("$and", clauses)
    }

    /// Disjunction of several selectors. Empty clauses are dropped.
    #[must_use]
    pub fn or(clauses: Vec<Selector>) -> Self {
        Self::logical("$or", clauses)
    }

    fn logical(op: &str, clauses: Vec<Selector>) -> Self {
        let mut clauses: Vec<Selector> = clauses.into_iter().filter(|c| !c.is_empty()).collect();
        match clauses.len() {
            0 => Self::new(),
            1 => clauses.remove(0),
            _ => {
                let mut map = Map::new();
                map.insert(
                    op.to_string(),
                    Value::Array(clauses.into_iter().map(Self::into_value).collect()),
                );
                Self(map)
            }
        }
    }

    /// Set one top-level condition.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, condition: Value) -> Self {
        self.0.insert(key.into(), condition);
        self
    }

    /// Overlay `overrides` on top of this selector; its keys win.
    #[must_use]
    pub fn merge(mut self, overrides: &Selector) -> Self {
        for (k, v) in &overrides.0 {
            self.0.insert(k.clone(), v.clone());
        }
        self
    }

    /// True for the match-everything selector.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The top-level conditions.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The selector as a JSON object.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Evaluate the selector against a document.
    pub fn matches(&self, doc: &Value) -> FeedResult<bool> {
        eval_selector(&self.0, doc)
    }
}

fn eval_selector(selector: &Map<String, Value>, doc: &Value) -> FeedResult<bool> {
    for (key, condition) in selector {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in logical_clauses(key, condition)? {
                    if !eval_selector(clause, doc)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in logical_clauses(key, condition)? {
                    if eval_selector(clause, doc)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in logical_clauses(key, condition)? {
                    if eval_selector(clause, doc)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => {
                return Err(ValidationError::UnsupportedOperator {
                    operator: op.to_string(),
                }
                .into());
            }
            path => eval_field(lookup_path(doc, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn logical_clauses<'a>(op: &str, condition: &'a Value) -> FeedResult<Vec<&'a Map<String, Value>>> {
    let Value::Array(items) = condition else {
        return Err(ValidationError::InvalidSelector {
            reason: format!("{op} expects an array of selectors"),
        }
        .into());
    };
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            other => Err(FeedError::from(ValidationError::InvalidSelector {
                reason: format!("{op} clause must be an object, found {}", json_type_name(other)),
            })),
        })
        .collect()
}

fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn eval_field(value: Option<&Value>, condition: &Value) -> FeedResult<bool> {
    let Value::Object(ops) = condition else {
        return Ok(values_match(value, condition));
    };
    if !is_operator_object(ops) {
        return Ok(values_match(value, condition));
    }

    let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => values_match(value, arg),
            "$ne" => !values_match(value, arg),
            "$gt" => compare_matches(value, arg, |o| o == Ordering::Greater),
            "$gte" => compare_matches(value, arg, |o| o != Ordering::Less),
            "$lt" => compare_matches(value, arg, |o| o == Ordering::Less),
            "$lte" => compare_matches(value, arg, |o| o != Ordering::Greater),
            "$in" => array_arg(op, arg)?.iter().any(|a| values_match(value, a)),
            "$nin" => !array_arg(op, arg)?.iter().any(|a| values_match(value, a)),
            "$exists" => value.is_some() == is_truthy(arg),
            "$regex" => regex_matches(value, arg, options)?,
            "$options" => true,
            other => {
                return Err(ValidationError::UnsupportedOperator {
                    operator: other.to_string(),
                }
                .into());
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn array_arg<'a>(op: &str, arg: &'a Value) -> FeedResult<&'a Vec<Value>> {
    arg.as_array().ok_or_else(|| {
        ValidationError::InvalidSelector {
            reason: format!("{op} expects an array"),
        }
        .into()
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

/// Equality with array membership: `{tags: "x"}` matches `tags: ["x", "y"]`.
fn values_match(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| compare_values(item, expected) == Ordering::Equal)
        }
        Some(v) => compare_values(v, expected) == Ordering::Equal,
    }
}

fn compare_matches(value: Option<&Value>, arg: &Value, pred: impl Fn(Ordering) -> bool) -> bool {
    let check = |v: &Value| same_type_class(v, arg) && pred(compare_values(v, arg));
    match value {
        None => false,
        Some(Value::Array(items)) if !arg.is_array() => items.iter().any(check),
        Some(v) => check(v),
    }
}

fn regex_matches(value: Option<&Value>, pattern: &Value, options: &str) -> FeedResult<bool> {
    let Some(pattern) = pattern.as_str() else {
        return Err(ValidationError::InvalidSelector {
            reason: "$regex expects a string".to_string(),
        }
        .into());
    };

    let flags: String = options.chars().filter(|c| matches!(c, 'i' | 'm' | 's' | 'x')).collect();
    let full = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{flags}){pattern}")
    };
    let re = cached_regex(&full)?;

    Ok(match value {
        Some(Value::String(s)) => re.is_match(s),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| item.as_str().is_some_and(|s| re.is_match(s))),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sel(value: Value) -> Selector {
        Selector::from_value(value).unwrap()
    }

    #[test]
    fn empty_selector_matches_everything() {
        assert!(Selector::new().matches(&json!({"_id": "a"})).unwrap());
    }

    #[test]
    fn equality_on_dotted_paths_and_arrays() {
        let doc = json!({"_id": "a", "owner": {"name": "ann"}, "tags": ["x", "y"]});
        assert!(sel(json!({"owner.name": "ann"})).matches(&doc).unwrap());
        assert!(sel(json!({"tags": "y"})).matches(&doc).unwrap());
        assert!(!sel(json!({"tags": "z"})).matches(&doc).unwrap());
        assert!(sel(json!({"missing": null})).matches(&doc).unwrap());
    }

    #[test]
    fn comparison_operators_respect_type_classes() {
        let doc = json!({"_id": "a", "n": 5, "s": "5"});
        assert!(sel(json!({"n": {"$gt": 4, "$lte": 5}})).matches(&doc).unwrap());
        assert!(!sel(json!({"s": {"$gt": 4}})).matches(&doc).unwrap());
        assert!(sel(json!({"n": {"$in": [1, 5]}})).matches(&doc).unwrap());
        assert!(sel(json!({"n": {"$nin": [1, 2]}})).matches(&doc).unwrap());
        assert!(sel(json!({"n": {"$ne": 4}})).matches(&doc).unwrap());
        assert!(sel(json!({"x": {"$exists": false}})).matches(&doc).unwrap());
    }

    #[test]
    fn regex_with_case_insensitive_option() {
        let doc = json!({"_id": "a", "name": "Alice"});
        assert!(sel(json!({"name": {"$regex": "^ali", "$options": "i"}}))
            .matches(&doc)
            .unwrap());
        assert!(!sel(json!({"name": {"$regex": "^ali"}})).matches(&doc).unwrap());
    }

    #[test]
    fn logical_operators() {
        let doc = json!({"_id": "a", "n": 1, "c": "red"});
        assert!(sel(json!({"$or": [{"n": 2}, {"c": "red"}]})).matches(&doc).unwrap());
        assert!(!sel(json!({"$and": [{"n": 1}, {"c": "blue"}]})).matches(&doc).unwrap());
        assert!(sel(json!({"$nor": [{"n": 2}]})).matches(&doc).unwrap());
    }

    #[test]
    fn unsupported_operator_is_a_validation_error() {
        let err = sel(json!({"n": {"$where": "1"}}))
            .matches(&json!({"n": 1}))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn invalid_regex_is_a_validation_error() {
        let err = sel(json!({"n": {"$regex": "("}}))
            .matches(&json!({"n": "x"}))
            .unwrap_err();
        assert!(matches!(
            err,
            FeedError::Validation(ValidationError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn merge_overrides_keys() {
        let base = sel(json!({"status": "open", "n": 1}));
        let merged = base.merge(&sel(json!({"status": "closed"})));
        assert_eq!(merged.into_value(), json!({"status": "closed", "n": 1}));
    }

    #[test]
    fn and_collapses_trivial_clauses() {
        let one = Selector::and(vec![Selector::new(), sel(json!({"a": 1}))]);
        assert_eq!(one.into_value(), json!({"a": 1}));
        assert!(Selector::or(vec![]).is_empty());
    }
}
