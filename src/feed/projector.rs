//! Row projection: raw documents to externally visible rows.

use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::config::FeedConfig;
use crate::document::{json_type_name, DocumentId, PublicationId, RawDocument};
use crate::error::ProjectionError;

/// A published row: the document's fields plus the injected publication id
/// and rank attributes.
///
/// Equality is structural over every field, rank included, so two rows
/// compare equal only when re-sending one would be a no-op for the client.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleRow {
    id: DocumentId,
    rank: usize,
    fields: Map<String, Value>,
}

impl VisibleRow {
    /// Identity of the underlying document.
    #[must_use]
    pub const fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Zero-based position within the current window.
    #[must_use]
    pub const fn rank(&self) -> usize {
        self.rank
    }

    /// All fields, injected attributes included.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// One field by top-level name.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// The row as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

impl Serialize for VisibleRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

/// Turns matched documents into `VisibleRow`s.
#[derive(Debug, Clone)]
pub struct RowProjector {
    subscription_field: String,
    rank_field: String,
}

impl Default for RowProjector {
    fn default() -> Self {
        Self::from_config(&FeedConfig::default())
    }
}

impl RowProjector {
    /// A projector injecting the given attribute names.
    #[must_use]
    pub fn new(subscription_field: impl Into<String>, rank_field: impl Into<String>) -> Self {
        Self {
            subscription_field: subscription_field.into(),
            rank_field: rank_field.into(),
        }
    }

    /// A projector using the attribute names in `config`.
    #[must_use]
    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(config.subscription_field.clone(), config.rank_field.clone())
    }

    /// Name of the injected rank attribute.
    #[must_use]
    pub fn rank_field(&self) -> &str {
        &self.rank_field
    }

    /// Name of the injected publication id attribute.
    #[must_use]
    pub fn subscription_field(&self) -> &str {
        &self.subscription_field
    }

    /// Project one document at `rank`.
    ///
    /// The injected attributes overwrite same-named document fields.
    pub fn project(
        &self,
        raw: &RawDocument,
        rank: usize,
        publication: &PublicationId,
    ) -> Result<VisibleRow, ProjectionError> {
        let Value::Object(source) = raw.as_value() else {
            return Err(ProjectionError::NotAnObject {
                found: json_type_name(raw.as_value()),
            });
        };
        let id = raw.id()?;

        let mut fields = source.clone();
        fields.insert(
            self.subscription_field.clone(),
            Value::String(publication.as_str().to_string()),
        );
        fields.insert(self.rank_field.clone(), Value::from(rank));

        Ok(VisibleRow { id, rank, fields })
    }

    /// Project an ordered result set.
    ///
    /// A document that fails projection is skipped with a warning and does
    /// not consume a rank, so ranks of the returned rows stay contiguous.
    #[must_use]
    pub fn project_all(&self, docs: &[RawDocument], publication: &PublicationId) -> Vec<VisibleRow> {
        let mut rows = Vec::with_capacity(docs.len());
        for (position, doc) in docs.iter().enumerate() {
            match self.project(doc, rows.len(), publication) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    tracing::warn!(
                        publication = %publication,
                        position,
                        error = %e,
                        "skipping row that failed projection"
                    );
                }
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pid() -> PublicationId {
        PublicationId::new("pub-1")
    }

    #[test]
    fn project_injects_attributes_without_mutating_input() {
        let raw = RawDocument::new(json!({"_id": "a", "name": "Ann"}));
        let before = raw.clone();
        let row = RowProjector::default().project(&raw, 3, &pid()).unwrap();

        assert_eq!(raw, before);
        assert_eq!(row.id(), &DocumentId::new("a"));
        assert_eq!(row.rank(), 3);
        assert_eq!(
            row.to_value(),
            json!({"_id": "a", "name": "Ann", "feed-id": "pub-1", "feed-rank": 3})
        );
    }

    #[test]
    fn injected_attributes_win_over_document_fields() {
        let raw = RawDocument::new(json!({"_id": "a", "feed-rank": "mine", "feed-id": 9}));
        let row = RowProjector::default().project(&raw, 0, &pid()).unwrap();
        assert_eq!(row.get("feed-rank"), Some(&json!(0)));
        assert_eq!(row.get("feed-id"), Some(&json!("pub-1")));
    }

    #[test]
    fn custom_field_names() {
        let projector = RowProjector::new("table", "sort");
        let row = projector
            .project(&RawDocument::new(json!({"_id": 1})), 0, &pid())
            .unwrap();
        assert_eq!(row.to_value(), json!({"_id": 1, "table": "pub-1", "sort": 0}));
    }

    #[test]
    fn project_all_skips_malformed_rows_and_keeps_ranks_contiguous() {
        let docs = vec![
            RawDocument::new(json!({"_id": "a"})),
            RawDocument::new(json!({"no_id": true})),
            RawDocument::new(json!("scalar")),
            RawDocument::new(json!({"_id": "b"})),
        ];
        let rows = RowProjector::default().project_all(&docs, &pid());
        let summary: Vec<_> = rows.iter().map(|r| (r.id().as_str().to_string(), r.rank())).collect();
        assert_eq!(summary, vec![("a".to_string(), 0), ("b".to_string(), 1)]);
    }

    #[test]
    fn rank_is_part_of_equality() {
        let raw = RawDocument::new(json!({"_id": "a"}));
        let projector = RowProjector::default();
        let r0 = projector.project(&raw, 0, &pid()).unwrap();
        let r1 = projector.project(&raw, 1, &pid()).unwrap();
        assert_ne!(r0, r1);
        assert_eq!(r0, projector.project(&raw, 0, &pid()).unwrap());
    }

    #[test]
    fn serializes_as_flat_object() {
        let row = RowProjector::default()
            .project(&RawDocument::new(json!({"_id": "a"})), 0, &pid())
            .unwrap();
        let text = serde_json::to_string(&row).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, row.to_value());
    }
}
