//! Pipeline schema model.
//!
//! Parses the schema document once into a [`ParsedSchema`] that every
//! reconciliation phase shares read-only: the root node name, the semantic type
//! of each comparable field, the database column projection and the set of
//! derived fields excluded from comparison.

mod document;

pub use document::{FieldSpec, SchemaDocument, Transformation, TypeObject, TypeSpec};

use crate::error::{ReconcileError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Prefix marking pipeline metadata fields.
pub const INTERNAL_FIELD_PREFIX: &str = "__";

/// Semantic type of a field, selected by its `xjoin.type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    DateNanos,
    Json,
    Boolean,
    Byte,
    Array,
    Passthrough,
}

impl FieldType {
    /// Map an `xjoin.type` tag to a field type. Untagged or unknown fields are
    /// compared as-is.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some("string") => FieldType::String,
            Some("date_nanos") => FieldType::DateNanos,
            Some("json") => FieldType::Json,
            Some("boolean") => FieldType::Boolean,
            Some("byte") => FieldType::Byte,
            Some("array") => FieldType::Array,
            _ => FieldType::Passthrough,
        }
    }

    /// Whether the database projection reads this field as text.
    pub fn reads_as_text(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Json | FieldType::Array)
    }
}

/// Whether a field carries pipeline metadata rather than entity data.
pub fn is_internal_field(name: &str) -> bool {
    name.starts_with(INTERNAL_FIELD_PREFIX)
}

/// A comparable field of the root record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaField {
    pub name: String,
    pub field_type: FieldType,
}

/// The parsed, immutable schema.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedSchema {
    /// Name of the single top-level field under which entity attributes nest.
    pub root_node: String,

    /// Comparable fields in document order.
    pub fields: Vec<SchemaField>,

    /// Columns selected from the database, in document order.
    pub database_columns: Vec<String>,

    /// Derived fields (`root.field`) excluded from projection and comparison.
    pub transformed_fields: BTreeSet<String>,

    /// Datasource named by the schema namespace, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datasource: Option<String>,
}

impl ParsedSchema {
    /// Parse a schema document.
    pub fn parse(document: &str) -> Result<Self> {
        let doc: SchemaDocument = serde_json::from_str(document)
            .map_err(|e| ReconcileError::Schema(format!("malformed schema document: {}", e)))?;
        Self::from_document(&doc)
    }

    /// Build the model from an already deserialized document.
    pub fn from_document(doc: &SchemaDocument) -> Result<Self> {
        let root = match doc.fields.as_slice() {
            [root] => root,
            [] => return Err(ReconcileError::Schema("root field missing from schema".into())),
            fields => {
                let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
                return Err(ReconcileError::Schema(format!(
                    "schema must have exactly one top-level field, found {}: {}",
                    fields.len(),
                    names.join(", ")
                )));
            }
        };

        let record_fields = root.type_spec.record_fields().ok_or_else(|| {
            ReconcileError::Schema(format!("root field '{}' is not a record", root.name))
        })?;

        let transformed_fields: BTreeSet<String> = doc
            .transformations
            .iter()
            .map(|t| t.output_field.clone())
            .collect();

        let mut fields = Vec::new();
        let mut database_columns = Vec::new();
        for field in record_fields {
            let qualified = format!("{}.{}", root.name, field.name);
            if transformed_fields.contains(&qualified) || is_internal_field(&field.name) {
                continue;
            }
            let field_type = FieldType::from_tag(field.type_spec.xjoin_type());
            database_columns.push(field.name.clone());
            fields.push(SchemaField {
                name: field.name.clone(),
                field_type,
            });
        }

        let datasource = doc
            .namespace
            .as_deref()
            .and_then(|ns| ns.split('.').nth(1))
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        debug!(
            "Parsed schema: root={}, {} comparable fields, {} transformed",
            root.name,
            fields.len(),
            transformed_fields.len()
        );

        Ok(Self {
            root_node: root.name.clone(),
            fields,
            database_columns,
            transformed_fields,
            datasource,
        })
    }

    /// Field name to semantic type.
    pub fn field_types(&self) -> BTreeMap<&str, FieldType> {
        self.fields
            .iter()
            .map(|f| (f.name.as_str(), f.field_type))
            .collect()
    }

    /// Whether `root.<name>` is produced by a transformation.
    pub fn is_transformed(&self, name: &str) -> bool {
        self.transformed_fields
            .contains(&format!("{}.{}", self.root_node, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HOSTS_SCHEMA;

    #[test]
    fn test_parse_hosts_schema() {
        let schema = ParsedSchema::parse(HOSTS_SCHEMA).unwrap();
        assert_eq!(schema.root_node, "host");
        assert_eq!(schema.datasource.as_deref(), Some("hosts"));
        assert_eq!(
            schema.database_columns,
            vec![
                "id",
                "account",
                "display_name",
                "modified_on",
                "facts",
                "tags",
                "stale",
                "groups",
                "per_reporter_staleness"
            ]
        );
        assert!(schema.is_transformed("tags_structured"));
        assert!(!schema.is_transformed("tags"));

        let types = schema.field_types();
        assert_eq!(types["id"], FieldType::String);
        assert_eq!(types["modified_on"], FieldType::DateNanos);
        assert_eq!(types["facts"], FieldType::Json);
        assert_eq!(types["stale"], FieldType::Boolean);
        assert_eq!(types["groups"], FieldType::Array);
        assert_eq!(types["per_reporter_staleness"], FieldType::Passthrough);
        assert!(!types.contains_key("__dbz_source_ts_ms"));
        assert!(!types.contains_key("tags_structured"));
    }

    #[test]
    fn test_missing_root_field() {
        let err = ParsedSchema::parse(r#"{"type": "record", "fields": []}"#).unwrap_err();
        assert!(matches!(err, ReconcileError::Schema(_)));
    }

    #[test]
    fn test_multiple_top_level_fields_rejected() {
        let doc = r#"{"fields": [
            {"name": "host", "type": {"type": "record", "name": "Host", "fields": []}},
            {"name": "system_profile", "type": {"type": "record", "name": "Profile", "fields": []}}
        ]}"#;
        let err = ParsedSchema::parse(doc).unwrap_err();
        assert!(matches!(err, ReconcileError::Schema(_)));
        assert!(err.to_string().contains("exactly one top-level field"));
        assert!(err.to_string().contains("host, system_profile"));
    }

    #[test]
    fn test_root_must_be_record() {
        let err =
            ParsedSchema::parse(r#"{"fields": [{"name": "host", "type": "string"}]}"#).unwrap_err();
        assert!(err.to_string().contains("not a record"));
    }

    #[test]
    fn test_malformed_document() {
        let err = ParsedSchema::parse("{not json").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_internal_field_detection() {
        assert!(is_internal_field("__core_read_ms"));
        assert!(!is_internal_field("_id"));
        assert!(!is_internal_field("display_name"));
    }
}
