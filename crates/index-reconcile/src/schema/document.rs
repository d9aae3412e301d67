//! Serde model of the pipeline schema document.
//!
//! The document is Avro-shaped JSON with two extensions: an `xjoin.type` tag on
//! field types and a top-level `transformations` list.

use serde::Deserialize;

/// Top-level schema document.
#[derive(Debug, Deserialize)]
pub struct SchemaDocument {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub fields: Vec<FieldSpec>,

    #[serde(default)]
    pub transformations: Vec<Transformation>,
}

/// One named field of a record.
#[derive(Debug, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub type_spec: TypeSpec,
}

/// A field type: a bare type name, a type object, or a union.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TypeSpec {
    Name(String),
    Union(Vec<TypeSpec>),
    Object(Box<TypeObject>),
}

/// An inline type definition.
#[derive(Debug, Deserialize)]
pub struct TypeObject {
    /// Avro type name (`record`, `string`, ...). Kept loose since nested
    /// definitions may appear here as well.
    #[serde(rename = "type", default)]
    pub avro_type: Option<serde_json::Value>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub fields: Option<Vec<FieldSpec>>,

    #[serde(rename = "xjoin.type", default)]
    pub xjoin_type: Option<String>,
}

/// A derived field computed by the pipeline.
#[derive(Debug, Deserialize)]
pub struct Transformation {
    #[serde(rename = "input.field", default)]
    pub input_field: Option<String>,

    #[serde(rename = "output.field")]
    pub output_field: String,

    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl TypeSpec {
    /// The member carrying the actual type: unions of `[null, T]` resolve to `T`.
    pub fn effective(&self) -> &TypeSpec {
        match self {
            TypeSpec::Union(members) => members
                .iter()
                .find(|m| !m.is_null())
                .or_else(|| members.first())
                .map(TypeSpec::effective)
                .unwrap_or(self),
            other => other,
        }
    }

    /// The `xjoin.type` tag of the effective member, if any.
    pub fn xjoin_type(&self) -> Option<&str> {
        match self.effective() {
            TypeSpec::Object(obj) => obj.xjoin_type.as_deref(),
            _ => None,
        }
    }

    /// Nested record fields of the effective member, if it is a record.
    pub fn record_fields(&self) -> Option<&[FieldSpec]> {
        match self.effective() {
            TypeSpec::Object(obj) => obj.fields.as_deref(),
            _ => None,
        }
    }

    fn is_null(&self) -> bool {
        matches!(self, TypeSpec::Name(name) if name == "null")
    }
}
