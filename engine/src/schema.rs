//! Schema definition and validation for untyped JSON payloads.
//!
//! A `Schema` is consulted only by [`crate::payload::JsonPayload`]; typed
//! `RecordPayload` implementations bypass it entirely. It exists for
//! applications that would rather validate loosely-typed JSON at the
//! boundary than write a dedicated payload type per record kind.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failure for a payload checked against a `CollectionSchema`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("payload must be an object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },
}

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&serde_json::Value>) -> Result<(), SchemaError> {
        match value {
            None if self.required => Err(SchemaError::MissingRequiredField(self.name.clone())),
            None => Ok(()),
            Some(serde_json::Value::Null) if self.required => {
                Err(SchemaError::MissingRequiredField(self.name.clone()))
            }
            Some(serde_json::Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &serde_json::Value) -> Result<(), SchemaError> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64() || value.is_i64(),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(SchemaError::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        serde_json::Value::Number(_) => "Float",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// Schema for a single record type's untyped JSON payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Validate a payload against this schema.
    pub fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), SchemaError> {
        let obj = payload.as_object().ok_or(SchemaError::NotAnObject)?;

        for field in &self.fields {
            field.validate(obj.get(&field.name))?;
        }

        Ok(())
    }
}

/// A registry of per-type payload schemas, consulted by `JsonPayload`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub collections: HashMap<String, CollectionSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collection to the schema.
    pub fn add_collection(&mut self, collection: CollectionSchema) -> &mut Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }

    /// Builder-style method to add a collection.
    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.add_collection(collection);
        self
    }

    /// Get a collection schema by name.
    pub fn get_collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.get(name)
    }
}
