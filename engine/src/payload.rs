//! The payload capability set records are polymorphic over, and the
//! registry that maps a configured type name to a constructor for it.
//!
//! The source this spec distills leans on constructor-function identity
//! (a class reference) as a map key and on reflection to rebuild an
//! instance from its serialized form. Neither idiom has a direct
//! equivalent here: a type name string is the key, and reconstruction
//! goes through a small parser function registered for that name at
//! construction.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::schema::{CollectionSchema, Schema};

/// Capability set a record payload must implement to plug into the
/// store: round-trip to canonical form, equality modulo intrinsic
/// fields, and a stable display string.
///
/// Object-safe by design (no `Self: Sized` methods) so that payloads of
/// different concrete types can share one `Box<dyn RecordPayload>`
/// container inside `Record`. Reconstruction from canonical form is
/// handled separately by a `PayloadParser` registered in `TypeRegistry`,
/// since a constructor cannot be part of an object-safe trait.
pub trait RecordPayload: fmt::Debug + Send + Sync {
    /// Serialize to the JSON object this payload round-trips through.
    fn to_canonical(&self) -> Value;

    /// A deep copy, boxed as a trait object.
    fn clone_payload(&self) -> Box<dyn RecordPayload>;

    /// A stable, human-readable rendering (for logs and diagnostics).
    fn display(&self) -> String;

    /// Equality modulo intrinsic fields (`created`/`modified`), i.e.
    /// payload-only equality.
    fn payload_eq(&self, other: &dyn RecordPayload) -> bool;
}

impl Clone for Box<dyn RecordPayload> {
    fn clone(&self) -> Self {
        self.clone_payload()
    }
}

impl PartialEq for dyn RecordPayload {
    fn eq(&self, other: &Self) -> bool {
        self.payload_eq(other)
    }
}

/// A schema-validated, untyped JSON payload.
///
/// This is the generalization of the starting point's runtime
/// `CollectionSchema`/`FieldDef` validation: applications that do not
/// want a statically typed payload can use this, validated against a
/// `CollectionSchema` looked up by type name the same way the starting
/// point's `Schema::validate_operation` worked.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPayload(pub Value);

impl JsonPayload {
    /// Validate `value` against `schema`'s definition for `type_name`,
    /// then wrap it.
    pub fn validated(type_name: &str, value: Value, schema: &Schema) -> Result<Self> {
        let collection = schema
            .get_collection(type_name)
            .ok_or_else(|| Error::Type(format!("unconfigured type: {type_name}")))?;
        validate_payload(collection, &value)?;
        Ok(JsonPayload(value))
    }
}

fn validate_payload(collection: &CollectionSchema, value: &Value) -> Result<()> {
    collection
        .validate_payload(value)
        .map_err(|e| Error::Type(e.to_string()))
}

impl RecordPayload for JsonPayload {
    fn to_canonical(&self) -> Value {
        self.0.clone()
    }

    fn clone_payload(&self) -> Box<dyn RecordPayload> {
        Box::new(self.clone())
    }

    fn display(&self) -> String {
        self.0.to_string()
    }

    fn payload_eq(&self, other: &dyn RecordPayload) -> bool {
        self.0 == other.to_canonical()
    }
}

/// Builds a `Box<dyn RecordPayload>` from its canonical JSON form.
///
/// A plain function pointer, not a closure, so registration stays cheap
/// and `TypeRegistry` stays `Clone`.
pub type PayloadParser = fn(&Value) -> Result<Box<dyn RecordPayload>>;

fn parse_json_payload(value: &Value) -> Result<Box<dyn RecordPayload>> {
    Ok(Box::new(JsonPayload(value.clone())))
}

/// Maps configured type names to a parser for their payload, and
/// remembers the order types were configured in — the order the
/// canonical codec (C1) serializes the top-level record-set mapping in.
#[derive(Clone)]
pub struct TypeRegistry {
    order: Vec<String>,
    parsers: HashMap<String, PayloadParser>,
}

impl TypeRegistry {
    /// An empty registry with no configured types.
    pub fn new() -> Self {
        TypeRegistry {
            order: Vec::new(),
            parsers: HashMap::new(),
        }
    }

    /// Register `type_name` with a parser, appending it to the
    /// configured order. Re-registering an existing name keeps its
    /// original position.
    pub fn register(&mut self, type_name: impl Into<String>, parser: PayloadParser) {
        let type_name = type_name.into();
        if !self.parsers.contains_key(&type_name) {
            self.order.push(type_name.clone());
        }
        self.parsers.insert(type_name, parser);
    }

    /// Register `type_name` with the default untyped JSON payload
    /// parser (no schema validation on load).
    pub fn register_json(&mut self, type_name: impl Into<String>) {
        self.register(type_name, parse_json_payload);
    }

    /// Type names in configured order.
    pub fn type_order(&self) -> &[String] {
        &self.order
    }

    /// Whether `type_name` was configured.
    pub fn contains(&self, type_name: &str) -> bool {
        self.parsers.contains_key(type_name)
    }

    /// Parse a payload for `type_name` from its canonical form.
    pub fn parse(&self, type_name: &str, value: &Value) -> Result<Box<dyn RecordPayload>> {
        let parser = self
            .parsers
            .get(type_name)
            .ok_or_else(|| Error::Type(format!("unconfigured type: {type_name}")))?;
        parser(value)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_preserves_configured_order() {
        let mut registry = TypeRegistry::new();
        registry.register_json("notes");
        registry.register_json("todos");
        registry.register_json("tags");

        assert_eq!(registry.type_order(), &["notes", "todos", "tags"]);
    }

    #[test]
    fn reregistering_keeps_original_position() {
        let mut registry = TypeRegistry::new();
        registry.register_json("notes");
        registry.register_json("todos");
        registry.register_json("notes");

        assert_eq!(registry.type_order(), &["notes", "todos"]);
    }

    #[test]
    fn parse_unconfigured_type_fails() {
        let registry = TypeRegistry::new();
        let err = registry.parse("notes", &json!({})).unwrap_err();
        assert!(matches!(err, Error::Type(_)));
    }

    #[test]
    fn json_payload_round_trips() {
        let mut registry = TypeRegistry::new();
        registry.register_json("notes");

        let value = json!({"title": "hello"});
        let payload = registry.parse("notes", &value).unwrap();
        assert_eq!(payload.to_canonical(), value);
    }

    #[test]
    fn json_payload_equality_is_payload_only() {
        let a = JsonPayload(json!({"title": "hello"}));
        let b = JsonPayload(json!({"title": "hello"}));
        let c = JsonPayload(json!({"title": "world"}));

        assert!(a.payload_eq(&b));
        assert!(!a.payload_eq(&c));
    }
}
