//! The reference server's configured type set.
//!
//! `carry_engine` is deliberately silent on application record shapes
//! (§1 Non-goals): a real deployment plugs in its own types at
//! `TypeRegistry` construction. This reference server stands in for
//! that deployment with two demo collections, `notes` and `todos`,
//! validated against a `Schema` the way the starting point's
//! `get_default_schema` did for its own collections.

use carry_engine::payload::TypeRegistry;
use carry_engine::schema::{CollectionSchema, FieldDef, FieldType, Schema};

/// The type names and order every authoritative store, client, and test
/// in this reference deployment agrees on.
pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register_json("notes");
    registry.register_json("todos");
    registry
}

/// Payload validation schema matching `registry`'s configured types.
pub fn schema() -> Schema {
    Schema::new()
        .with_collection(CollectionSchema::new(
            "notes",
            vec![
                FieldDef::required("title", FieldType::String),
                FieldDef::optional("body", FieldType::String),
            ],
        ))
        .with_collection(CollectionSchema::new(
            "todos",
            vec![
                FieldDef::required("title", FieldType::String),
                FieldDef::optional("completed", FieldType::Bool),
            ],
        ))
}
