//! JSON schemas for the structured document the extraction service returns.
//!
//! Structs get their schema from `#[derive(Schema)]`; string-valued enums
//! implement it through [`string_enum_schema!`].

use serde_json::Value;

/// A type that can describe itself as a JSON schema.
pub trait JsonSchema {
    fn json_schema() -> Value;
}

/// Implement [`JsonSchema`] for a unit-variant enum serialized as a string.
macro_rules! string_enum_schema {
    ($ty:ty => [$($variant:literal),+ $(,)?]) => {
        impl $crate::schema::JsonSchema for $ty {
            fn json_schema() -> serde_json::Value {
                serde_json::json!({ "type": "string", "enum": [$($variant),+] })
            }
        }
    };
}

pub(crate) use string_enum_schema;
