//! Internal helpers for model validation and conversion.
//!
//! These utilities are **not** part of the public API. They centralize
//! parsing and mapping logic shared by the persistence conversions.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::{EngineError, ResultEngine};

/// Parse a UUID from storage and return a labeled error on failure.
pub(crate) fn parse_uuid(value: &str, label: &str) -> ResultEngine<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| EngineError::Validation(format!("invalid {label} id: {value:?}")))
}

/// Serialize a tag set into the JSON text column format.
pub(crate) fn tags_to_json(tags: &BTreeSet<String>) -> ResultEngine<String> {
    serde_json::to_string(tags)
        .map_err(|err| EngineError::Validation(format!("unserializable tags: {err}")))
}

/// Parse the JSON text column format back into a tag set.
pub(crate) fn tags_from_json(value: &str) -> ResultEngine<BTreeSet<String>> {
    serde_json::from_str(value)
        .map_err(|err| EngineError::Validation(format!("invalid stored tags: {err}")))
}
