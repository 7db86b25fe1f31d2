// Records and snapshot projection

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

/// Application-defined payload of one record
///
/// The adapter never inspects fields; it only (de)serializes them.
pub trait Fields: Serialize + DeserializeOwned + Clone + Send + 'static {}

impl<T> Fields for T where T: Serialize + DeserializeOwned + Clone + Send + 'static {}

/// A stored record: store-assigned key plus its fields
#[derive(Debug, Clone, PartialEq)]
pub struct Record<F> {
    pub id: String,
    pub fields: F,
}

impl<F> Record<F> {
    pub fn new(id: impl Into<String>, fields: F) -> Self {
        Self { id: id.into(), fields }
    }
}

/// Materialize a keyed collection value as records in store order
///
/// `null` is an empty collection. Any other non-mapping value is treated as
/// empty too, and children that do not decode as `F` are skipped; both are
/// logged rather than raised so a view never fails on bad remote data.
pub fn project_records<F: Fields>(path: &str, value: &Value) -> Vec<Record<F>> {
    let map = match value {
        Value::Null => return Vec::new(),
        Value::Object(map) => map,
        other => {
            warn!(path, kind = kind_of(other), "Expected a mapping of records, projecting as empty");
            return Vec::new();
        }
    };

    let mut records = Vec::with_capacity(map.len());
    for (id, child) in map {
        match serde_json::from_value::<F>(child.clone()) {
            Ok(fields) => records.push(Record::new(id.clone(), fields)),
            Err(e) => {
                warn!(path, id = %id, error = %e, "Skipping record that doesn't match type");
            }
        }
    }
    records
}

/// Materialize a singleton value; `None` when absent or undecodable
pub fn project_document<F: Fields>(path: &str, value: &Value) -> Option<F> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value::<F>(value.clone()) {
        Ok(fields) => Some(fields),
        Err(e) => {
            warn!(path, error = %e, "Document doesn't match type, projecting as absent");
            None
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
