//! `PropertyValue`: the closed scalar/array union carried by `SetProperty` ops.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A property value. `Date` is an ISO-8601 string kept distinct from a plain
/// `String` only at the API surface — on the wire both serialize as JSON
/// strings, and since nothing in a bare JSON string marks it as a date, a
/// decoded value always comes back as `String`. `Date` exists so Rust callers
/// that construct a timestamp (`PropertyValue::date(...)`) can say so at the
/// point of creation; it is declared after `String` so untagged
/// deserialization — which tries variants in order — never produces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Date(String),
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn date(iso: impl Into<String>) -> Self {
        PropertyValue::Date(iso.into())
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Number(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

/// Encode a possibly-absent `PropertyValue` onto the wire. `undefined` has no
/// JSON representation, so it is encoded as an empty object sentinel rather
/// than a field-omission convention (see DESIGN.md).
pub fn encode_value(value: Option<&PropertyValue>) -> Json {
    match value {
        Some(v) => serde_json::to_value(v).unwrap_or(Json::Null),
        None => Json::Object(Default::default()),
    }
}

/// Decode a wire value back into a possibly-absent `PropertyValue`. An empty
/// JSON object decodes back to `None` (the `undefined` sentinel); anything
/// else decodes to `Some`.
pub fn decode_value(json: Json) -> Option<PropertyValue> {
    if let Json::Object(map) = &json {
        if map.is_empty() {
            return None;
        }
    }
    serde_json::from_value(json).ok()
}
