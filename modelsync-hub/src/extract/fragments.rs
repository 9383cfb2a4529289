//! Fragment marker collection and payload strategies
//!
//! The upstream framework streams page data as a series of
//! `self.__next_f.push([segmentId, "payload"])` statements. Each pushed
//! array is parsed as JSON; payloads that survive are searched with three
//! strategies, first productive one wins:
//!
//! 1. A keyed `"models": [...]` array whose objects carry `model_name`
//! 2. Individual objects where `model_name` and `quality_index` co-occur
//! 3. A `"pageProps"` container holding a models array
//!
//! Strategy 2 reconstructs the object from its regex captures when the
//! matched text is not quite valid JSON.

use super::Strategy;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

static CHUNK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"self\.__next_f\.push\(\s*\[([^\]]+)\]\s*\)").unwrap());

static MODELS_ARRAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""models"\s*:\s*(\[[^\]]*?\{[^\}]*?"model_name"[^\]]*?\])"#).unwrap()
});

static MODEL_OBJECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{[^}]*"model_name"\s*:\s*"([^"]+)"[^}]*"quality_index"\s*:\s*([0-9.]+)[^}]*\}"#)
        .unwrap()
});

static PAGE_PROPS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""pageProps"\s*:\s*\{[^}]*"models"\s*:\s*(\[[^\]]+\])"#).unwrap());

/// One pushed fragment, unwrapped from its array envelope
#[derive(Debug, Clone)]
pub struct FlightChunk {
    pub segment_id: String,
    pub payload: String,
}

/// Collect fragment chunks from a document
///
/// Tolerant by construction: a push whose array content does not parse, has
/// fewer than two elements, or carries a non-string payload is skipped.
pub fn collect_chunks(html: &str) -> Vec<FlightChunk> {
    let mut chunks = Vec::new();

    for caps in CHUNK_RE.captures_iter(html) {
        let wrapped = format!("[{}]", &caps[1]);
        let parsed: Value = match serde_json::from_str(&wrapped) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let items = match parsed.as_array() {
            Some(items) if items.len() >= 2 => items,
            _ => continue,
        };
        let payload = match items[1].as_str() {
            Some(s) => s,
            None => continue,
        };

        chunks.push(FlightChunk {
            segment_id: scalar_to_string(&items[0]),
            payload: payload.to_string(),
        });
    }

    chunks
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Run the payload strategies in order, returning the first productive
/// strategy's models
pub fn models_from_payload(payload: &str) -> (Vec<Value>, Option<Strategy>) {
    let models = keyed_arrays(payload);
    if !models.is_empty() {
        return (models, Some(Strategy::KeyedArray));
    }

    let models = entity_objects(payload);
    if !models.is_empty() {
        return (models, Some(Strategy::EntityObjects));
    }

    let models = page_props(payload);
    if !models.is_empty() {
        return (models, Some(Strategy::PageProps));
    }

    (Vec::new(), None)
}

fn keyed_arrays(payload: &str) -> Vec<Value> {
    let mut models = Vec::new();

    for caps in MODELS_ARRAY_RE.captures_iter(payload) {
        // Nested payloads escape their quotes one level deeper
        let candidate = caps[1].replace("\\\"", "\"");
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&candidate) {
            models.extend(items);
        }
    }

    models
}

fn entity_objects(payload: &str) -> Vec<Value> {
    let mut models = Vec::new();

    for caps in MODEL_OBJECT_RE.captures_iter(payload) {
        match serde_json::from_str::<Value>(&caps[0]) {
            Ok(obj) => models.push(obj),
            Err(_) => {
                if let Ok(score) = caps[2].parse::<f64>() {
                    models.push(json!({
                        "model_name": &caps[1],
                        "quality_index": score,
                    }));
                }
            }
        }
    }

    models
}

fn page_props(payload: &str) -> Vec<Value> {
    let mut models = Vec::new();

    for caps in PAGE_PROPS_RE.captures_iter(payload) {
        let candidate = caps[1].replace("\\\"", "\"");
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&candidate) {
            models.extend(items);
        }
    }

    models
}
