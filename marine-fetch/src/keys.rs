use crate::error::FetchError;
use crate::transport::FetchRequest;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Canonical identity of a logical request.
///
/// Built from the HTTP method, the case-folded URL and the sorted query
/// parameters, plus a digest of the canonical JSON body when there is one.
/// Parameter insertion order never changes the key.
#[derive(Hash, Eq, PartialEq, Clone, Debug, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn from_request(request: &FetchRequest) -> Result<Self, FetchError> {
        let canonical = ::utils::canonicalize(request.url(), request.query())
            .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", request.url(), e)))?;

        let mut key = format!("{} {}", request.method(), canonical);
        if let Some(body) = request.body() {
            let mut hasher = Sha256::new();
            hasher.update(canonical_json(body).to_string().as_bytes());
            key.push_str(" #");
            key.push_str(&hex::encode(hasher.finalize()));
        }
        Ok(RequestKey(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rebuilds every object with its keys in sorted order.
fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), canonical_json(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}

/// Families of cached provider data. The display name doubles as the cache
/// key prefix, so `invalidate("marine:")` drops one family at once.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DataKind {
    Current,
    Marine,
    Forecast,
    MapFeatures,
    Geocode,
    Archive,
}

/// Four decimal places, with negative zero folded into zero.
pub fn format_coordinate(value: f64) -> String {
    let formatted = format!("{:.4}", value);
    if formatted == "-0.0000" {
        "0.0000".to_string()
    } else {
        formatted
    }
}

fn location(lat: f64, lon: f64) -> String {
    format!("{},{}", format_coordinate(lat), format_coordinate(lon))
}

pub fn marine_key(lat: f64, lon: f64, date: Option<NaiveDate>) -> String {
    let mut key = format!("{}:{}", DataKind::Marine, location(lat, lon));
    if let Some(date) = date {
        key.push_str(&format!(":{}", date));
    }
    key
}

pub fn forecast_key(lat: f64, lon: f64, model: &str, date: Option<NaiveDate>) -> String {
    let mut key = format!("{}:{}:{}", DataKind::Forecast, model, location(lat, lon));
    if let Some(date) = date {
        key.push_str(&format!(":{}", date));
    }
    key
}

pub fn current_key(lat: f64, lon: f64) -> String {
    format!("{}:{}", DataKind::Current, location(lat, lon))
}
