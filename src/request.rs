use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::eval::value::{Value, ValueMap};

/// Opaque pagination cursor handed back by a source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cursor {
    Number(i64),
    Text(String),
}

impl From<&str> for Cursor {
    fn from(s: &str) -> Self {
        Cursor::Text(s.to_string())
    }
}

impl From<i64> for Cursor {
    fn from(n: i64) -> Self {
        Cursor::Number(n)
    }
}

impl From<Cursor> for Value {
    fn from(cursor: Cursor) -> Self {
        match cursor {
            Cursor::Number(n) => Value::Integer(n),
            Cursor::Text(s) => Value::String(s),
        }
    }
}

/// A query against one request handler of one source. Handler-specific
/// parameters (search terms, ids, ...) travel in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericRequest {
    pub source: String,
    pub query_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    #[serde(flatten)]
    pub extra: Map<String, serde_json::Value>,
}

impl GenericRequest {
    pub fn new(source: impl Into<String>, query_type: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            query_type: query_type.into(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }

    /// Same request with every key of `defaults` that the request does not set.
    pub fn with_defaults(&self, defaults: &Map<String, serde_json::Value>) -> Self {
        let mut request = self.clone();
        for (key, default) in defaults {
            match key.as_str() {
                "source" | "queryType" => {}
                "pageNumber" if request.page_number.is_none() => {
                    request.page_number = default.as_i64();
                }
                "cursor" if request.cursor.is_none() => {
                    request.cursor = serde_json::from_value(default.clone()).ok();
                }
                "pageNumber" | "cursor" => {}
                _ => {
                    request
                        .extra
                        .entry(key.clone())
                        .or_insert_with(|| default.clone());
                }
            }
        }
        request
    }

    /// The request as a template value, in wire (camelCase) form.
    pub fn to_value(&self) -> Value {
        let mut map = ValueMap::new();
        map.insert("source".to_string(), Value::from(self.source.as_str()));
        map.insert("queryType".to_string(), Value::from(self.query_type.as_str()));
        if let Some(page_number) = self.page_number {
            map.insert("pageNumber".to_string(), Value::Integer(page_number));
        }
        if let Some(cursor) = &self.cursor {
            map.insert("cursor".to_string(), cursor.clone().into());
        }
        for (key, value) in &self.extra {
            map.insert(key.clone(), Value::from(value.clone()));
        }
        Value::Map(map)
    }
}
