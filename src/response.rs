use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::eval::value::Value;
use crate::request::{Cursor, GenericRequest};

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaginationType {
    Offset,
    Cursor,
    #[default]
    None,
}

/// Page metadata of a paginated response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub pagination_type: PaginationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_last_page: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_media: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub page_fetch_limit_reached: bool,
}

/// A validated page of media returned by a request handler.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenericResponse {
    pub page: Option<Page>,
    pub media: Vec<Value>,
    pub request: GenericRequest,
    /// The full evaluated template, including handler-specific keys.
    #[serde(skip)]
    pub body: Value,
}

impl GenericResponse {
    /// Reads the typed parts out of an evaluated template.
    pub fn from_value(body: Value) -> serde_json::Result<Self> {
        let json = body.to_json();
        let page = match json.get("page") {
            Some(page) if !page.is_null() => Some(serde_json::from_value(page.clone())?),
            _ => None,
        };
        let request = serde_json::from_value(json.get("request").cloned().unwrap_or_default())?;
        let media = body
            .get("media")
            .and_then(Value::as_list)
            .map(|items| items.iter().filter(|v| !v.is_exclude()).cloned().collect())
            .unwrap_or_default();
        Ok(Self {
            page,
            media,
            request,
            body,
        })
    }

    pub fn is_last_page(&self) -> bool {
        self.page
            .as_ref()
            .and_then(|page| page.is_last_page)
            .unwrap_or(false)
    }
}
