//! Document types exchanged between the scroll and bulk stages

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One source document as returned in a search page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_routing", default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,
    #[serde(rename = "_parent", default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(rename = "_source", default)]
    pub source: Map<String, Value>,
}

impl Hit {
    /// Value of a top-level source field rendered as a routing key
    pub fn field_as_key(&self, field: &str) -> Option<String> {
        match self.source.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}
