//! Initial search request of a shard

use crate::config::ApiVersion;
use crate::shard::RangeFilter;
use serde_json::{json, Map, Value};

/// The version-appropriate initial scroll search
#[derive(Debug, Clone, PartialEq)]
pub struct ScanQuery {
    pub index: Option<String>,
    pub doc_type: Option<String>,
    /// `scan` for legacy sources
    pub search_type: Option<String>,
    pub scroll: String,
    pub size: usize,
    pub body: Map<String, Value>,
}

impl ScanQuery {
    /// Base query for a source cluster of the given version
    ///
    /// Legacy sources scan with an empty body; newer ones sort by `_doc`.
    pub fn for_version(
        version: &ApiVersion,
        index: Option<String>,
        doc_type: Option<String>,
        scroll: impl Into<String>,
        size: usize,
    ) -> Self {
        let (search_type, body) = if version.is_legacy() {
            (Some("scan".to_string()), Map::new())
        } else {
            let mut body = Map::new();
            body.insert("sort".to_string(), json!("_doc"));
            (None, body)
        };

        Self {
            index,
            doc_type,
            search_type,
            scroll: scroll.into(),
            size,
            body,
        }
    }

    /// Restrict to the shard's range unless the body already has a query
    pub fn with_range_default(mut self, range: Option<&RangeFilter>) -> Self {
        if let Some(range) = range {
            self.body
                .entry("query")
                .or_insert_with(|| range.to_query());
        }
        self
    }

    /// Merge top-level keys over the body; later sources win
    pub fn merge_body(mut self, extra: Option<&Map<String, Value>>) -> Self {
        if let Some(extra) = extra {
            for (key, value) in extra {
                self.body.insert(key.clone(), value.clone());
            }
        }
        self
    }

    /// `/{index}[/{type}]/_search?scroll=..&size=..[&search_type=scan]`
    pub fn search_path(&self) -> String {
        let mut path = String::new();
        if let Some(index) = &self.index {
            path.push('/');
            path.push_str(&urlencoding::encode(index));
            if let Some(doc_type) = &self.doc_type {
                path.push('/');
                path.push_str(&urlencoding::encode(doc_type));
            }
        }

        path.push_str(&format!(
            "/_search?scroll={}&size={}",
            urlencoding::encode(&self.scroll),
            self.size
        ));
        if let Some(search_type) = &self.search_type {
            path.push_str(&format!("&search_type={}", urlencoding::encode(search_type)));
        }
        path
    }
}
