//! Cursor-paginated collection pages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One page of a paginated collection.
///
/// Only `next_cursor == None` ends a sweep. A page with no items but a
/// cursor is valid and must be followed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn new(items: Vec<Value>, next_cursor: Option<&str>) -> Self {
        Self {
            items,
            next_cursor: next_cursor.map(str::to_string),
        }
    }

    /// Whether this is the final page.
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}
