//! Non-blocking read results for the UI layer.

use std::sync::Arc;

use serde_json::Value;

/// Answer to a non-blocking read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadState {
    /// Value available in memory.
    Ready(Arc<Value>),
    /// A fetch is running; read again later.
    Pending,
    /// The source reported the resource does not exist.
    Absent,
}

impl ReadState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadState::Ready(_))
    }

    pub fn into_value(self) -> Option<Arc<Value>> {
        match self {
            ReadState::Ready(v) => Some(v),
            _ => None,
        }
    }
}
