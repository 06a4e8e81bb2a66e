//! Collection sync state.

use std::time::SystemTime;

use serde::Serialize;

/// Load progress of one large collection.
///
/// `Idle → Syncing → Complete`; `Complete` is terminal until an
/// invalidation resets it to `Idle`. A failed sweep also returns to `Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing {
        pages: usize,
        rows: usize,
    },
    Complete {
        total_rows: usize,
        completed_at: SystemTime,
    },
}

impl SyncState {
    pub fn is_complete(&self) -> bool {
        matches!(self, SyncState::Complete { .. })
    }

    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncState::Syncing { .. })
    }

    pub(crate) fn complete(total_rows: usize) -> Self {
        SyncState::Complete {
            total_rows,
            completed_at: SystemTime::now(),
        }
    }
}
