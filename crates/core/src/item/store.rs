//! Item storage trait and types.

use thiserror::Error;

use super::{HistoryEntry, Item, ItemKind, ItemStatus};

/// Error type for item storage.
#[derive(Debug, Error)]
pub enum ItemStoreError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Item already exists: {0}")]
    AlreadyExists(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for ItemStoreError {
    fn from(e: rusqlite::Error) -> Self {
        ItemStoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for ItemStoreError {
    fn from(e: serde_json::Error) -> Self {
        ItemStoreError::Database(e.to_string())
    }
}

/// Filter for querying items.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub status: Option<ItemStatus>,
    pub lineage: Option<String>,
    /// Current stage id.
    pub stage: Option<String>,
    pub kind: Option<ItemKind>,
    pub job: Option<String>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl ItemFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_lineage(mut self, lineage: impl Into<String>) -> Self {
        self.lineage = Some(lineage.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_kind(mut self, kind: ItemKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for item storage backends.
///
/// History rows are insert-only. The item row holds the current position
/// and counters and is overwritten on every transition.
pub trait ItemStore: Send + Sync {
    /// Insert a freshly submitted item (history must be empty).
    fn create(&self, item: &Item) -> Result<(), ItemStoreError>;

    /// Get an item with its full history.
    fn get(&self, id: &str) -> Result<Option<Item>, ItemStoreError>;

    /// List items matching the filter, oldest first.
    fn list(&self, filter: &ItemFilter) -> Result<Vec<Item>, ItemStoreError>;

    /// Count items matching the filter (ignores limit/offset).
    fn count(&self, filter: &ItemFilter) -> Result<i64, ItemStoreError>;

    /// Overwrite the item row (not its history).
    fn save(&self, item: &Item) -> Result<(), ItemStoreError>;

    /// Append one history row.
    fn append_history(&self, item_id: &str, entry: &HistoryEntry) -> Result<(), ItemStoreError>;

    /// Append a history row and overwrite the item row in one transaction.
    fn record_transition(&self, item: &Item, entry: &HistoryEntry)
        -> Result<(), ItemStoreError>;

    /// Every item not in a terminal position, without limit.
    fn list_in_flight(&self) -> Result<Vec<Item>, ItemStoreError>;
}
