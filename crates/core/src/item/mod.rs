//! Items moving through the pipeline and their durable history.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteItemStore;
pub use store::{ItemFilter, ItemStore, ItemStoreError};
pub use types::{HistoryEntry, Item, ItemKind, ItemStatus, Outcome, Position};
