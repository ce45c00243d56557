mod index;
mod sanitize;

pub use index::{IndexFields, SearchHit, SearchIndex, SourceKind, MARK_CLOSE, MARK_OPEN};
pub(crate) use index::{delete_entry, delete_event_entries, upsert_entry};
pub use sanitize::{fallback_or_query, sanitize};
