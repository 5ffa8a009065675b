//! Storage backends for study-companion

mod jsonl;
mod sqlite;

pub use jsonl::JsonlContentPack;
pub use sqlite::SqliteContentRepository;
