//! SQLite storage for content pools and their appearance ledger

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{params, Connection};

use crate::config::Config;
use crate::content::{ContentItem, ContentRepository, ExposureKind, Level, DEFAULT_SUBJECT};
use crate::error::{Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite-backed content repository
pub struct SqliteContentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteContentRepository {
    /// Open the repository at the configured path
    pub fn new(config: &Config) -> Result<Self> {
        Self::open(config.sqlite_path())
    }

    /// Open (or create) a repository at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// A throwaway in-memory repository
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| Error::storage(e.to_string()))
    }

    /// Insert or replace an item, ledger dates included
    pub fn upsert_item(&self, item: &ContentItem) -> Result<()> {
        self.write_item(item, UPSERT_CONFLICT)
    }

    /// Insert an item or refresh its descriptive fields. Ledger dates already
    /// stored for the item are left untouched.
    pub fn import_item(&self, item: &ContentItem) -> Result<()> {
        self.write_item(item, IMPORT_CONFLICT)
    }

    fn write_item(&self, item: &ContentItem, on_conflict: &str) -> Result<()> {
        let conn = self.conn()?;
        let subject = match item.subject.trim() {
            "" => DEFAULT_SUBJECT,
            subject => subject,
        };

        conn.execute(
            &format!(
                r#"
                INSERT INTO content_items (
                    id, subject, prompt, answer, example, usage, category,
                    level, last_tip_at, last_question_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(id) DO UPDATE SET {}
                "#,
                on_conflict
            ),
            params![
                item.id,
                subject,
                item.prompt,
                item.answer,
                item.example,
                item.usage,
                item.category,
                item.level.value(),
                item.last_tip.map(format_date),
                item.last_question.map(format_date),
            ],
        )?;

        Ok(())
    }

    /// Get an item by ID
    pub fn get_item(&self, id: &str) -> Result<Option<ContentItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_ITEMS))?;
        let mut rows = stmt.query_map(params![id], ItemRow::from_row)?;
        let row = rows.next().transpose()?;
        row.map(ItemRow::into_item).transpose()
    }

    /// All items of a subject
    pub fn list_subject(&self, subject: &str) -> Result<Vec<ContentItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE subject = ?1 ORDER BY id", SELECT_ITEMS))?;
        let rows = stmt.query_map(params![subject], ItemRow::from_row)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?.into_item()?);
        }
        Ok(items)
    }

    /// Set the ledger date for one exposure kind
    pub fn set_appearance(&self, id: &str, kind: ExposureKind, date: NaiveDate) -> Result<()> {
        let conn = self.conn()?;
        let column = match kind {
            ExposureKind::Tip => "last_tip_at",
            ExposureKind::Question => "last_question_at",
        };

        let updated = conn.execute(
            &format!("UPDATE content_items SET {} = ?1 WHERE id = ?2", column),
            params![format_date(date), id],
        )?;

        if updated == 0 {
            return Err(Error::not_found(format!("content item {}", id)));
        }
        Ok(())
    }

    /// Number of items in a subject
    pub fn count(&self, subject: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM content_items WHERE subject = ?1",
            params![subject],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// All subjects that have at least one item
    pub fn list_subjects(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT subject FROM content_items ORDER BY subject")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Delete an item
    pub fn delete_item(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM content_items WHERE id = ?1", params![id])?;
        Ok(())
    }
}

#[async_trait]
impl ContentRepository for SqliteContentRepository {
    async fn query_pool(&self, subject: &str) -> Result<Vec<ContentItem>> {
        self.list_subject(subject)
    }

    async fn record_appearance(
        &self,
        item_id: &str,
        kind: ExposureKind,
        date: NaiveDate,
    ) -> Result<()> {
        self.set_appearance(item_id, kind, date)
    }
}

const IMPORT_CONFLICT: &str = "subject = excluded.subject, prompt = excluded.prompt, \
                               answer = excluded.answer, example = excluded.example, \
                               usage = excluded.usage, category = excluded.category, \
                               level = excluded.level";

const UPSERT_CONFLICT: &str = "subject = excluded.subject, prompt = excluded.prompt, \
                               answer = excluded.answer, example = excluded.example, \
                               usage = excluded.usage, category = excluded.category, \
                               level = excluded.level, last_tip_at = excluded.last_tip_at, \
                               last_question_at = excluded.last_question_at";

const SELECT_ITEMS: &str = "SELECT id, subject, prompt, answer, example, usage, category, \
                            level, last_tip_at, last_question_at FROM content_items";

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(raw: Option<String>) -> Result<Option<NaiveDate>> {
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, DATE_FORMAT)
            .map_err(|e| Error::storage(format!("bad ledger date {}: {}", s, e)))
    })
    .transpose()
}

/// Intermediate struct for reading from SQLite
struct ItemRow {
    id: String,
    subject: String,
    prompt: String,
    answer: String,
    example: String,
    usage: String,
    category: String,
    level: i64,
    last_tip_at: Option<String>,
    last_question_at: Option<String>,
}

impl ItemRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            subject: row.get(1)?,
            prompt: row.get(2)?,
            answer: row.get(3)?,
            example: row.get(4)?,
            usage: row.get(5)?,
            category: row.get(6)?,
            level: row.get(7)?,
            last_tip_at: row.get(8)?,
            last_question_at: row.get(9)?,
        })
    }

    fn into_item(self) -> Result<ContentItem> {
        Ok(ContentItem {
            id: self.id,
            subject: self.subject,
            prompt: self.prompt,
            answer: self.answer,
            example: self.example,
            usage: self.usage,
            category: self.category,
            level: Level::new(self.level),
            last_tip: parse_date(self.last_tip_at)?,
            last_question: parse_date(self.last_question_at)?,
        })
    }
}
