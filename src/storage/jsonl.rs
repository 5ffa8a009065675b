//! JSONL content packs: one `<subject>.jsonl` file per pool

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::content::ContentItem;
use crate::error::{Error, Result};
use crate::storage::SqliteContentRepository;

/// A directory of per-subject content packs
pub struct JsonlContentPack {
    base_path: PathBuf,
}

impl JsonlContentPack {
    /// Open a pack directory, creating it if needed
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn pack_path(&self, subject: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", subject))
    }

    /// Append an item to its subject's pack
    pub fn append(&self, item: &ContentItem) -> Result<()> {
        if item.subject.trim().is_empty() {
            return Err(Error::invalid_input("content item has no subject"));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.pack_path(&item.subject))?;

        let json = serde_json::to_string(item)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    /// Read every item of a subject. Items without a subject take the pack's name.
    pub fn read_subject(&self, subject: &str) -> Result<Vec<ContentItem>> {
        let path = self.pack_path(subject);

        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&path)?);

        let mut items = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut item: ContentItem = serde_json::from_str(&line)?;
            if item.subject.trim().is_empty() {
                item.subject = subject.to_string();
            }
            items.push(item);
        }

        Ok(items)
    }

    /// List all subjects with a pack file
    pub fn list_subjects(&self) -> Result<Vec<String>> {
        let mut subjects = Vec::new();
        for entry in std::fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "jsonl").unwrap_or(false) {
                if let Some(stem) = path.file_stem() {
                    subjects.push(stem.to_string_lossy().to_string());
                }
            }
        }
        subjects.sort();
        Ok(subjects)
    }

    /// Load every pack into the repository, keeping any ledger dates already
    /// stored. Returns the number of items imported.
    pub fn import_all(&self, repo: &SqliteContentRepository) -> Result<usize> {
        let mut count = 0;
        for subject in self.list_subjects()? {
            let items = self.read_subject(&subject)?;
            for item in &items {
                repo.import_item(item)?;
            }
            info!(%subject, items = items.len(), "imported content pack");
            count += items.len();
        }
        Ok(count)
    }

    /// Write a subject's current items, ledger included, over its pack file
    pub fn export_subject(&self, repo: &SqliteContentRepository, subject: &str) -> Result<usize> {
        let items = repo.list_subject(subject)?;

        let mut writer = BufWriter::new(File::create(self.pack_path(subject))?);
        for item in &items {
            serde_json::to_writer(&mut writer, item)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        Ok(items.len())
    }
}
