//! Content items, exposure kinds, and the content repository contract

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Which exposure track an appearance belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureKind {
    Tip,
    Question,
}

impl std::fmt::Display for ExposureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExposureKind::Tip => write!(f, "tip"),
            ExposureKind::Question => write!(f, "question"),
        }
    }
}

impl std::str::FromStr for ExposureKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tip" => Ok(ExposureKind::Tip),
            "question" => Ok(ExposureKind::Question),
            other => Err(Error::invalid_input(format!("Unknown exposure kind: {}", other))),
        }
    }
}

/// Importance tier of a content item, 1 (reviewed most often) to 5.
///
/// Anything outside that range, or missing, resolves to the least frequent tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Level(u8);

impl Level {
    pub const HIGHEST: Level = Level(1);
    pub const LOWEST: Level = Level(5);

    /// Normalize a raw level value
    pub fn new(raw: i64) -> Self {
        if (1..=5).contains(&raw) {
            Level(raw as u8)
        } else {
            Self::LOWEST
        }
    }

    /// Parse a level from free text such as a select option name
    pub fn parse(raw: &str) -> Self {
        raw.trim().parse::<i64>().map(Self::new).unwrap_or(Self::LOWEST)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Minimum number of days between two exposures of an item at this level
    pub fn required_interval_days(self) -> i64 {
        match self.0 {
            1 => 1,
            2 => 3,
            3 => 4,
            4 => 5,
            _ => 7,
        }
    }
}

impl Default for Level {
    fn default() -> Self {
        Self::LOWEST
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.0)
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // Content packs carry the level either as a number or as its select label ("2").
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawLevel {
            Number(i64),
            Text(String),
        }

        Ok(match Option::<RawLevel>::deserialize(deserializer)? {
            Some(RawLevel::Number(n)) => Level::new(n),
            Some(RawLevel::Text(s)) => Level::parse(&s),
            None => Level::LOWEST,
        })
    }
}

/// Subject used for items stored without one
pub const DEFAULT_SUBJECT: &str = "general";

/// One learning unit: a vocabulary word, a language feature, a framework concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Stable identifier
    pub id: String,

    /// Subject pool this item belongs to (e.g. "java")
    #[serde(default)]
    pub subject: String,

    /// The question or headword
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Reference answer
    #[serde(default)]
    pub answer: String,

    #[serde(default = "default_example")]
    pub example: String,

    #[serde(default = "default_usage")]
    pub usage: String,

    #[serde(default = "default_category")]
    pub category: String,

    #[serde(default)]
    pub level: Level,

    /// Last day this item was shown as a tip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tip: Option<NaiveDate>,

    /// Last day this item was asked as a question
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_question: Option<NaiveDate>,
}

fn default_prompt() -> String {
    "No question".to_string()
}

fn default_example() -> String {
    "No example".to_string()
}

fn default_usage() -> String {
    "Not specified".to_string()
}

fn default_category() -> String {
    "No category".to_string()
}

impl ContentItem {
    /// Create a new item with default descriptive fields
    pub fn new(
        id: impl Into<String>,
        subject: impl Into<String>,
        prompt: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            prompt: prompt.into(),
            answer: answer.into(),
            example: default_example(),
            usage: default_usage(),
            category: default_category(),
            level: Level::default(),
            last_tip: None,
            last_question: None,
        }
    }

    /// Set the level
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the example
    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.example = example.into();
        self
    }

    /// Set the category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the last appearance for one exposure kind
    pub fn with_last_appearance(mut self, kind: ExposureKind, date: NaiveDate) -> Self {
        self.set_last_appearance(kind, Some(date));
        self
    }

    pub fn last_appearance(&self, kind: ExposureKind) -> Option<NaiveDate> {
        match kind {
            ExposureKind::Tip => self.last_tip,
            ExposureKind::Question => self.last_question,
        }
    }

    pub fn set_last_appearance(&mut self, kind: ExposureKind, date: Option<NaiveDate>) {
        match kind {
            ExposureKind::Tip => self.last_tip = date,
            ExposureKind::Question => self.last_question = date,
        }
    }
}

/// The external store holding content pools and their appearance ledger
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// All items tagged with `subject`
    async fn query_pool(&self, subject: &str) -> Result<Vec<ContentItem>>;

    /// Record that `item_id` was shown as `kind` on `date`
    async fn record_appearance(&self, item_id: &str, kind: ExposureKind, date: NaiveDate)
        -> Result<()>;
}
