//! # Study Companion
//!
//! Personalization core for a study bot: decides which tip or question to
//! surface next for each subject, and keeps a short rolling memory of each
//! conversation for the chat assistant.
//!
//! ## Architecture
//!
//! - **Content Scheduler** - level-based eligibility windows with a pressure-score
//!   fallback, recording each exposure in the content repository's ledger
//! - **Session Memory Cache** - bounded, expiring in-process store of recent turns
//! - **Context Assembler** - renders recent turns into a prompt and records replies
//! - **Answer Evaluator** - grades learner answers with a heuristic fallback
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use study_companion::{Config, ContentScheduler, ExposureKind, SessionMemoryCache};
//! use study_companion::storage::SqliteContentRepository;
//!
//! let config = Config::default();
//! let repo = Arc::new(SqliteContentRepository::new(&config)?);
//! let scheduler = ContentScheduler::new(repo);
//!
//! // Pick today's Java question
//! let item = scheduler.next_for_subject("java", ExposureKind::Question).await;
//!
//! // One cache per process, shared by reference
//! let cache = Arc::new(SessionMemoryCache::new(config.memory.clone()));
//! cache.spawn_cleanup();
//! ```

pub mod config;
pub mod content;
pub mod context;
pub mod error;
pub mod evaluation;
pub mod generation;
pub mod message;
pub mod scheduler;
pub mod session;
pub mod storage;

pub use config::Config;
pub use content::{ContentItem, ContentRepository, ExposureKind, Level};
pub use context::ContextAssembler;
pub use error::{Error, Result};
pub use evaluation::{AnswerEvaluator, Evaluation};
pub use generation::{GenerationRequest, Generator, OpenAiCompatGenerator};
pub use message::{Role, Turn};
pub use scheduler::ContentScheduler;
pub use session::{MemoryLimits, MemoryStats, SessionMemoryCache};
