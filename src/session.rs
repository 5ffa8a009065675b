//! Bounded in-process memory of recent conversation turns
//!
//! Three independent limits keep the cache from growing without bound: the
//! number of live conversations, the number of turns per conversation, and
//! the characters stored per turn. Conversations idle for longer than the
//! expiration window are dropped both lazily on read and by a periodic sweep.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::message::{Role, Turn};

/// Size and time limits for the session memory cache
#[derive(Debug, Clone)]
pub struct MemoryLimits {
    /// Turns kept per conversation; oldest are dropped first
    pub max_messages_per_chat: usize,

    /// Idle time after which a conversation is forgotten
    pub expiration: chrono::Duration,

    /// Period of the background expiry sweep
    pub cleanup_interval: std::time::Duration,

    /// Conversations held at once; the least recently written is evicted
    pub max_active_chats: usize,

    /// Characters stored per turn; longer content is cut silently
    pub max_content_chars: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            max_messages_per_chat: 1000,
            expiration: chrono::Duration::days(30),
            cleanup_interval: std::time::Duration::from_secs(24 * 60 * 60),
            max_active_chats: 5,
            max_content_chars: 3000,
        }
    }
}

/// One conversation's rolling history
#[derive(Debug, Clone)]
struct ConversationEntry {
    messages: VecDeque<Turn>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl ConversationEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            messages: VecDeque::new(),
            created_at: now,
            last_activity: now,
        }
    }

    fn estimated_bytes(&self) -> usize {
        self.messages.iter().map(|m| m.content.len() + 100).sum()
    }
}

/// Aggregate view of the cache for administrative inspection
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub active_chat_count: usize,
    pub total_messages: usize,
    pub estimated_memory_kb: usize,
    pub max_active_chats: usize,
    pub memory_expiration_hours: i64,
    pub max_messages_per_chat: usize,
    pub cleanup_interval_minutes: u64,
    pub chats: Vec<ChatSummary>,
}

/// Per-conversation line of [`MemoryStats`]
#[derive(Debug, Clone, Serialize)]
pub struct ChatSummary {
    pub conversation_id: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub age_minutes: i64,
}

/// The process-wide cache of recent turns, keyed by conversation id.
///
/// Construct one per process and share it behind an `Arc`.
pub struct SessionMemoryCache {
    limits: MemoryLimits,
    entries: Mutex<HashMap<String, ConversationEntry>>,
}

impl SessionMemoryCache {
    pub fn new(limits: MemoryLimits) -> Self {
        info!(
            max_active_chats = limits.max_active_chats,
            max_messages_per_chat = limits.max_messages_per_chat,
            expiration_hours = limits.expiration.num_hours(),
            "session memory cache initialized"
        );
        Self {
            limits,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> &MemoryLimits {
        &self.limits
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConversationEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &ConversationEntry, now: DateTime<Utc>) -> bool {
        now - entry.last_activity > self.limits.expiration
    }

    /// Append a turn stamped with the current time
    pub fn add_message(&self, conversation_id: &str, role: Role, content: &str) {
        self.add_message_at(conversation_id, role, content, Utc::now());
    }

    /// Append a turn stamped with `timestamp`
    pub fn add_message_at(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        timestamp: DateTime<Utc>,
    ) {
        let mut entries = self.lock();

        if !entries.contains_key(conversation_id) {
            while entries.len() >= self.limits.max_active_chats {
                if !evict_oldest(&mut entries) {
                    break;
                }
            }
            debug!(%conversation_id, "new conversation");
        }

        let entry = entries
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationEntry::new(timestamp));

        let content: String = content.chars().take(self.limits.max_content_chars).collect();
        entry.messages.push_back(Turn::new(role, content, timestamp));
        entry.last_activity = timestamp;

        let overflow = entry
            .messages
            .len()
            .saturating_sub(self.limits.max_messages_per_chat);
        if overflow > 0 {
            entry.messages.drain(..overflow);
            debug!(%conversation_id, removed = overflow, "trimmed oldest turns");
        }

        debug!(
            %conversation_id,
            %role,
            total = entry.messages.len(),
            "turn stored"
        );
    }

    /// All turns of a conversation, oldest first
    pub fn get_messages(&self, conversation_id: &str) -> Vec<Turn> {
        self.get_messages_at(conversation_id, Utc::now())
    }

    pub fn get_messages_at(&self, conversation_id: &str, now: DateTime<Utc>) -> Vec<Turn> {
        self.read_at(conversation_id, now, usize::MAX)
    }

    /// The last `limit` turns of a conversation, oldest first
    pub fn recent_messages(&self, conversation_id: &str, limit: usize) -> Vec<Turn> {
        self.read_at(conversation_id, Utc::now(), limit)
    }

    fn read_at(&self, conversation_id: &str, now: DateTime<Utc>, limit: usize) -> Vec<Turn> {
        let mut entries = self.lock();

        let Some(entry) = entries.get(conversation_id) else {
            return Vec::new();
        };

        if self.is_expired(entry, now) {
            entries.remove(conversation_id);
            info!(%conversation_id, "conversation expired, dropped on read");
            return Vec::new();
        }

        let skip = entry.messages.len().saturating_sub(limit);
        entry.messages.iter().skip(skip).cloned().collect()
    }

    /// Forget a conversation. Returns whether it existed.
    pub fn clear_chat(&self, conversation_id: &str) -> bool {
        let existed = self.lock().remove(conversation_id).is_some();
        info!(%conversation_id, existed, "conversation cleared");
        existed
    }

    /// Drop every conversation idle past the expiration window
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        let removed = before - entries.len();
        if removed > 0 {
            info!(removed, "expired conversations cleaned up");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> MemoryStats {
        let entries = self.lock();

        let total_messages = entries.values().map(|e| e.messages.len()).sum();
        let total_bytes: usize = entries.values().map(ConversationEntry::estimated_bytes).sum();

        let mut chats: Vec<ChatSummary> = entries
            .iter()
            .map(|(id, entry)| ChatSummary {
                conversation_id: id.clone(),
                message_count: entry.messages.len(),
                created_at: entry.created_at,
                last_activity: entry.last_activity,
                age_minutes: (now - entry.created_at).num_minutes(),
            })
            .collect();
        chats.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));

        MemoryStats {
            active_chat_count: entries.len(),
            total_messages,
            estimated_memory_kb: (total_bytes + 512) / 1024,
            max_active_chats: self.limits.max_active_chats,
            memory_expiration_hours: self.limits.expiration.num_hours(),
            max_messages_per_chat: self.limits.max_messages_per_chat,
            cleanup_interval_minutes: self.limits.cleanup_interval.as_secs() / 60,
            chats,
        }
    }

    /// Start the periodic expiry sweep on the current tokio runtime
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = self.limits.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                debug!("running session memory sweep");
                cache.cleanup_expired();
            }
        })
    }
}

/// Remove the conversation with the oldest activity. Ties go to the smallest id.
fn evict_oldest(entries: &mut HashMap<String, ConversationEntry>) -> bool {
    let oldest = entries
        .iter()
        .min_by(|(a_id, a), (b_id, b)| {
            a.last_activity
                .cmp(&b.last_activity)
                .then_with(|| a_id.cmp(b_id))
        })
        .map(|(id, _)| id.clone());

    match oldest {
        Some(id) => {
            entries.remove(&id);
            info!(conversation_id = %id, "capacity reached, evicted oldest conversation");
            true
        }
        None => false,
    }
}
