//! Context assembly for free-form chat

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::generation::{GenerationRequest, Generator};
use crate::message::{Role, Turn};
use crate::session::SessionMemoryCache;

/// Reply recorded when the service answers with nothing
pub const EMPTY_REPLY_FALLBACK: &str = "Sorry, I couldn't come up with a reply right now.";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a study companion specialized in programming \
(Angular, Java) and English vocabulary, and also a friendly conversational partner.\n\
- For study questions, explain step by step and give short, working examples.\n\
- For casual conversation, be warm and relaxed, and match the learner's mood.\n\
- Stay consistent with the previous conversation when it is provided.";

/// Rendered prompt for one chat exchange
#[derive(Debug, Clone)]
pub struct ChatContext {
    /// Recent turns included in the prompt, oldest first
    pub history: Vec<Turn>,

    /// The new user message
    pub message: String,
}

impl ChatContext {
    /// Format the history and the new message as prompt text
    pub fn format_for_prompt(&self) -> String {
        let mut parts = Vec::new();

        if !self.history.is_empty() {
            parts.push("## Previous conversation:\n".to_string());
            for turn in &self.history {
                parts.push(format!("{}\n", turn.to_prompt_line()));
            }
            parts.push("\n## Current message:\n".to_string());
        }

        parts.push(format!("**User message:** {}", self.message));
        parts.join("")
    }
}

/// Builds chat prompts from the session memory cache and records exchanges
pub struct ContextAssembler {
    cache: Arc<SessionMemoryCache>,
    generator: Arc<dyn Generator>,
    window: usize,
    system_prompt: String,
}

impl ContextAssembler {
    pub fn new(cache: Arc<SessionMemoryCache>, generator: Arc<dyn Generator>, window: usize) -> Self {
        Self {
            cache,
            generator,
            window,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Replace the base system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn cache(&self) -> &Arc<SessionMemoryCache> {
        &self.cache
    }

    /// Collect the recent turns of a conversation together with the new message
    pub fn context_for(&self, conversation_id: &str, message: &str) -> ChatContext {
        ChatContext {
            history: self.cache.recent_messages(conversation_id, self.window),
            message: message.to_string(),
        }
    }

    /// The prompt text handed to the generation service
    pub fn build_context(&self, conversation_id: &str, message: &str) -> String {
        self.context_for(conversation_id, message).format_for_prompt()
    }

    fn system_prompt_for(&self, display_name: Option<&str>) -> String {
        match display_name {
            Some(name) if !name.trim().is_empty() => {
                format!("{}\n\nAddress the learner by name: {}", self.system_prompt, name.trim())
            }
            _ => self.system_prompt.clone(),
        }
    }

    /// Generate a reply and record both turns.
    ///
    /// Nothing is written to the cache when generation fails.
    pub async fn respond(
        &self,
        conversation_id: &str,
        message: &str,
        display_name: Option<&str>,
    ) -> Result<String> {
        let context = self.context_for(conversation_id, message);
        let request = GenerationRequest::new(context.format_for_prompt())
            .with_system(self.system_prompt_for(display_name))
            .with_temperature(0.7)
            .with_max_tokens(800);

        let reply = match self.generator.generate(request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(%conversation_id, error = %e, "chat generation failed");
                return Err(match e {
                    Error::Generation(msg) => Error::Generation(msg),
                    other => Error::generation(other.to_string()),
                });
            }
        };

        let reply = if reply.trim().is_empty() {
            EMPTY_REPLY_FALLBACK.to_string()
        } else {
            reply
        };

        self.cache.add_message(conversation_id, Role::User, message);
        self.cache.add_message(conversation_id, Role::Assistant, &reply);

        info!(
            %conversation_id,
            history = context.history.len(),
            "chat reply generated"
        );

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryLimits;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Echo {
        prompts: Mutex<Vec<GenerationRequest>>,
        reply: Option<String>,
    }

    impl Echo {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
                reply: Some(reply.to_string()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
                reply: None,
            })
        }
    }

    #[async_trait]
    impl Generator for Echo {
        async fn generate(&self, request: GenerationRequest) -> Result<String> {
            self.prompts.lock().unwrap().push(request);
            self.reply
                .clone()
                .ok_or_else(|| Error::generation("service unavailable"))
        }
    }

    fn cache() -> Arc<SessionMemoryCache> {
        Arc::new(SessionMemoryCache::new(MemoryLimits::default()))
    }

    #[test]
    fn no_history_renders_only_the_message() {
        let assembler = ContextAssembler::new(cache(), Echo::replying("ok"), 8);
        assert_eq!(
            assembler.build_context("chat", "hola"),
            "**User message:** hola"
        );
    }

    #[test]
    fn history_is_labeled_and_limited_to_window() {
        let cache = cache();
        for i in 0..10 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            cache.add_message("chat", role, &format!("t{i}"));
        }
        let assembler = ContextAssembler::new(cache, Echo::replying("ok"), 8);

        let prompt = assembler.build_context("chat", "next");
        assert!(prompt.starts_with("## Previous conversation:\nUser: t2\nAssistant: t3\n"));
        assert!(!prompt.contains("t1\n"));
        assert!(prompt.ends_with("Assistant: t9\n\n## Current message:\n**User message:** next"));
    }

    #[tokio::test]
    async fn successful_reply_records_both_turns() {
        let cache = cache();
        let generator = Echo::replying("Hello!");
        let assembler = ContextAssembler::new(cache.clone(), generator.clone(), 8);

        let reply = assembler.respond("chat", "hi", Some("Ana")).await.unwrap();
        assert_eq!(reply, "Hello!");

        let turns = cache.get_messages("chat");
        assert_eq!(turns.len(), 2);
        assert_eq!((turns[0].role, turns[0].content.as_str()), (Role::User, "hi"));
        assert_eq!(
            (turns[1].role, turns[1].content.as_str()),
            (Role::Assistant, "Hello!")
        );

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].system.as_deref().unwrap().contains("Ana"));
    }

    #[tokio::test]
    async fn failed_generation_leaves_cache_untouched() {
        let cache = cache();
        cache.add_message("chat", Role::User, "earlier");
        let assembler = ContextAssembler::new(cache.clone(), Echo::failing(), 8);

        let err = assembler.respond("chat", "hi", None).await.unwrap_err();
        assert!(err.is_generation());
        assert_eq!(cache.get_messages("chat").len(), 1);
    }

    #[tokio::test]
    async fn blank_reply_is_replaced() {
        let cache = cache();
        let assembler = ContextAssembler::new(cache.clone(), Echo::replying("  "), 8);

        let reply = assembler.respond("chat", "hi", None).await.unwrap();
        assert_eq!(reply, EMPTY_REPLY_FALLBACK);
        assert_eq!(cache.get_messages("chat")[1].content, EMPTY_REPLY_FALLBACK);
    }
}
