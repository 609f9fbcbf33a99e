//! Compaction Manager: keeps the conversation inside the model's context
//! window by dropping or summarizing old turns once a trigger threshold is
//! crossed (§4.5).
//!
//! Token accounting is character-based (≈4 chars/token) by default, same
//! approximation the teacher's `context.rs::estimate_tokens` used — except
//! generalized to the `ContentBlock` vocabulary in [`crate::types`]
//! (gadget-result JSON counts toward the estimate, not just text). A
//! caller may instead supply a provider token-counter callback, which
//! takes priority over the character estimate.

use crate::conversation::ConversationManager;
use crate::types::{CompactionConfig, CompactionStrategy, ContentBlock, Message};
use crate::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

const CHARS_PER_TOKEN: usize = 4;

const DEFAULT_SUMMARIZATION_PROMPT: &str = "Summarize the following conversation turns concisely, \
preserving any facts, decisions, or gadget results a later turn might need to reference.";

/// Character-based token estimate, generalized from the teacher's
/// `estimate_tokens` to cover gadget-result content.
pub fn estimate_tokens_chars(messages: &[Message]) -> usize {
    let mut total_chars = 0usize;
    for message in messages {
        total_chars += 8; // role formatting overhead
        for block in &message.content {
            match block {
                ContentBlock::Text(text) => total_chars += text.text.len(),
                ContentBlock::Image(image) => total_chars += image.url().len(),
                ContentBlock::GadgetResult(result) => {
                    total_chars += result.gadget_name.len() + result.invocation_id.len();
                    total_chars += result.parameters.to_string().len();
                    total_chars += result.result.to_string().len();
                }
            }
        }
    }
    total_chars += 16; // conversation-level overhead
    total_chars.div_ceil(CHARS_PER_TOKEN)
}

/// Injected callback for the `summarization`/`hybrid` strategies: issues a
/// separate, non-streaming completion over the turns being removed. Kept
/// as a narrow callback interface per §1 — the compaction manager doesn't
/// know how to talk to a provider, only that it can ask for a summary.
pub type SummarizerFn =
    Arc<dyn Fn(Vec<Message>, String) -> Pin<Box<dyn Future<Output = Result<String>> + Send>> + Send + Sync>;

/// Emitted once per compaction run (§4.5).
#[derive(Debug, Clone)]
pub struct CompactionEvent {
    pub strategy: CompactionStrategy,
    pub messages_before: usize,
    pub messages_after: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub summary: Option<String>,
    pub iteration: u32,
}

pub struct CompactionManager {
    config: CompactionConfig,
    context_window: usize,
    token_counter: Option<Arc<dyn Fn(&[Message]) -> usize + Send + Sync>>,
}

impl CompactionManager {
    /// Callers that build `CompactionConfig` directly (bypassing
    /// `AgentOptionsBuilder::build`, which already warns on this
    /// misconfiguration) still get the §4.5 warning here.
    pub fn new(config: CompactionConfig, context_window: usize) -> Self {
        if config.enabled && config.target_percent >= config.trigger_threshold_percent {
            tracing::warn!(
                target_percent = config.target_percent,
                trigger_threshold_percent = config.trigger_threshold_percent,
                "compaction target_percent >= trigger_threshold_percent: the compactor will run but cannot make progress"
            );
        }
        Self {
            config,
            context_window,
            token_counter: None,
        }
    }

    /// Supply a provider token-counter callback, used in place of the
    /// character-based estimate (§4.5: "unless a provider token-counter
    /// callback is supplied, in which case that callback is used").
    pub fn with_token_counter(mut self, counter: Arc<dyn Fn(&[Message]) -> usize + Send + Sync>) -> Self {
        self.token_counter = Some(counter);
        self
    }

    pub fn estimate_tokens(&self, messages: &[Message]) -> usize {
        match &self.token_counter {
            Some(counter) => counter(messages),
            None => estimate_tokens_chars(messages),
        }
    }

    fn trigger_tokens(&self) -> usize {
        (self.context_window as f32 * self.config.trigger_threshold_percent) as usize
    }

    fn target_tokens(&self) -> usize {
        (self.context_window as f32 * self.config.target_percent) as usize
    }

    pub fn should_compact(&self, conversation: &ConversationManager) -> bool {
        self.config.enabled && self.estimate_tokens(&conversation.messages()) > self.trigger_tokens()
    }

    /// Run compaction if the trigger threshold is crossed. Returns `None`
    /// if compaction wasn't needed or couldn't make progress (no eligible
    /// turns beyond `preserve_recent_turns`). Base messages are never
    /// touched (invariant I4/§4.5).
    pub async fn maybe_compact(
        &self,
        conversation: &mut ConversationManager,
        iteration: u32,
        summarizer: Option<&SummarizerFn>,
    ) -> Result<Option<CompactionEvent>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let messages_before = conversation.messages();
        let tokens_before = self.estimate_tokens(&messages_before);
        if tokens_before <= self.trigger_tokens() {
            return Ok(None);
        }

        let turns = conversation.turns();
        let preserve = self.config.preserve_recent_turns.min(turns.len());
        let eligible = turns.len() - preserve;
        if eligible == 0 {
            tracing::warn!(
                iteration,
                tokens_before,
                "compaction triggered but no turns are eligible (all within preserve_recent_turns)"
            );
            return Ok(None);
        }

        let base = conversation.base().to_vec();
        let history = conversation.history().to_vec();
        let target = self.target_tokens();

        // Find the smallest number of oldest turns to compact such that the
        // remaining conversation drops at or below target (§4.5: "selects
        // the oldest turns to compact until estimated tokens ≤ target").
        let mut compact_count = eligible;
        for candidate in 1..=eligible {
            let remove_end = turns[candidate - 1].end;
            let mut trial = base.clone();
            trial.extend_from_slice(&history[remove_end..]);
            if self.estimate_tokens(&trial) <= target {
                compact_count = candidate;
                break;
            }
        }

        let remove_end = turns[compact_count - 1].end;
        let kept = history[remove_end..].to_vec();
        let removed = &history[..remove_end];

        let strategy = match self.config.strategy {
            CompactionStrategy::Hybrid if compact_count < 3 => CompactionStrategy::SlidingWindow,
            CompactionStrategy::Hybrid => CompactionStrategy::Summarization,
            other => other,
        };

        let (new_history, summary) = match strategy {
            CompactionStrategy::SlidingWindow => (kept, None),
            CompactionStrategy::Summarization => {
                let Some(summarizer) = summarizer else {
                    return Err(Error::compaction(
                        "summarization strategy selected but no summarizer callback was configured",
                    ));
                };
                let prompt = self
                    .config
                    .summarization_prompt
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SUMMARIZATION_PROMPT.to_string());
                let summary_text = summarizer(removed.to_vec(), prompt).await?;
                let mut new_history = vec![Message::system(format!(
                    "[compacted summary of {} earlier turns] {}",
                    compact_count, summary_text
                ))];
                new_history.extend(kept);
                (new_history, Some(summary_text))
            }
            CompactionStrategy::Hybrid => unreachable!("resolved above"),
        };

        conversation.replace_history(new_history);
        let messages_after = conversation.messages();
        let tokens_after = self.estimate_tokens(&messages_after);

        tracing::info!(
            iteration,
            strategy = %strategy,
            tokens_before,
            tokens_after,
            turns_compacted = compact_count,
            "compaction ran"
        );

        Ok(Some(CompactionEvent {
            strategy,
            messages_before: messages_before.len(),
            messages_after: messages_after.len(),
            tokens_before,
            tokens_after,
            summary,
            iteration,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompactionConfig, CompactionStrategy};

    fn manager(config: CompactionConfig, window: usize) -> CompactionManager {
        CompactionManager::new(config, window)
    }

    fn turn_messages(n: usize, filler: &str) -> Vec<Message> {
        let mut out = Vec::new();
        for i in 0..n {
            out.push(Message::user(format!("{} turn {}", filler, i)));
            out.push(Message::assistant(format!("{} reply {}", filler, i)));
        }
        out
    }

    #[tokio::test]
    async fn test_no_compaction_below_threshold() {
        let config = CompactionConfig {
            enabled: true,
            strategy: CompactionStrategy::SlidingWindow,
            trigger_threshold_percent: 0.80,
            target_percent: 0.50,
            preserve_recent_turns: 5,
            summarization_model: None,
            summarization_prompt: None,
        };
        let manager = manager(config, 1_000_000);
        let mut conversation = ConversationManager::new(vec![Message::system("sys")]);
        conversation.add_user_message("hi");
        conversation.add_assistant_message("hello");

        let event = manager.maybe_compact(&mut conversation, 1, None).await.unwrap();
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn test_sliding_window_compacts_oldest_turns() {
        let config = CompactionConfig {
            enabled: true,
            strategy: CompactionStrategy::SlidingWindow,
            trigger_threshold_percent: 0.10,
            target_percent: 0.05,
            preserve_recent_turns: 2,
            summarization_model: None,
            summarization_prompt: None,
        };
        let manager = manager(config, 2_000);
        let mut conversation = ConversationManager::new(vec![Message::system("sys")]);
        for msg in turn_messages(20, &"x".repeat(50)) {
            conversation.add_user_message(msg.text());
        }

        let event = manager
            .maybe_compact(&mut conversation, 1, None)
            .await
            .unwrap()
            .expect("compaction should run");

        assert_eq!(event.strategy, CompactionStrategy::SlidingWindow);
        assert!(event.tokens_after <= event.tokens_before);
        assert_eq!(conversation.base()[0].text(), "sys");
    }

    #[tokio::test]
    async fn test_summarization_without_callback_errors() {
        let config = CompactionConfig {
            enabled: true,
            strategy: CompactionStrategy::Summarization,
            trigger_threshold_percent: 0.10,
            target_percent: 0.05,
            preserve_recent_turns: 1,
            summarization_model: None,
            summarization_prompt: None,
        };
        let manager = manager(config, 2_000);
        let mut conversation = ConversationManager::new(vec![]);
        for msg in turn_messages(10, &"y".repeat(50)) {
            conversation.add_user_message(msg.text());
        }

        let result = manager.maybe_compact(&mut conversation, 1, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_summarization_with_callback_replaces_removed_turns() {
        let config = CompactionConfig {
            enabled: true,
            strategy: CompactionStrategy::Summarization,
            trigger_threshold_percent: 0.10,
            target_percent: 0.05,
            preserve_recent_turns: 1,
            summarization_model: None,
            summarization_prompt: None,
        };
        let manager = manager(config, 2_000);
        let mut conversation = ConversationManager::new(vec![Message::system("sys")]);
        for msg in turn_messages(10, &"z".repeat(50)) {
            conversation.add_user_message(msg.text());
        }

        let summarizer: SummarizerFn = Arc::new(|_messages, _prompt| {
            Box::pin(async { Ok("summary of earlier turns".to_string()) })
        });

        let event = manager
            .maybe_compact(&mut conversation, 3, Some(&summarizer))
            .await
            .unwrap()
            .expect("compaction should run");

        assert_eq!(event.strategy, CompactionStrategy::Summarization);
        assert_eq!(event.summary.as_deref(), Some("summary of earlier turns"));
        assert!(conversation.history()[0].text().contains("compacted summary"));
    }

    #[tokio::test]
    async fn test_no_progress_when_all_turns_preserved() {
        let config = CompactionConfig {
            enabled: true,
            strategy: CompactionStrategy::SlidingWindow,
            trigger_threshold_percent: 0.01,
            target_percent: 0.005,
            preserve_recent_turns: 100,
            summarization_model: None,
            summarization_prompt: None,
        };
        let manager = manager(config, 2_000);
        let mut conversation = ConversationManager::new(vec![]);
        conversation.add_user_message("x".repeat(500));

        let event = manager.maybe_compact(&mut conversation, 1, None).await.unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_estimate_tokens_chars_counts_gadget_results() {
        let messages = vec![Message::gadget_results(vec![crate::types::GadgetResultBlock::new(
            "gc_1",
            "Calc",
            serde_json::json!({"expr": "2+2"}),
            serde_json::json!("4"),
        )])];
        assert!(estimate_tokens_chars(&messages) > 0);
    }
}
