//! Conversation Manager: owns the two append-only message lists — `base`
//! (system prompt + gadget instructions, fixed once a run starts) and
//! `history` (everything added during the run, replaceable wholesale by
//! compaction) — per §4.4.
//!
//! The teacher's `Client` kept a single flat `history: Vec<Message>` field
//! and built the system message inline in `send()`. Splitting base out
//! into its own list is what lets compaction replace history without
//! touching the part of the prompt the model needs verbatim every turn.

use crate::registry::GadgetDescriptor;
use crate::types::{GadgetExecutionResult, GadgetResultBlock, Message, SentinelConfig, Turn, group_into_turns};
use serde_json::Value;
use std::sync::Arc;

/// Render the gadget grammar and per-gadget descriptions that get folded
/// into the base system message. Gadget definitions are never sent as a
/// `tools` array (there is no such wire concept here) — the model only
/// ever learns about gadgets from this text (§6 expansion note).
pub fn render_gadget_instructions(gadgets: &[Arc<GadgetDescriptor>], sentinel: &SentinelConfig) -> String {
    if gadgets.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str("You have access to the following gadgets. To invoke one, emit a block of this exact shape:\n\n");
    out.push_str(&format!("{}<GadgetName>:<invocationId>[:<dep1>,<dep2>,...]\n", sentinel.start));
    out.push_str(&format!("{}<pointer>\n<value>\n", sentinel.arg));
    out.push_str(&format!("{}\n\n", sentinel.end));
    out.push_str("Omit the dependency list unless this call must wait for earlier calls by invocationId. Repeat the ARG block for each parameter.\n\n");
    out.push_str("Available gadgets:\n");
    for gadget in gadgets {
        out.push_str(&format!(
            "- {}: {}\n  parameters: {}\n",
            gadget.name(),
            gadget.description(),
            gadget.parameter_schema()
        ));
    }
    out
}

/// Build the fixed `base` message list: one system message combining the
/// caller's system prompt with rendered gadget instructions.
pub fn build_base_messages(
    system_prompt: &str,
    gadgets: &[Arc<GadgetDescriptor>],
    sentinel: &SentinelConfig,
) -> Vec<Message> {
    let instructions = render_gadget_instructions(gadgets, sentinel);
    let combined = if instructions.is_empty() {
        system_prompt.to_string()
    } else if system_prompt.is_empty() {
        instructions
    } else {
        format!("{}\n\n{}", system_prompt, instructions)
    };

    if combined.is_empty() {
        Vec::new()
    } else {
        vec![Message::system(combined)]
    }
}

/// Turn a batch of gadget execution results into the structured
/// gadget-call-result message the next assistant turn reads invocation
/// IDs back out of (§4.4). Result text is parsed as JSON when possible so
/// structured gadget results survive round-tripping; otherwise it's kept
/// as a plain string.
pub fn results_to_message(results: &[GadgetExecutionResult]) -> Message {
    let blocks: Vec<GadgetResultBlock> = results
        .iter()
        .map(|r| {
            let result_value = if let Some(error) = &r.error {
                serde_json::json!({ "error": error })
            } else {
                match &r.result {
                    Some(text) => serde_json::from_str::<Value>(text).unwrap_or(Value::String(text.clone())),
                    None => Value::Null,
                }
            };
            GadgetResultBlock::new(&r.invocation_id, &r.gadget_name, r.parameters.clone(), result_value)
        })
        .collect();
    Message::gadget_results(blocks)
}

/// Owns base/history, per §4.4. `getMessages()` in the spec becomes
/// [`ConversationManager::messages`]; `getConversationHistory()` becomes
/// [`ConversationManager::history`] (base is never returned by it).
#[derive(Debug, Clone)]
pub struct ConversationManager {
    base: Vec<Message>,
    history: Vec<Message>,
}

impl ConversationManager {
    pub fn new(base: Vec<Message>) -> Self {
        Self {
            base,
            history: Vec::new(),
        }
    }

    /// Seed history with messages resumed from a prior session. These are
    /// indistinguishable from messages added during this run — both
    /// appear in `history()` and both are subject to compaction and
    /// turn-grouping.
    pub fn with_initial_history(base: Vec<Message>, initial_history: Vec<Message>) -> Self {
        Self {
            base,
            history: initial_history,
        }
    }

    /// Full message list for the next provider call: base, then history.
    pub fn messages(&self) -> Vec<Message> {
        let mut all = self.base.clone();
        all.extend(self.history.iter().cloned());
        all
    }

    pub fn base(&self) -> &[Message] {
        &self.base
    }

    /// Initial + runtime history, for session resumption. Base is never
    /// included here, since base is meant to be rebuilt from the caller's
    /// current system prompt and gadget set on the next run.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.history.push(Message::user(text));
    }

    /// Appends the raw assistant text verbatim (sentinel blocks included),
    /// per invariant I3.
    pub fn add_assistant_message(&mut self, raw_text: impl Into<String>) {
        self.history.push(Message::assistant(raw_text));
    }

    pub fn add_gadget_call_result(&mut self, results: &[GadgetExecutionResult]) {
        if results.is_empty() {
            return;
        }
        self.history.push(results_to_message(results));
    }

    /// Atomically swap the history list, used by the Compaction Manager.
    /// Base is untouched, matching §4.5's invariant.
    pub fn replace_history(&mut self, new_history: Vec<Message>) {
        self.history = new_history;
    }

    pub fn turns(&self) -> Vec<Turn> {
        group_into_turns(&self.history)
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
