//! # Gadget Agent Runtime
//!
//! A streaming-first Rust runtime for building LLM agents against local
//! OpenAI-compatible servers (LM Studio, Ollama, llama.cpp, vLLM) that call
//! out to tools — here called *gadgets* — through a plain-text sentinel
//! grammar embedded in the model's own output, rather than a provider's
//! structured function-calling API.
//!
//! ## Why sentinels instead of tool-calling
//!
//! Many local OpenAI-compatible servers either don't implement the
//! `tools`/`tool_calls` wire fields at all, or implement them
//! inconsistently across backends. This crate sidesteps that by asking the
//! model to emit gadget invocations as delimited text blocks in its normal
//! streamed output:
//!
//! ```text
//! !!!GADGET_START:Search:gc_1
//! !!!ARG:query
//! rust async runtime comparison
//! !!!GADGET_END
//! ```
//!
//! The [`parser`] module's `BlockParser` recognizes these blocks
//! incrementally as they stream in, [`scheduler`]'s `GadgetScheduler` runs
//! the gadgets they name (respecting declared dependencies and an
//! optional parallel/sequential policy), and the result is handed back to
//! the model as a structured gadget-result message on the next turn.
//!
//! ## Two interaction modes
//!
//! ### 1. Simple query function (`query()`)
//! For single-turn interactions without persistent state:
//!
//! ```rust,no_run
//! use gadget_agent::{query, AgentOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = AgentOptions::builder()
//!         .system_prompt("You are a helpful assistant")
//!         .model("qwen2.5-32b-instruct")
//!         .base_url("http://localhost:1234/v1")
//!         .build()?;
//!
//!     let outcome = query("What's the capital of France?", &options).await?;
//!     println!("{}", outcome.final_text);
//!     Ok(())
//! }
//! ```
//!
//! ### 2. `Agent` for multi-turn conversations with gadgets
//!
//! ```rust,no_run
//! use gadget_agent::{Agent, AgentOptions, GadgetDescriptor, GadgetOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let calculator = GadgetDescriptor::new(
//!         "Calculator",
//!         "evaluates a simple arithmetic expression",
//!         serde_json::json!({"type": "object", "properties": {"expr": {"type": "string"}}}),
//!         |params| async move {
//!             Ok(GadgetOutcome::result(serde_json::json!({ "echo": params })))
//!         },
//!     );
//!
//!     let options = AgentOptions::builder()
//!         .system_prompt("You are a helpful assistant")
//!         .model("qwen2.5-32b-instruct")
//!         .base_url("http://localhost:1234/v1")
//!         .gadget(calculator)
//!         .build()?;
//!
//!     let mut agent = Agent::new(options)?;
//!     let outcome = agent.run("What's 7 times 6?").await?;
//!     println!("{}", outcome.final_text);
//!
//!     // The agent remembers this turn; run() again to continue.
//!     let outcome = agent.run("Now add 10 to that").await?;
//!     println!("{}", outcome.final_text);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **agent**: The Agent Loop — owns conversation state and drives one
//!   turn through compaction, the provider call, gadget execution, and
//!   budget/iteration termination checks.
//! - **parser**: The Block Parser — incremental recognition of sentinel
//!   gadget-call blocks in streamed model text.
//! - **scheduler**: The Gadget Scheduler — dependency-aware, parallel or
//!   sequential gadget execution with per-call timeouts and cancellation.
//! - **registry**: Gadget definitions, parameter schema normalization and
//!   validation, and the `GadgetOutcome` tagged result gadgets return.
//! - **conversation**: The Conversation Manager — base/history message
//!   state and turn grouping.
//! - **compaction**: The Compaction Manager — threshold-triggered history
//!   shrinking via sliding-window eviction or summarization.
//! - **output_store**: Content-addressed stash for oversized gadget
//!   results, with head/tail truncation for what goes back to the model.
//! - **provider**: The OpenAI-compatible wire format and the HTTP client
//!   that streams completions.
//! - **stream**: SSE parsing plus the bridge from provider chunks to
//!   parsed gadget calls via the Block Parser.
//! - **hooks**: The Hook Bus — observers, interceptors, and controllers at
//!   every call site in the loop and scheduler.
//! - **types**: Messages, content blocks, gadget calls/results, and the
//!   full `AgentOptions` configuration surface.
//! - **config**: Provider-specific base-URL/model-name resolution helpers.
//! - **error**: The crate's `Error` enum and `Result<T>` alias.
//! - **retry**: Exponential backoff retry with jitter and error
//!   classification.

mod agent;
mod compaction;
mod config;
mod conversation;
mod error;
mod hooks;
mod output_store;
mod parser;
mod provider;
mod registry;
pub mod retry;
mod scheduler;
mod stream;
mod types;

// --- Agent Loop ---

pub use agent::{Agent, AgentRunOutcome, query};

// --- Provider Configuration ---

pub use config::{Provider, get_base_url, get_model};

// --- Conversation Manager ---

pub use conversation::ConversationManager;

// --- Compaction Manager ---

pub use compaction::{CompactionEvent, CompactionManager, SummarizerFn, estimate_tokens_chars};

// --- Error Handling ---

pub use error::{Error, Result};

// --- Lifecycle Hooks ---

pub use hooks::{
    AfterGadgetExecutionEvent, AfterLlmCallEvent, BeforeGadgetExecutionEvent, BeforeIterationEvent,
    ChunkEvent, ControllerAction, DependencySkipEvent, GadgetCompleteEvent, GadgetSkippedEvent,
    GadgetStartEvent, Hooks, LlmCallCompleteEvent, LlmCallErrorEvent, LlmCallEvent, LlmCallReadyEvent,
    RateLimitThrottleEvent, RetryAttemptEvent,
};

// --- Output Store ---

pub use output_store::OutputStore;

// --- Block Parser ---

pub use parser::{BlockParser, StreamEvent};

// --- Gadget Registry ---

pub use registry::{GadgetDescriptor, GadgetOutcome, GadgetRegistry, SchemaValidator, ValidationDiagnostic, Validator};

// --- Provider Wire Types ---

pub use provider::{OpenAIUsage, ProviderClient};

// --- Gadget Scheduler ---

pub use scheduler::{GadgetScheduler, HumanInputFn, SchedulerOutcome};

// --- Stream Processor ---

pub use stream::{StreamOutcome, StreamProcessor, parse_sse_stream};

// --- Core Types ---

pub use types::{
    AgentOptions, AgentOptionsBuilder, CachingConfig, CachingScope, CompactionConfig, CompactionStrategy,
    ContentBlock, GadgetExecutionMode, GadgetExecutionResult, GadgetOutputLimitConfig, ImageBlock,
    ImageDetail, Message, MessageRole, ModelPricing, ParsedGadgetCall, ReasoningConfig, ReasoningEffort,
    SentinelConfig, StoredOutput, TextBlock, Turn, GadgetResultBlock,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module with the types and functions most programs need.
/// Import with `use gadget_agent::prelude::*;`.
pub mod prelude {
    pub use crate::{
        Agent, AgentOptions, AgentOptionsBuilder, AgentRunOutcome, ContentBlock, Error, GadgetDescriptor,
        GadgetExecutionResult, GadgetOutcome, Hooks, Message, Result, query,
    };
}
