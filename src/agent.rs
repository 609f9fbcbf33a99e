//! The Agent Loop: owns one conversation's runtime state and drives it,
//! one LLM call and one gadget-execution batch at a time, until the model
//! stops emitting gadget calls, a gadget signals termination, the budget
//! or iteration cap is hit, or the run is cancelled.
//!
//! Replaces the teacher's `Client`. The teacher ran a flat
//! `auto_execute_loop`: collect blocks, split text from tool calls, run
//! each tool one at a time, append results, send again. This loop keeps
//! that overall shape (collect → branch on whether there's more work →
//! execute → append → continue) but every step is now mediated by a
//! purpose-built component instead of inline code: compaction decides
//! whether history needs shrinking first, the Block Parser + Stream
//! Processor replace OpenAI tool-call deltas, and the Gadget Scheduler
//! replaces the teacher's one-tool-at-a-time `for` loop with dependency-
//! aware, possibly-parallel execution.

use crate::compaction::{CompactionManager, SummarizerFn};
use crate::conversation::{ConversationManager, build_base_messages};
use crate::hooks::{
    AfterLlmCallEvent, BeforeIterationEvent, ChunkEvent, ControllerAction, Hooks, LlmCallCompleteEvent,
    LlmCallErrorEvent, LlmCallEvent, LlmCallReadyEvent, RateLimitThrottleEvent, RetryAttemptEvent,
};
use crate::output_store::OutputStore;
use crate::provider::{OpenAIChunk, ProviderClient, build_request};
use crate::registry::{GadgetRegistry, SchemaValidator};
use crate::retry::is_retryable_error;
use crate::scheduler::{GadgetScheduler, HumanInputFn};
use crate::stream::{StreamOutcome, StreamProcessor, parse_sse_stream};
use crate::types::{AgentOptions, Message, ModelPricing};
use crate::{Error, Result};
use futures::stream::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What one `Agent::run` call produced once the loop terminated.
#[derive(Debug, Clone)]
pub struct AgentRunOutcome {
    /// The text the caller should show the user: the model's final
    /// text-only reply, a gadget's `TerminateConversation` message, or a
    /// synthetic notice (budget exceeded, iteration cap reached, run
    /// aborted by a controller).
    pub final_text: String,
    /// How many iterations the loop actually ran before terminating.
    pub iterations: u32,
    /// Running cost in USD, accumulated from provider usage and model
    /// pricing across every gadget-bearing iteration of this run (and any
    /// prior runs on the same `Agent`).
    pub cost_usd: f64,
    /// Set if the run ended because the cancellation token fired rather
    /// than any of the loop's own termination conditions.
    pub cancelled: bool,
}

fn compute_cost(pricing: ModelPricing, usage: crate::provider::OpenAIUsage) -> f64 {
    (usage.prompt_tokens as f64 / 1_000_000.0) * pricing.input_per_million
        + (usage.completion_tokens as f64 / 1_000_000.0) * pricing.output_per_million
}

/// Owns everything one conversation needs across its lifetime: options,
/// the gadget registry built from them, conversation state, the output
/// store gadget results stash into, a compaction manager sized to the
/// configured context window, and a cancellation token an embedder can
/// fire from another task to interrupt an in-flight call or stream.
pub struct Agent {
    options: AgentOptions,
    registry: GadgetRegistry,
    validator: SchemaValidator,
    conversation: ConversationManager,
    output_store: OutputStore,
    compaction: CompactionManager,
    provider: ProviderClient,
    hooks: Hooks,
    cancellation: CancellationToken,
    cost_so_far: f64,
    human_input: Option<HumanInputFn>,
    summarizer: Option<SummarizerFn>,
}

impl Agent {
    pub fn new(options: AgentOptions) -> Result<Self> {
        Self::with_initial_history(options, Vec::new())
    }

    /// Like [`Self::new`], but seeds conversation history from a prior
    /// session. `base` (system prompt + gadget instructions) is always
    /// rebuilt from the current options, never resumed — only `history`
    /// persists across sessions.
    pub fn with_initial_history(options: AgentOptions, initial_history: Vec<Message>) -> Result<Self> {
        let registry = GadgetRegistry::new(options.gadgets());
        let compaction = CompactionManager::new(options.compaction().clone(), options.context_window());
        let provider = ProviderClient::new(&options)?;
        let hooks = options.hooks().clone();
        let base = build_base_messages(options.system_prompt(), options.gadgets(), options.sentinel());
        let conversation = ConversationManager::with_initial_history(base, initial_history);

        Ok(Self {
            options,
            registry,
            validator: SchemaValidator,
            conversation,
            output_store: OutputStore::new(),
            compaction,
            provider,
            hooks,
            cancellation: CancellationToken::new(),
            cost_so_far: 0.0,
            human_input: None,
            summarizer: None,
        })
    }

    /// Register the callback a gadget's `RequestHumanInput` signal is
    /// answered through. Without one, a gadget requesting human input
    /// gets an error result instead of blocking.
    pub fn with_human_input<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        self.human_input = Some(Arc::new(move |prompt| Box::pin(handler(prompt))));
        self
    }

    /// Register the callback the `summarization`/`hybrid` compaction
    /// strategies use to produce a summary of the turns being compacted
    /// away. Without one, compaction falls back to an error rather than
    /// silently dropping history.
    pub fn with_summarizer<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Vec<Message>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        self.summarizer = Some(Arc::new(move |messages, prompt| Box::pin(handler(messages, prompt))));
        self
    }

    /// A clone of the token that stops this agent's current or next
    /// `run()`. Cloning and firing it from elsewhere (e.g. a UI's "stop"
    /// button) is the supported way to interrupt a run in progress.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Fire the cancellation token. Idempotent, and safe to call whether
    /// or not a run is currently in progress.
    pub fn interrupt(&self) {
        self.cancellation.cancel();
    }

    pub fn history(&self) -> &[Message] {
        self.conversation.history()
    }

    pub fn cost_so_far(&self) -> f64 {
        self.cost_so_far
    }

    pub fn output_store(&self) -> &OutputStore {
        &self.output_store
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// Run one user turn to completion: append `prompt` to history, then
    /// loop model call → gadget execution until a termination condition
    /// is hit. `cost_so_far` accumulates across calls to `run` on the
    /// same `Agent`; the iteration count resets each call, since
    /// `max_iterations` bounds one turn's worth of gadget back-and-forth,
    /// not the conversation's entire lifetime.
    pub async fn run(&mut self, prompt: impl Into<String>) -> Result<AgentRunOutcome> {
        self.conversation.add_user_message(prompt);
        let mut iteration: u32 = 0;

        loop {
            if self.cancellation.is_cancelled() {
                return Ok(self.outcome(String::new(), iteration, true));
            }

            iteration += 1;

            match self.hooks.run_before_iteration(BeforeIterationEvent { iteration }).await {
                ControllerAction::Abort(reason) => return Ok(self.outcome(reason, iteration, false)),
                ControllerAction::Skip => continue,
                _ => {}
            }

            if let Some(event) = self
                .compaction
                .maybe_compact(&mut self.conversation, iteration, self.summarizer.as_ref())
                .await?
            {
                self.hooks.fire_on_compaction(event).await;
            }

            match self.hooks.run_llm_call_controller(LlmCallEvent { iteration }).await {
                ControllerAction::Abort(reason) => return Ok(self.outcome(reason, iteration, false)),
                ControllerAction::Skip => continue,
                _ => {}
            }

            let messages = self
                .hooks
                .apply_message_interceptors(self.conversation.messages())
                .await;
            self.hooks
                .fire_on_llm_call_ready(LlmCallReadyEvent {
                    iteration,
                    message_count: messages.len(),
                })
                .await;

            let stream_outcome = self.call_provider_with_retry(iteration, &messages).await?;

            self.hooks
                .fire_on_llm_call_complete(LlmCallCompleteEvent {
                    iteration,
                    finish_reason: stream_outcome.finish_reason.clone(),
                    prompt_tokens: stream_outcome.usage.map(|u| u.prompt_tokens),
                    completion_tokens: stream_outcome.usage.map(|u| u.completion_tokens),
                })
                .await;

            if !stream_outcome.parse_errors.is_empty() {
                tracing::warn!(
                    iteration,
                    parse_errors = ?stream_outcome.parse_errors,
                    "stream produced non-fatal gadget-call parse errors"
                );
            }

            let raw_text = stream_outcome.raw_text.clone();
            self.conversation.add_assistant_message(raw_text.clone());

            let had_calls = !stream_outcome.gadget_calls.is_empty();
            if let ControllerAction::Abort(reason) = self
                .hooks
                .run_after_llm_call_controller(AfterLlmCallEvent {
                    iteration,
                    had_gadget_calls: had_calls,
                })
                .await
            {
                return Ok(self.outcome(reason, iteration, false));
            }

            if !had_calls {
                return Ok(self.outcome(raw_text, iteration, false));
            }

            let scheduler = GadgetScheduler::new(
                &self.registry,
                &self.validator,
                &self.output_store,
                &self.hooks,
                self.options.gadget_output_limit(),
                self.options.context_window(),
                self.options.gadget_execution_mode(),
                self.cancellation.clone(),
                self.human_input.as_ref(),
            );
            let scheduler_outcome = scheduler.execute(stream_outcome.gadget_calls).await;
            self.conversation.add_gadget_call_result(&scheduler_outcome.results);

            // Cost accounting runs only on gadget-bearing iterations: a
            // pure-text reply already ended the loop above, so the only
            // place usage ever needs folding into the running total is
            // here. Compaction summaries never reach this path (they're
            // produced by the summarizer callback's own provider call,
            // outside this loop), so they never count against budget.
            if let Some(pricing) = self.options.model_pricing() {
                if let Some(usage) = stream_outcome.usage {
                    self.cost_so_far += compute_cost(pricing, usage);
                }
                if let Some(budget) = self.options.budget() {
                    if self.cost_so_far >= budget {
                        return Ok(self.outcome(
                            format!(
                                "stopped after reaching budget of ${:.4} (spent ${:.4})",
                                budget, self.cost_so_far
                            ),
                            iteration,
                            false,
                        ));
                    }
                }
            }

            if let Some(message) = scheduler_outcome.terminate_message {
                return Ok(self.outcome(message, iteration, false));
            }

            if iteration >= self.options.max_iterations() {
                return Ok(self.outcome(
                    format!(
                        "stopped after reaching the maximum of {} iterations",
                        self.options.max_iterations()
                    ),
                    iteration,
                    false,
                ));
            }
        }
    }

    fn outcome(&self, final_text: impl Into<String>, iterations: u32, cancelled: bool) -> AgentRunOutcome {
        AgentRunOutcome {
            final_text: final_text.into(),
            iterations,
            cost_usd: self.cost_so_far,
            cancelled,
        }
    }

    /// Call the provider, retrying transient failures with backoff per
    /// `options.retry()` and stopping immediately on a non-retryable one
    /// or a controller's explicit abort. Unlike [`crate::retry::
    /// retry_with_backoff_conditional`], this also fires the retry-attempt
    /// and rate-limit-throttle observer hooks, so it's hand-rolled here
    /// rather than delegated.
    async fn call_provider_with_retry(&self, iteration: u32, messages: &[Message]) -> Result<StreamOutcome> {
        let retry_cfg = self.options.retry();
        let attempts = if retry_cfg.enabled { retry_cfg.max_attempts } else { 1 };
        let mut last_err = None;

        for attempt in 0..attempts {
            self.hooks.fire_on_llm_call_start(LlmCallEvent { iteration }).await;

            match self.try_once(iteration, messages).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    let retryable = is_retryable_error(&err);
                    let error_event = LlmCallErrorEvent {
                        iteration,
                        attempt,
                        message: err.to_string(),
                        retryable,
                    };
                    self.hooks.fire_on_llm_call_error(error_event.clone()).await;
                    if let ControllerAction::Abort(_) = self.hooks.run_llm_error_controller(error_event).await {
                        return Err(err);
                    }

                    if !retryable || attempt + 1 >= attempts {
                        return Err(err);
                    }

                    let delay = retry_cfg.delay_for_attempt(attempt);
                    self.hooks
                        .fire_on_retry_attempt(RetryAttemptEvent {
                            attempt,
                            max_attempts: attempts,
                            delay_ms: delay.as_millis() as u64,
                            error: err.to_string(),
                        })
                        .await;
                    let message_lower = err.to_string().to_lowercase();
                    if message_lower.contains("429") || message_lower.contains("rate limit") {
                        self.hooks
                            .fire_on_rate_limit_throttle(RateLimitThrottleEvent {
                                attempt,
                                delay_ms: delay.as_millis() as u64,
                            })
                            .await;
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancellation.cancelled() => return Err(Error::cancelled()),
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::other("provider call failed with no error recorded")))
    }

    /// One attempt: build the request, open the stream, and drive it
    /// through the Block Parser, racing the whole thing against
    /// cancellation so firing the token mid-stream aborts the in-flight
    /// request instead of waiting for it to finish naturally.
    ///
    /// `system_prompt` is passed as `""` here — `ConversationManager::
    /// messages()` already embeds the base system message (system prompt
    /// plus rendered gadget instructions) as its first entry, so passing
    /// a non-empty string to `build_request` would duplicate it on the
    /// wire.
    async fn try_once(&self, iteration: u32, messages: &[Message]) -> Result<StreamOutcome> {
        let request = build_request(&self.options, "", messages);
        let response = self.provider.stream_completion(&request).await?;
        let chunks = self.apply_chunk_hooks(parse_sse_stream(response), iteration);
        let processor = StreamProcessor::new(self.options.sentinel().clone(), &self.registry);

        tokio::select! {
            result = processor.drive(chunks) => result,
            _ = self.cancellation.cancelled() => Err(Error::cancelled()),
        }
    }

    /// Wrap the raw chunk stream so each text delta passes through the
    /// chunk interceptor chain and fires `on_chunk` before the Block
    /// Parser ever sees it — the interceptor can rewrite model output
    /// (e.g. redaction) and that rewritten text is what ends up in
    /// history and in any gadget call the parser assembles from it.
    fn apply_chunk_hooks(
        &self,
        chunks: Pin<Box<dyn Stream<Item = Result<OpenAIChunk>> + Send>>,
        iteration: u32,
    ) -> Pin<Box<dyn Stream<Item = Result<OpenAIChunk>> + Send>> {
        let hooks = self.hooks.clone();
        Box::pin(chunks.then(move |chunk_result| {
            let hooks = hooks.clone();
            async move {
                let mut chunk = chunk_result?;
                for choice in chunk.choices.iter_mut() {
                    if let Some(content) = choice.delta.content.take() {
                        let content = hooks.apply_chunk_interceptors(content).await;
                        hooks.fire_on_chunk(ChunkEvent { iteration, text: content.clone() }).await;
                        choice.delta.content = Some(content);
                    }
                }
                Ok(chunk)
            }
        }))
    }
}

/// One-shot convenience wrapper: build a fresh [`Agent`] from `options`
/// and run a single turn. For multi-turn use, construct an `Agent`
/// directly and call `run` repeatedly so history and cost accumulate.
pub async fn query(prompt: impl Into<String>, options: &AgentOptions) -> Result<AgentRunOutcome> {
    let mut agent = Agent::new(options.clone())?;
    agent.run(prompt).await
}
