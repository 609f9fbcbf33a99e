//! Hook Bus: typed observers, interceptors, and controllers invoked at
//! stable call sites across the Agent Loop and Gadget Scheduler (§4.9).
//!
//! Three families, same shape as the teacher's narrower pre/post-tool-use
//! hooks generalized to the full set of call sites:
//!   - **Observers** are fire-and-forget; every registered observer for a
//!     site is awaited, in registration order, before the loop proceeds.
//!   - **Interceptors** are pure transforms, chained in registration order
//!     (each sees the previous one's output).
//!   - **Controllers** decide what happens next. Each returns a
//!     [`ControllerAction`]; controllers run in registration order and the
//!     first one to return anything other than `Proceed` wins.
//!
//! Handlers are stored the same way the teacher stored its hook callbacks:
//! `Arc<dyn Fn(..) -> Pin<Box<dyn Future<Output = ..>>>>`, so a `Hooks`
//! value is cheap to clone and share across the scheduler's concurrent
//! gadget tasks.

use crate::compaction::CompactionEvent;
use crate::types::GadgetExecutionResult;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// The outcome of a controller call site. Not every site uses every
/// variant — `Skip` only makes sense at gadget-execution sites, `Retry`
/// only at LLM-call sites — but one shared enum keeps the call-site
/// plumbing uniform.
#[derive(Debug, Clone)]
pub enum ControllerAction<T> {
    Proceed,
    Skip,
    Abort(String),
    Retry,
    Replace(T),
}

impl<T> Default for ControllerAction<T> {
    fn default() -> Self {
        ControllerAction::Proceed
    }
}

type AsyncFn<In, Out> = Arc<dyn Fn(In) -> Pin<Box<dyn Future<Output = Out> + Send>> + Send + Sync>;

async fn fire_all<E: Clone>(observers: &[AsyncFn<E, ()>], event: E) {
    for observer in observers {
        observer(event.clone()).await;
    }
}

async fn chain_all<E>(interceptors: &[AsyncFn<E, E>], mut value: E) -> E {
    for interceptor in interceptors {
        value = interceptor(value).await;
    }
    value
}

async fn run_controllers<In: Clone, T>(
    controllers: &[AsyncFn<In, ControllerAction<T>>],
    input: In,
) -> ControllerAction<T> {
    for controller in controllers {
        match controller(input.clone()).await {
            ControllerAction::Proceed => continue,
            other => return other,
        }
    }
    ControllerAction::Proceed
}

// ============================================================================
// EVENT PAYLOADS
// ============================================================================

#[derive(Debug, Clone)]
pub struct BeforeIterationEvent {
    pub iteration: u32,
}

#[derive(Debug, Clone)]
pub struct LlmCallEvent {
    pub iteration: u32,
}

#[derive(Debug, Clone)]
pub struct LlmCallReadyEvent {
    pub iteration: u32,
    pub message_count: usize,
}

#[derive(Debug, Clone)]
pub struct LlmCallCompleteEvent {
    pub iteration: u32,
    pub finish_reason: Option<String>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AfterLlmCallEvent {
    pub iteration: u32,
    pub had_gadget_calls: bool,
}

#[derive(Debug, Clone)]
pub struct LlmCallErrorEvent {
    pub iteration: u32,
    pub attempt: u32,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone)]
pub struct ChunkEvent {
    pub iteration: u32,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct GadgetStartEvent {
    pub invocation_id: String,
    pub gadget_name: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct GadgetCompleteEvent {
    pub result: GadgetExecutionResult,
}

#[derive(Debug, Clone)]
pub struct GadgetSkippedEvent {
    pub invocation_id: String,
    pub gadget_name: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RetryAttemptEvent {
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitThrottleEvent {
    pub attempt: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct BeforeGadgetExecutionEvent {
    pub invocation_id: String,
    pub gadget_name: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct AfterGadgetExecutionEvent {
    pub result: GadgetExecutionResult,
}

#[derive(Debug, Clone)]
pub struct DependencySkipEvent {
    pub invocation_id: String,
    pub failed_dependency: String,
}

// ============================================================================
// HOOKS
// ============================================================================

/// The full hook registry passed to `Agent::run` via `AgentOptions`.
/// Default is empty — every call site is a no-op until something is
/// registered, same as the teacher's `Hooks::new()`.
#[derive(Clone, Default)]
pub struct Hooks {
    on_llm_call_start: Vec<AsyncFn<LlmCallEvent, ()>>,
    on_llm_call_ready: Vec<AsyncFn<LlmCallReadyEvent, ()>>,
    on_llm_call_complete: Vec<AsyncFn<LlmCallCompleteEvent, ()>>,
    on_llm_call_error: Vec<AsyncFn<LlmCallErrorEvent, ()>>,
    on_chunk: Vec<AsyncFn<ChunkEvent, ()>>,
    on_gadget_start: Vec<AsyncFn<GadgetStartEvent, ()>>,
    on_gadget_complete: Vec<AsyncFn<GadgetCompleteEvent, ()>>,
    on_gadget_skipped: Vec<AsyncFn<GadgetSkippedEvent, ()>>,
    on_compaction: Vec<AsyncFn<CompactionEvent, ()>>,
    on_retry_attempt: Vec<AsyncFn<RetryAttemptEvent, ()>>,
    on_rate_limit_throttle: Vec<AsyncFn<RateLimitThrottleEvent, ()>>,

    message_interceptor: Vec<AsyncFn<Vec<crate::types::Message>, Vec<crate::types::Message>>>,
    chunk_interceptor: Vec<AsyncFn<String, String>>,
    gadget_parameter_interceptor: Vec<AsyncFn<(String, Value), Value>>,
    gadget_result_interceptor: Vec<AsyncFn<GadgetExecutionResult, GadgetExecutionResult>>,

    before_iteration_controller: Vec<AsyncFn<BeforeIterationEvent, ControllerAction<()>>>,
    llm_call_controller: Vec<AsyncFn<LlmCallEvent, ControllerAction<()>>>,
    after_llm_call_controller: Vec<AsyncFn<AfterLlmCallEvent, ControllerAction<()>>>,
    llm_error_controller: Vec<AsyncFn<LlmCallErrorEvent, ControllerAction<()>>>,
    before_gadget_execution_controller: Vec<AsyncFn<BeforeGadgetExecutionEvent, ControllerAction<Value>>>,
    after_gadget_execution_controller:
        Vec<AsyncFn<AfterGadgetExecutionEvent, ControllerAction<GadgetExecutionResult>>>,
    dependency_skip_controller: Vec<AsyncFn<DependencySkipEvent, ControllerAction<()>>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}

macro_rules! add_observer {
    ($method:ident, $field:ident, $event:ty) => {
        pub fn $method<F, Fut>(mut self, handler: F) -> Self
        where
            F: Fn($event) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = ()> + Send + 'static,
        {
            self.$field.push(Arc::new(move |e| Box::pin(handler(e))));
            self
        }
    };
}

macro_rules! add_controller {
    ($method:ident, $field:ident, $event:ty, $out:ty) => {
        pub fn $method<F, Fut>(mut self, handler: F) -> Self
        where
            F: Fn($event) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = ControllerAction<$out>> + Send + 'static,
        {
            self.$field.push(Arc::new(move |e| Box::pin(handler(e))));
            self
        }
    };
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    add_observer!(on_llm_call_start, on_llm_call_start, LlmCallEvent);
    add_observer!(on_llm_call_ready, on_llm_call_ready, LlmCallReadyEvent);
    add_observer!(on_llm_call_complete, on_llm_call_complete, LlmCallCompleteEvent);
    add_observer!(on_llm_call_error, on_llm_call_error, LlmCallErrorEvent);
    add_observer!(on_chunk, on_chunk, ChunkEvent);
    add_observer!(on_gadget_start, on_gadget_start, GadgetStartEvent);
    add_observer!(on_gadget_complete, on_gadget_complete, GadgetCompleteEvent);
    add_observer!(on_gadget_skipped, on_gadget_skipped, GadgetSkippedEvent);
    add_observer!(on_compaction, on_compaction, CompactionEvent);
    add_observer!(on_retry_attempt, on_retry_attempt, RetryAttemptEvent);
    add_observer!(on_rate_limit_throttle, on_rate_limit_throttle, RateLimitThrottleEvent);

    pub fn message_interceptor<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Vec<crate::types::Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<crate::types::Message>> + Send + 'static,
    {
        self.message_interceptor.push(Arc::new(move |m| Box::pin(handler(m))));
        self
    }

    pub fn chunk_interceptor<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        self.chunk_interceptor.push(Arc::new(move |c| Box::pin(handler(c))));
        self
    }

    pub fn gadget_parameter_interceptor<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn((String, Value)) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        self.gadget_parameter_interceptor
            .push(Arc::new(move |p| Box::pin(handler(p))));
        self
    }

    pub fn gadget_result_interceptor<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(GadgetExecutionResult) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GadgetExecutionResult> + Send + 'static,
    {
        self.gadget_result_interceptor
            .push(Arc::new(move |r| Box::pin(handler(r))));
        self
    }

    add_controller!(
        before_iteration_controller,
        before_iteration_controller,
        BeforeIterationEvent,
        ()
    );
    add_controller!(llm_call_controller, llm_call_controller, LlmCallEvent, ());
    add_controller!(
        after_llm_call_controller,
        after_llm_call_controller,
        AfterLlmCallEvent,
        ()
    );
    add_controller!(llm_error_controller, llm_error_controller, LlmCallErrorEvent, ());
    add_controller!(
        before_gadget_execution_controller,
        before_gadget_execution_controller,
        BeforeGadgetExecutionEvent,
        Value
    );
    add_controller!(
        after_gadget_execution_controller,
        after_gadget_execution_controller,
        AfterGadgetExecutionEvent,
        GadgetExecutionResult
    );
    add_controller!(
        dependency_skip_controller,
        dependency_skip_controller,
        DependencySkipEvent,
        ()
    );

    // -- firing/running, called from agent.rs and scheduler.rs --

    pub async fn fire_on_llm_call_start(&self, event: LlmCallEvent) {
        fire_all(&self.on_llm_call_start, event).await;
    }

    pub async fn fire_on_llm_call_ready(&self, event: LlmCallReadyEvent) {
        fire_all(&self.on_llm_call_ready, event).await;
    }

    pub async fn fire_on_llm_call_complete(&self, event: LlmCallCompleteEvent) {
        fire_all(&self.on_llm_call_complete, event).await;
    }

    pub async fn fire_on_llm_call_error(&self, event: LlmCallErrorEvent) {
        fire_all(&self.on_llm_call_error, event).await;
    }

    pub async fn fire_on_chunk(&self, event: ChunkEvent) {
        fire_all(&self.on_chunk, event).await;
    }

    pub async fn fire_on_gadget_start(&self, event: GadgetStartEvent) {
        fire_all(&self.on_gadget_start, event).await;
    }

    pub async fn fire_on_gadget_complete(&self, event: GadgetCompleteEvent) {
        fire_all(&self.on_gadget_complete, event).await;
    }

    pub async fn fire_on_gadget_skipped(&self, event: GadgetSkippedEvent) {
        fire_all(&self.on_gadget_skipped, event).await;
    }

    pub async fn fire_on_compaction(&self, event: CompactionEvent) {
        fire_all(&self.on_compaction, event).await;
    }

    pub async fn fire_on_retry_attempt(&self, event: RetryAttemptEvent) {
        fire_all(&self.on_retry_attempt, event).await;
    }

    pub async fn fire_on_rate_limit_throttle(&self, event: RateLimitThrottleEvent) {
        fire_all(&self.on_rate_limit_throttle, event).await;
    }

    pub async fn apply_message_interceptors(
        &self,
        messages: Vec<crate::types::Message>,
    ) -> Vec<crate::types::Message> {
        chain_all(&self.message_interceptor, messages).await
    }

    pub async fn apply_chunk_interceptors(&self, chunk: String) -> String {
        chain_all(&self.chunk_interceptor, chunk).await
    }

    pub async fn apply_gadget_parameter_interceptors(&self, gadget_name: &str, parameters: Value) -> Value {
        let mut value = parameters;
        for interceptor in &self.gadget_parameter_interceptor {
            value = interceptor((gadget_name.to_string(), value)).await;
        }
        value
    }

    pub async fn apply_gadget_result_interceptors(&self, result: GadgetExecutionResult) -> GadgetExecutionResult {
        chain_all(&self.gadget_result_interceptor, result).await
    }

    pub async fn run_before_iteration(&self, event: BeforeIterationEvent) -> ControllerAction<()> {
        run_controllers(&self.before_iteration_controller, event).await
    }

    pub async fn run_llm_call_controller(&self, event: LlmCallEvent) -> ControllerAction<()> {
        run_controllers(&self.llm_call_controller, event).await
    }

    pub async fn run_after_llm_call_controller(&self, event: AfterLlmCallEvent) -> ControllerAction<()> {
        run_controllers(&self.after_llm_call_controller, event).await
    }

    pub async fn run_llm_error_controller(&self, event: LlmCallErrorEvent) -> ControllerAction<()> {
        run_controllers(&self.llm_error_controller, event).await
    }

    pub async fn run_before_gadget_execution_controller(
        &self,
        event: BeforeGadgetExecutionEvent,
    ) -> ControllerAction<Value> {
        run_controllers(&self.before_gadget_execution_controller, event).await
    }

    pub async fn run_after_gadget_execution_controller(
        &self,
        event: AfterGadgetExecutionEvent,
    ) -> ControllerAction<GadgetExecutionResult> {
        run_controllers(&self.after_gadget_execution_controller, event).await
    }

    pub async fn run_dependency_skip_controller(&self, event: DependencySkipEvent) -> ControllerAction<()> {
        run_controllers(&self.dependency_skip_controller, event).await
    }
}
