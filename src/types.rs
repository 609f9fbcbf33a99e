//! Core domain types: messages, content blocks, gadget calls and results,
//! and the full `AgentOptions` configuration surface.
//!
//! Provider wire types (the OpenAI-compatible request/response shapes)
//! live in [`crate::provider`] — this module only knows about the core's
//! own vocabulary, not how it's transported.

use crate::hooks::Hooks;
use crate::registry::GadgetDescriptor;
use crate::retry::RetryConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// VALIDATED NEWTYPES
// ============================================================================

/// A non-empty model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelName(String);

impl ModelName {
    /// Validate and wrap a model name. Empty names are rejected.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::invalid_input("model name cannot be empty"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated base URL for an OpenAI-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseUrl(String);

impl BaseUrl {
    /// Validate and wrap a base URL. Must start with `http://` or `https://`.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(Error::invalid_input("base_url cannot be empty"));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::invalid_input(
                "base_url must start with http:// or https://",
            ));
        }
        Ok(Self(url.trim_end_matches('/').to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sampling temperature, validated to the 0.0-2.0 range most
/// OpenAI-compatible servers accept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature(f32);

impl Temperature {
    pub fn new(value: f32) -> Result<Self> {
        if !(0.0..=2.0).contains(&value) {
            return Err(Error::invalid_input("temperature must be between 0.0 and 2.0"));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// MESSAGES AND CONTENT BLOCKS
// ============================================================================

/// Message role. The sentinel protocol has no separate "tool" role: gadget
/// results are delivered as structured content inside a user-role message
/// (see [`ContentBlock::GadgetResult`] and §4.4 of the spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One piece of message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    Image(ImageBlock),
    GadgetResult(GadgetResultBlock),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Level of visual detail requested for an image (passed through to
/// providers that support it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    High,
    #[default]
    Auto,
}

impl fmt::Display for ImageDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageDetail::Low => write!(f, "low"),
            ImageDetail::High => write!(f, "high"),
            ImageDetail::Auto => write!(f, "auto"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBlock {
    pub url: String,
    pub detail: ImageDetail,
}

impl ImageBlock {
    /// Build from an `http(s)://` or `data:` URI, validating the scheme.
    pub fn from_url(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let is_http = url.starts_with("http://") || url.starts_with("https://");
        let is_data_uri = url.starts_with("data:") && url.contains(";base64,") && url.contains("image/");
        if !is_http && !is_data_uri {
            return Err(Error::invalid_input(
                "image url must be http(s):// or a base64 data: URI with an image/ mime type",
            ));
        }
        Ok(Self {
            url,
            detail: ImageDetail::default(),
        })
    }

    /// Build from raw base64 data and a mime type (e.g. `image/png`).
    pub fn from_base64(data: impl Into<String>, mime_type: impl Into<String>) -> Result<Self> {
        let data = data.into();
        let mime_type = mime_type.into();
        if data.is_empty() {
            return Err(Error::invalid_input("base64 image data cannot be empty"));
        }
        if !mime_type.starts_with("image/") {
            return Err(Error::invalid_input("mime_type must start with image/"));
        }
        Ok(Self {
            url: format!("data:{};base64,{}", mime_type, data),
            detail: ImageDetail::default(),
        })
    }

    pub fn with_detail(mut self, detail: ImageDetail) -> Self {
        self.detail = detail;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn detail(&self) -> ImageDetail {
        self.detail
    }
}

/// One gadget's outcome, embedded in the user-role "results" message that
/// follows an assistant turn containing gadget calls (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GadgetResultBlock {
    pub invocation_id: String,
    pub gadget_name: String,
    pub parameters: Value,
    pub result: Value,
}

impl GadgetResultBlock {
    pub fn new(
        invocation_id: impl Into<String>,
        gadget_name: impl Into<String>,
        parameters: Value,
        result: Value,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            gadget_name: gadget_name.into(),
            parameters,
            result,
        }
    }
}

/// A message in the conversation. Assistant content is the raw model
/// output verbatim — sentinel blocks included — so it round-trips across
/// iterations and compaction (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, vec![ContentBlock::Text(TextBlock::new(text))])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, vec![ContentBlock::Text(TextBlock::new(text))])
    }

    /// The raw assistant message for one iteration, stored byte-for-byte
    /// (sentinels included) per invariant I3.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, vec![ContentBlock::Text(TextBlock::new(text))])
    }

    pub fn user_with_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::new(MessageRole::User, blocks)
    }

    /// The gadget-call-result message appended after a batch of gadgets
    /// finishes executing (§4.4). Results are listed in the order passed,
    /// which the scheduler guarantees is parsed order (P3).
    pub fn gadget_results(results: Vec<GadgetResultBlock>) -> Self {
        Self::new(
            MessageRole::User,
            results.into_iter().map(ContentBlock::GadgetResult).collect(),
        )
    }

    /// Concatenated plain text across all `Text` blocks (used for token
    /// estimation and display).
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

// ============================================================================
// GADGET CALLS AND RESULTS
// ============================================================================

/// One gadget invocation parsed out of an assistant message's sentinel
/// blocks (§3, §4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedGadgetCall {
    pub gadget_name: String,
    pub invocation_id: String,
    pub parameters: Value,
    pub dependencies: Vec<String>,
}

/// The outcome of executing one `ParsedGadgetCall` (§3). Exactly one of
/// `result` or `error` is meaningful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GadgetExecutionResult {
    pub gadget_name: String,
    pub invocation_id: String,
    pub parameters: Value,
    pub result: Option<String>,
    pub media_outputs: Option<Vec<Value>>,
    pub media_ids: Option<Vec<String>>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl GadgetExecutionResult {
    pub fn success(
        gadget_name: impl Into<String>,
        invocation_id: impl Into<String>,
        parameters: Value,
        result: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            gadget_name: gadget_name.into(),
            invocation_id: invocation_id.into(),
            parameters,
            result: Some(result.into()),
            media_outputs: None,
            media_ids: None,
            error: None,
            elapsed_ms,
        }
    }

    pub fn failure(
        gadget_name: impl Into<String>,
        invocation_id: impl Into<String>,
        parameters: Value,
        error: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            gadget_name: gadget_name.into(),
            invocation_id: invocation_id.into(),
            parameters,
            result: None,
            media_outputs: None,
            media_ids: None,
            error: Some(error.into()),
            elapsed_ms,
        }
    }

    /// The text observed by the model for this invocation: the result on
    /// success, or the error message on failure.
    pub fn observed_text(&self) -> &str {
        self.result
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or("")
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ============================================================================
// STORED OUTPUT
// ============================================================================

/// A record in the Output Store, addressed by the stable short ID
/// assigned at storage time (§4.3).
#[derive(Debug, Clone)]
pub struct StoredOutput {
    pub id: String,
    pub gadget_name: String,
    pub content: String,
    pub byte_size: usize,
    pub line_count: usize,
    pub timestamp: std::time::SystemTime,
}

// ============================================================================
// TURNS
// ============================================================================

/// A contiguous range of history indices forming one compaction unit:
/// starts at a non-assistant message, followed by consecutive assistant
/// messages (plus any leading assistant-only preamble) (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Turn {
    pub start: usize,
    pub end: usize, // exclusive
}

/// Group a history slice into turns using index ranges (§9's
/// "arena + indices" design note — turns are computed, not materialized).
pub fn group_into_turns(history: &[Message]) -> Vec<Turn> {
    if history.is_empty() {
        return Vec::new();
    }

    let mut turns = Vec::new();
    let mut start = 0usize;

    for i in 1..history.len() {
        let starts_new_turn =
            history[i].role != MessageRole::Assistant && history[i - 1].role == MessageRole::Assistant;
        // Also split when two non-assistant messages are adjacent (each
        // non-assistant message that isn't immediately followed by another
        // non-assistant one starts its own turn boundary).
        let non_assistant_adjacent =
            history[i].role != MessageRole::Assistant && history[i - 1].role != MessageRole::Assistant;
        if starts_new_turn || non_assistant_adjacent {
            turns.push(Turn { start, end: i });
            start = i;
        }
    }
    turns.push(Turn {
        start,
        end: history.len(),
    });

    turns
}

// ============================================================================
// CONFIGURATION SURFACE (§6)
// ============================================================================

/// `parallel` (default) runs all dependency-ready gadgets concurrently;
/// `sequential` drains the ready queue one call at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GadgetExecutionMode {
    #[default]
    Parallel,
    Sequential,
}

/// Output Store truncation policy (§4.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GadgetOutputLimitConfig {
    pub enabled: bool,
    /// Fraction of the context window a single result may consume before
    /// being stashed and truncated. Default 0.15 (15%).
    pub percent: f32,
}

impl Default for GadgetOutputLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            percent: 0.15,
        }
    }
}

/// Compaction strategy selection (§4.5). `Hybrid` falls back to
/// `SlidingWindow` when fewer than 3 turns are eligible for compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionStrategy {
    SlidingWindow,
    Summarization,
    #[default]
    Hybrid,
}

impl fmt::Display for CompactionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompactionStrategy::SlidingWindow => write!(f, "sliding-window"),
            CompactionStrategy::Summarization => write!(f, "summarization"),
            CompactionStrategy::Hybrid => write!(f, "hybrid"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompactionConfig {
    pub enabled: bool,
    pub strategy: CompactionStrategy,
    /// Compaction triggers when estimated tokens exceed this fraction of
    /// the context window. Default 0.80.
    pub trigger_threshold_percent: f32,
    /// Compaction runs until estimated tokens are at or below this
    /// fraction. Default 0.50.
    pub target_percent: f32,
    /// Most recent N turns are always kept verbatim. Default 5.
    pub preserve_recent_turns: usize,
    pub summarization_model: Option<String>,
    pub summarization_prompt: Option<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: CompactionStrategy::Hybrid,
            trigger_threshold_percent: 0.80,
            target_percent: 0.50,
            preserve_recent_turns: 5,
            summarization_model: None,
            summarization_prompt: None,
        }
    }
}

/// Prompt-caching hints, passed through to providers that support them.
/// The core carries these inert — caching semantics are a provider
/// transport concern excluded from this crate's scope (§1, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachingScope {
    System,
    Conversation,
}

#[derive(Debug, Clone, Default)]
pub struct CachingConfig {
    pub enabled: bool,
    pub scope: Option<CachingScope>,
    pub ttl_secs: Option<u64>,
    pub min_token_threshold: Option<usize>,
}

/// Reasoning-effort hints, passed through to providers that support them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReasoningEffort {
    #[default]
    None,
    Low,
    Medium,
    High,
    Maximum,
}

#[derive(Debug, Clone, Default)]
pub struct ReasoningConfig {
    pub enabled: bool,
    pub effort: ReasoningEffort,
    pub budget_tokens: Option<u32>,
    pub interleaved: bool,
}

/// USD-per-million-token pricing, required when `budget` is set (§7:
/// "budget set but model has no pricing" is a configuration error raised
/// at construction, not during run).
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// The literal sentinel strings demarcating gadget blocks. Configurable
/// but fixed within a single run (§6).
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub start: String,
    pub arg: String,
    pub end: String,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            start: "!!!GADGET_START:".to_string(),
            arg: "!!!ARG:".to_string(),
            end: "!!!GADGET_END".to_string(),
        }
    }
}

/// Full agent configuration (§6's configuration surface table).
#[derive(Clone)]
pub struct AgentOptions {
    system_prompt: String,
    model: ModelName,
    base_url: BaseUrl,
    api_key: String,
    temperature: Temperature,
    max_tokens: Option<u32>,
    timeout: u64,
    context_window: usize,
    max_iterations: u32,
    budget: Option<f64>,
    gadget_execution_mode: GadgetExecutionMode,
    gadget_output_limit: GadgetOutputLimitConfig,
    compaction: CompactionConfig,
    retry: RetryConfig,
    gadgets: Vec<Arc<GadgetDescriptor>>,
    hooks: Hooks,
    sentinel: SentinelConfig,
    caching: CachingConfig,
    reasoning: ReasoningConfig,
    model_pricing: Option<ModelPricing>,
}

impl fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentOptions")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("context_window", &self.context_window)
            .field("max_iterations", &self.max_iterations)
            .field("budget", &self.budget)
            .field("gadget_execution_mode", &self.gadget_execution_mode)
            .field("gadgets", &format!("{} gadgets", self.gadgets.len()))
            .finish()
    }
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            model: ModelName("".to_string()),
            base_url: BaseUrl("".to_string()),
            api_key: "not-needed".to_string(),
            temperature: Temperature(0.7),
            max_tokens: Some(4096),
            timeout: 120, // implicit provider timeout default per §5
            context_window: 128_000,
            max_iterations: 10,
            budget: None,
            gadget_execution_mode: GadgetExecutionMode::default(),
            gadget_output_limit: GadgetOutputLimitConfig::default(),
            compaction: CompactionConfig::default(),
            retry: RetryConfig::default(),
            gadgets: Vec::new(),
            hooks: Hooks::new(),
            sentinel: SentinelConfig::default(),
            caching: CachingConfig::default(),
            reasoning: ReasoningConfig::default(),
            model_pricing: None,
        }
    }
}

impl AgentOptions {
    pub fn builder() -> AgentOptionsBuilder {
        AgentOptionsBuilder::default()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
    pub fn model(&self) -> &ModelName {
        &self.model
    }
    pub fn base_url(&self) -> &BaseUrl {
        &self.base_url
    }
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
    pub fn temperature(&self) -> Temperature {
        self.temperature
    }
    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }
    pub fn timeout(&self) -> u64 {
        self.timeout
    }
    pub fn context_window(&self) -> usize {
        self.context_window
    }
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }
    pub fn budget(&self) -> Option<f64> {
        self.budget
    }
    pub fn gadget_execution_mode(&self) -> GadgetExecutionMode {
        self.gadget_execution_mode
    }
    pub fn gadget_output_limit(&self) -> GadgetOutputLimitConfig {
        self.gadget_output_limit
    }
    pub fn compaction(&self) -> &CompactionConfig {
        &self.compaction
    }
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }
    pub fn gadgets(&self) -> &[Arc<GadgetDescriptor>] {
        &self.gadgets
    }
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }
    pub fn sentinel(&self) -> &SentinelConfig {
        &self.sentinel
    }
    pub fn caching(&self) -> &CachingConfig {
        &self.caching
    }
    pub fn reasoning(&self) -> &ReasoningConfig {
        &self.reasoning
    }
    pub fn model_pricing(&self) -> Option<ModelPricing> {
        self.model_pricing
    }
}

/// Validating builder for [`AgentOptions`], following the same
/// `Option<T>`-fields-plus-`.build()` pattern as the rest of this crate's
/// configuration types.
#[derive(Default)]
pub struct AgentOptionsBuilder {
    system_prompt: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Option<u64>,
    context_window: Option<usize>,
    max_iterations: Option<u32>,
    budget: Option<f64>,
    gadget_execution_mode: Option<GadgetExecutionMode>,
    gadget_output_limit: Option<GadgetOutputLimitConfig>,
    compaction: Option<CompactionConfig>,
    retry: Option<RetryConfig>,
    gadgets: Vec<Arc<GadgetDescriptor>>,
    hooks: Option<Hooks>,
    sentinel: Option<SentinelConfig>,
    caching: Option<CachingConfig>,
    reasoning: Option<ReasoningConfig>,
    model_pricing: Option<ModelPricing>,
}

impl AgentOptionsBuilder {
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn context_window(mut self, size: usize) -> Self {
        self.context_window = Some(size);
        self
    }

    pub fn max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = Some(iterations);
        self
    }

    pub fn budget(mut self, budget: f64) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn gadget_execution_mode(mut self, mode: GadgetExecutionMode) -> Self {
        self.gadget_execution_mode = Some(mode);
        self
    }

    pub fn gadget_output_limit(mut self, limit: GadgetOutputLimitConfig) -> Self {
        self.gadget_output_limit = Some(limit);
        self
    }

    pub fn compaction(mut self, config: CompactionConfig) -> Self {
        self.compaction = Some(config);
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    pub fn gadget(mut self, descriptor: GadgetDescriptor) -> Self {
        self.gadgets.push(Arc::new(descriptor));
        self
    }

    pub fn gadgets(mut self, descriptors: Vec<GadgetDescriptor>) -> Self {
        self.gadgets.extend(descriptors.into_iter().map(Arc::new));
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn sentinel(mut self, sentinel: SentinelConfig) -> Self {
        self.sentinel = Some(sentinel);
        self
    }

    pub fn caching(mut self, caching: CachingConfig) -> Self {
        self.caching = Some(caching);
        self
    }

    pub fn reasoning(mut self, reasoning: ReasoningConfig) -> Self {
        self.reasoning = Some(reasoning);
        self
    }

    pub fn model_pricing(mut self, pricing: ModelPricing) -> Self {
        self.model_pricing = Some(pricing);
        self
    }

    pub fn build(self) -> Result<AgentOptions> {
        let model_str = self
            .model
            .ok_or_else(|| Error::config("model is required"))?;
        let base_url_str = self
            .base_url
            .ok_or_else(|| Error::config("base_url is required"))?;

        let model = ModelName::new(model_str)?;
        let base_url = BaseUrl::new(base_url_str)?;
        let temperature = Temperature::new(self.temperature.unwrap_or(0.7))?;

        if let Some(max_tokens) = self.max_tokens {
            if max_tokens == 0 {
                return Err(Error::config("max_tokens must be greater than 0"));
            }
        }

        let budget = self.budget;
        let model_pricing = self.model_pricing;
        if budget.is_some() && model_pricing.is_none() {
            return Err(Error::config(
                "budget is set but no model_pricing was provided; budget tracking requires pricing",
            ));
        }

        let compaction = self.compaction.unwrap_or_default();
        if compaction.target_percent >= compaction.trigger_threshold_percent {
            tracing::warn!(
                target_percent = compaction.target_percent,
                trigger_threshold_percent = compaction.trigger_threshold_percent,
                "compaction target_percent >= trigger_threshold_percent; compactor will run but cannot make progress"
            );
        }

        Ok(AgentOptions {
            system_prompt: self.system_prompt.unwrap_or_default(),
            model,
            base_url,
            api_key: self.api_key.unwrap_or_else(|| "not-needed".to_string()),
            temperature,
            max_tokens: self.max_tokens.or(Some(4096)),
            timeout: self.timeout.unwrap_or(120),
            context_window: self.context_window.unwrap_or(128_000),
            max_iterations: self.max_iterations.unwrap_or(10),
            budget,
            gadget_execution_mode: self.gadget_execution_mode.unwrap_or_default(),
            gadget_output_limit: self.gadget_output_limit.unwrap_or_default(),
            compaction,
            retry: self.retry.unwrap_or_default(),
            gadgets: self.gadgets,
            hooks: self.hooks.unwrap_or_default(),
            sentinel: self.sentinel.unwrap_or_default(),
            caching: self.caching.unwrap_or_default(),
            reasoning: self.reasoning.unwrap_or_default(),
            model_pricing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_model_and_base_url() {
        let result = AgentOptions::builder().build();
        assert!(result.is_err());

        let result = AgentOptions::builder().model("gpt-oss-20b").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let options = AgentOptions::builder()
            .model("gpt-oss-20b")
            .base_url("http://localhost:1234/v1")
            .build()
            .unwrap();

        assert_eq!(options.max_iterations(), 10);
        assert_eq!(options.context_window(), 128_000);
        assert_eq!(options.gadget_execution_mode(), GadgetExecutionMode::Parallel);
        assert!(options.compaction().enabled);
        assert_eq!(options.compaction().strategy, CompactionStrategy::Hybrid);
    }

    #[test]
    fn test_builder_rejects_budget_without_pricing() {
        let result = AgentOptions::builder()
            .model("gpt-oss-20b")
            .base_url("http://localhost:1234/v1")
            .budget(1.0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_accepts_budget_with_pricing() {
        let result = AgentOptions::builder()
            .model("gpt-oss-20b")
            .base_url("http://localhost:1234/v1")
            .budget(1.0)
            .model_pricing(ModelPricing {
                input_per_million: 10.0,
                output_per_million: 30.0,
            })
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_temperature_validation() {
        assert!(Temperature::new(0.0).is_ok());
        assert!(Temperature::new(2.0).is_ok());
        assert!(Temperature::new(2.1).is_err());
        assert!(Temperature::new(-0.1).is_err());
    }

    #[test]
    fn test_message_constructors() {
        let msg = Message::user("hello");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.text(), "hello");

        let msg = Message::assistant("!!!GADGET_START:Calc:gc_1\n!!!ARG:expr\n2+2\n!!!GADGET_END\n");
        assert_eq!(msg.role, MessageRole::Assistant);
        assert!(msg.text().contains("GADGET_START"));
    }

    #[test]
    fn test_gadget_results_message() {
        let msg = Message::gadget_results(vec![GadgetResultBlock::new(
            "gc_1",
            "Calc",
            serde_json::json!({"expr": "2+2"}),
            serde_json::json!("4"),
        )]);
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content.len(), 1);
    }

    #[test]
    fn test_group_into_turns_simple() {
        let history = vec![
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("again"),
            Message::assistant("a1"),
            Message::assistant("a2"),
        ];
        let turns = group_into_turns(&history);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], Turn { start: 0, end: 2 });
        assert_eq!(turns[1], Turn { start: 2, end: 5 });
    }

    #[test]
    fn test_group_into_turns_leading_assistant_preamble() {
        let history = vec![
            Message::assistant("preamble"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let turns = group_into_turns(&history);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], Turn { start: 0, end: 1 });
        assert_eq!(turns[1], Turn { start: 1, end: 3 });
    }

    #[test]
    fn test_image_block_validation() {
        assert!(ImageBlock::from_url("https://example.com/cat.png").is_ok());
        assert!(ImageBlock::from_url("ftp://example.com/cat.png").is_err());
        assert!(ImageBlock::from_base64("abc123", "image/png").is_ok());
        assert!(ImageBlock::from_base64("abc123", "text/plain").is_err());
    }
}
