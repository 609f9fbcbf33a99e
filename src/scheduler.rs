//! Gadget Scheduler: orders one assistant turn's parsed gadget calls by
//! their declared dependencies and runs them, parallel or sequential,
//! honoring per-call timeouts, global cancellation, and the two special
//! control signals a gadget handler may return (§4.7).
//!
//! Grounded on the teacher's `Client::auto_execute_loop`, which ran tool
//! calls one at a time with no dependency concept. Generalizing that flat
//! loop into a dependency-DAG scheduler is the single biggest shape change
//! from the teacher's tool-calling design to this one's gadget-calling
//! design — everything else here (timeout racing, result assembly, output
//! truncation) is new supporting machinery the flat loop didn't need.

use crate::hooks::{
    AfterGadgetExecutionEvent, BeforeGadgetExecutionEvent, ControllerAction, DependencySkipEvent,
    GadgetCompleteEvent, GadgetSkippedEvent, GadgetStartEvent, Hooks,
};
use crate::output_store::{max_inline_chars, truncate_for_inline, OutputStore};
use crate::registry::{GadgetOutcome, GadgetRegistry, Validator};
use crate::types::{GadgetExecutionMode, GadgetExecutionResult, GadgetOutputLimitConfig, ParsedGadgetCall};
use crate::Result;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Callback the embedder supplies to answer a gadget's `RequestHumanInput`
/// signal. Absent by default — a gadget that requests human input without
/// one configured gets an error result instead of blocking forever.
pub type HumanInputFn =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<String>> + Send>> + Send + Sync>;

/// What one scheduler batch produced.
#[derive(Debug, Clone)]
pub struct SchedulerOutcome {
    /// Results in the same order as the calls that were passed in,
    /// regardless of completion order (§4.7, P3).
    pub results: Vec<GadgetExecutionResult>,
    /// Set when a gadget raised `TerminateConversation`; the Agent Loop
    /// ends cleanly after this batch using this as the final text.
    pub terminate_message: Option<String>,
}

enum RaceOutcome {
    Done(Result<GadgetOutcome>),
    TimedOut,
    Cancelled,
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct GadgetScheduler<'a> {
    registry: &'a GadgetRegistry,
    validator: &'a dyn Validator,
    output_store: &'a OutputStore,
    hooks: &'a Hooks,
    gadget_output_limit: GadgetOutputLimitConfig,
    context_window: usize,
    mode: GadgetExecutionMode,
    cancellation: CancellationToken,
    human_input: Option<&'a HumanInputFn>,
}

impl<'a> GadgetScheduler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: &'a GadgetRegistry,
        validator: &'a dyn Validator,
        output_store: &'a OutputStore,
        hooks: &'a Hooks,
        gadget_output_limit: GadgetOutputLimitConfig,
        context_window: usize,
        mode: GadgetExecutionMode,
        cancellation: CancellationToken,
        human_input: Option<&'a HumanInputFn>,
    ) -> Self {
        Self {
            registry,
            validator,
            output_store,
            hooks,
            gadget_output_limit,
            context_window,
            mode,
            cancellation,
            human_input,
        }
    }

    /// Run one assistant turn's gadget calls to completion.
    pub async fn execute(&self, calls: Vec<ParsedGadgetCall>) -> SchedulerOutcome {
        let n = calls.len();
        if n == 0 {
            return SchedulerOutcome {
                results: Vec::new(),
                terminate_message: None,
            };
        }

        let id_to_index: HashMap<&str, usize> = calls
            .iter()
            .enumerate()
            .map(|(i, c)| (c.invocation_id.as_str(), i))
            .collect();

        // P2: build the dependency DAG, rejecting unknown or forward
        // references up front as structural errors.
        let mut dep_indices: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut invalid: Vec<Option<String>> = vec![None; n];
        for (i, call) in calls.iter().enumerate() {
            for dep in &call.dependencies {
                match id_to_index.get(dep.as_str()) {
                    Some(&dep_idx) if dep_idx < i => dep_indices[i].push(dep_idx),
                    Some(_) => invalid[i] = Some(format!("dependency {} does not precede this call", dep)),
                    None => invalid[i] = Some(format!("unknown dependency: {}", dep)),
                }
            }
        }

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut pending_count = vec![0usize; n];
        for i in 0..n {
            if invalid[i].is_some() {
                continue;
            }
            pending_count[i] = dep_indices[i].len();
            for &d in &dep_indices[i] {
                dependents[d].push(i);
            }
        }

        let mut results: Vec<Option<GadgetExecutionResult>> = vec![None; n];
        let mut started = vec![false; n];
        let mut failed_dep: Vec<Option<String>> = vec![None; n];
        let mut terminate_message: Option<String> = None;
        let mut terminate_fired = false;

        // Calls rejected at DAG-build time (unknown/forward dependency
        // reference) never actually run, but their dependents still need
        // the failed-dependency skip cascade — otherwise a call depending
        // on a rejected one sits with a permanently nonzero pending count
        // and falls through to the "never resolved" catch-all below
        // without ever firing `onGadgetSkipped`. Drive the same
        // `resolve_completion` path used for real completions, in index
        // order so each rejected node's own (earlier-indexed) dependencies
        // have already been processed.
        let mut initial_ready: Vec<usize> = Vec::new();
        for i in 0..n {
            if let Some(reason) = invalid[i].clone() {
                started[i] = true;
                results[i] = Some(GadgetExecutionResult::failure(
                    calls[i].gadget_name.clone(),
                    calls[i].invocation_id.clone(),
                    calls[i].parameters.clone(),
                    reason,
                    0,
                ));
                let ready = self
                    .resolve_completion(i, &calls, &dependents, &mut pending_count, &mut started, &mut failed_dep, &mut results, terminate_fired)
                    .await;
                initial_ready.extend(ready);
            }
        }

        initial_ready.extend((0..n).filter(|&i| !started[i] && pending_count[i] == 0));
        initial_ready.sort_unstable();
        initial_ready.dedup();

        if self.mode == GadgetExecutionMode::Sequential {
            let mut queue = initial_ready;
            while let Some(i) = queue.first().copied() {
                queue.remove(0);
                started[i] = true;
                let (result, term) = self.run_one(i, &calls[i]).await;
                results[i] = Some(result);
                if let Some(msg) = term {
                    terminate_message = Some(msg);
                    terminate_fired = true;
                }
                let mut newly_ready = self
                    .resolve_completion(i, &calls, &dependents, &mut pending_count, &mut started, &mut failed_dep, &mut results, terminate_fired)
                    .await;
                newly_ready.sort_unstable();
                queue.extend(newly_ready);
                queue.sort_unstable();
            }
        } else {
            let mut in_flight = FuturesUnordered::new();
            for &i in &initial_ready {
                started[i] = true;
                in_flight.push(async move { (i, self.run_one(i, &calls[i]).await) });
            }

            while let Some((i, (result, term))) = in_flight.next().await {
                results[i] = Some(result);
                if let Some(msg) = term {
                    terminate_message = Some(msg);
                    terminate_fired = true;
                }
                let newly_ready = self
                    .resolve_completion(i, &calls, &dependents, &mut pending_count, &mut started, &mut failed_dep, &mut results, terminate_fired)
                    .await;
                for j in newly_ready {
                    started[j] = true;
                    in_flight.push(async move { (j, self.run_one(j, &calls[j]).await) });
                }
            }
        }

        let results = results
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.unwrap_or_else(|| GadgetExecutionResult::failure(
                calls[i].gadget_name.clone(),
                calls[i].invocation_id.clone(),
                calls[i].parameters.clone(),
                "gadget call never resolved",
                0,
            )))
            .collect();

        SchedulerOutcome {
            results,
            terminate_message,
        }
    }

    /// After call `i` completes, decrement its dependents' pending count
    /// and either mark them for immediate skip (a dependency failed),
    /// hold them (run terminated or was cancelled), or return them ready
    /// to start.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_completion(
        &self,
        i: usize,
        calls: &[ParsedGadgetCall],
        dependents: &[Vec<usize>],
        pending_count: &mut [usize],
        started: &mut [bool],
        failed_dep: &mut [Option<String>],
        results: &mut [Option<GadgetExecutionResult>],
        terminate_fired: bool,
    ) -> Vec<usize> {
        let completed_failed = results[i].as_ref().map(|r| r.is_error()).unwrap_or(false);
        let completed_id = calls[i].invocation_id.clone();

        let mut ready = Vec::new();
        for &dep_i in &dependents[i] {
            if started[dep_i] {
                continue;
            }
            if completed_failed && failed_dep[dep_i].is_none() {
                failed_dep[dep_i] = Some(completed_id.clone());
            }
            pending_count[dep_i] -= 1;
            if pending_count[dep_i] > 0 {
                continue;
            }

            if let Some(failed_id) = failed_dep[dep_i].clone() {
                let action = self
                    .hooks
                    .run_dependency_skip_controller(DependencySkipEvent {
                        invocation_id: calls[dep_i].invocation_id.clone(),
                        failed_dependency: failed_id.clone(),
                    })
                    .await;
                // `Replace(())` is the override: run the call despite the
                // failed dependency. Every other action (including the
                // no-controllers default `Proceed`) confirms the skip.
                if matches!(action, ControllerAction::Replace(())) {
                    started[dep_i] = true;
                    ready.push(dep_i);
                } else {
                    started[dep_i] = true;
                    let reason = format!("dependency {} failed", failed_id);
                    self.hooks
                        .fire_on_gadget_skipped(GadgetSkippedEvent {
                            invocation_id: calls[dep_i].invocation_id.clone(),
                            gadget_name: calls[dep_i].gadget_name.clone(),
                            reason: reason.clone(),
                        })
                        .await;
                    results[dep_i] = Some(GadgetExecutionResult::failure(
                        calls[dep_i].gadget_name.clone(),
                        calls[dep_i].invocation_id.clone(),
                        calls[dep_i].parameters.clone(),
                        reason,
                        0,
                    ));
                }
            } else if terminate_fired || self.cancellation.is_cancelled() {
                started[dep_i] = true;
                let reason = if terminate_fired {
                    "not started: conversation terminated"
                } else {
                    "not started: run cancelled"
                };
                results[dep_i] = Some(GadgetExecutionResult::failure(
                    calls[dep_i].gadget_name.clone(),
                    calls[dep_i].invocation_id.clone(),
                    calls[dep_i].parameters.clone(),
                    reason,
                    0,
                ));
            } else {
                started[dep_i] = true;
                ready.push(dep_i);
            }
        }
        ready
    }

    /// Run a single call: before-execution controller, parameter
    /// interceptors, validation, the timeout/cancellation race, then
    /// result assembly. Returns the result plus a terminate message if the
    /// gadget raised `TerminateConversation`.
    async fn run_one(&self, index: usize, call: &ParsedGadgetCall) -> (GadgetExecutionResult, Option<String>) {
        let _ = index;
        let start = Instant::now();
        let invocation_id = call.invocation_id.clone();
        let gadget_name = call.gadget_name.clone();

        self.hooks
            .fire_on_gadget_start(GadgetStartEvent {
                invocation_id: invocation_id.clone(),
                gadget_name: gadget_name.clone(),
                parameters: call.parameters.clone(),
            })
            .await;

        let Some(descriptor) = self.registry.get(&gadget_name) else {
            let result = GadgetExecutionResult::failure(
                gadget_name,
                invocation_id,
                call.parameters.clone(),
                format!("unknown gadget: {}", call.gadget_name),
                elapsed_ms(start),
            );
            return (self.finish_result(result).await, None);
        };

        let before_action = self
            .hooks
            .run_before_gadget_execution_controller(BeforeGadgetExecutionEvent {
                invocation_id: invocation_id.clone(),
                gadget_name: gadget_name.clone(),
                parameters: call.parameters.clone(),
            })
            .await;

        let parameters = match before_action {
            ControllerAction::Skip => {
                self.hooks
                    .fire_on_gadget_skipped(GadgetSkippedEvent {
                        invocation_id: invocation_id.clone(),
                        gadget_name: gadget_name.clone(),
                        reason: "skipped by beforeGadgetExecution controller".to_string(),
                    })
                    .await;
                let result = GadgetExecutionResult::failure(
                    gadget_name,
                    invocation_id,
                    call.parameters.clone(),
                    "skipped by beforeGadgetExecution controller",
                    elapsed_ms(start),
                );
                return (result, None);
            }
            ControllerAction::Abort(reason) => {
                let result = GadgetExecutionResult::failure(
                    gadget_name,
                    invocation_id,
                    call.parameters.clone(),
                    format!("aborted by beforeGadgetExecution controller: {}", reason),
                    elapsed_ms(start),
                );
                return (self.finish_result(result).await, None);
            }
            ControllerAction::Replace(params) => params,
            _ => call.parameters.clone(),
        };

        let parameters = self
            .hooks
            .apply_gadget_parameter_interceptors(&gadget_name, parameters)
            .await;

        let diagnostics = self.validator.validate(descriptor.parameter_schema(), &parameters);
        if !diagnostics.is_empty() {
            let message = diagnostics
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            let result = GadgetExecutionResult::failure(
                gadget_name,
                invocation_id,
                parameters,
                message,
                elapsed_ms(start),
            );
            return (self.finish_result(result).await, None);
        }

        let race_outcome = if let Some(timeout_ms) = descriptor.timeout_ms() {
            tokio::select! {
                res = descriptor.execute(parameters.clone()) => RaceOutcome::Done(res),
                _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => RaceOutcome::TimedOut,
                _ = self.cancellation.cancelled() => RaceOutcome::Cancelled,
            }
        } else {
            tokio::select! {
                res = descriptor.execute(parameters.clone()) => RaceOutcome::Done(res),
                _ = self.cancellation.cancelled() => RaceOutcome::Cancelled,
            }
        };

        match race_outcome {
            RaceOutcome::TimedOut => {
                let result = GadgetExecutionResult::failure(
                    gadget_name,
                    invocation_id,
                    parameters,
                    "gadget call timed out",
                    elapsed_ms(start),
                );
                (self.finish_result(result).await, None)
            }
            RaceOutcome::Cancelled => {
                let result = GadgetExecutionResult::failure(
                    gadget_name,
                    invocation_id,
                    parameters,
                    "cancelled",
                    elapsed_ms(start),
                );
                (self.finish_result(result).await, None)
            }
            RaceOutcome::Done(Err(e)) => {
                let result = GadgetExecutionResult::failure(
                    gadget_name,
                    invocation_id,
                    parameters,
                    e.to_string(),
                    elapsed_ms(start),
                );
                (self.finish_result(result).await, None)
            }
            RaceOutcome::Done(Ok(GadgetOutcome::Result(value))) => {
                let result = GadgetExecutionResult::success(
                    gadget_name,
                    invocation_id,
                    parameters,
                    value_to_text(&value),
                    elapsed_ms(start),
                );
                (self.finish_result(result).await, None)
            }
            RaceOutcome::Done(Ok(GadgetOutcome::Error { message })) => {
                let result = GadgetExecutionResult::failure(
                    gadget_name,
                    invocation_id,
                    parameters,
                    message,
                    elapsed_ms(start),
                );
                (self.finish_result(result).await, None)
            }
            RaceOutcome::Done(Ok(GadgetOutcome::Terminate { message })) => {
                let text = message.unwrap_or_else(|| "conversation terminated by gadget".to_string());
                let result = GadgetExecutionResult::success(
                    gadget_name,
                    invocation_id,
                    parameters,
                    text.clone(),
                    elapsed_ms(start),
                );
                (self.finish_result(result).await, Some(text))
            }
            RaceOutcome::Done(Ok(GadgetOutcome::RequestHumanInput { prompt })) => {
                let result = match self.human_input {
                    Some(callback) => match callback(prompt).await {
                        Ok(answer) => GadgetExecutionResult::success(
                            gadget_name,
                            invocation_id,
                            parameters,
                            answer,
                            elapsed_ms(start),
                        ),
                        Err(e) => GadgetExecutionResult::failure(
                            gadget_name,
                            invocation_id,
                            parameters,
                            format!("human input callback failed: {}", e),
                            elapsed_ms(start),
                        ),
                    },
                    None => GadgetExecutionResult::failure(
                        gadget_name,
                        invocation_id,
                        parameters,
                        "gadget requested human input but no callback was configured",
                        elapsed_ms(start),
                    ),
                };
                (self.finish_result(result).await, None)
            }
        }
    }

    /// Result interceptor, after-execution controller, output-store
    /// truncation, then the `onGadgetComplete` observer.
    async fn finish_result(&self, mut result: GadgetExecutionResult) -> GadgetExecutionResult {
        result = self.hooks.apply_gadget_result_interceptors(result).await;

        let after_action = self
            .hooks
            .run_after_gadget_execution_controller(AfterGadgetExecutionEvent { result: result.clone() })
            .await;
        if let ControllerAction::Replace(replacement) = after_action {
            result = replacement;
        }

        if result.error.is_none() && self.gadget_output_limit.enabled {
            if let Some(text) = result.result.clone() {
                let max_chars = max_inline_chars(self.gadget_output_limit.percent, self.context_window);
                result.result = Some(truncate_for_inline(self.output_store, &result.gadget_name, &text, max_chars));
            }
        }

        self.hooks
            .fire_on_gadget_complete(GadgetCompleteEvent { result: result.clone() })
            .await;
        result
    }
}
