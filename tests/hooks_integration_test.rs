//! Hook integration tests against the real Gadget Scheduler.
//!
//! Unlike a network-backed agent run, the scheduler's gadget handlers
//! execute locally, so these tests drive `GadgetScheduler::execute`
//! directly with hand-built `ParsedGadgetCall`s instead of a live model.

use gadget_agent::{
    ControllerAction, GadgetDescriptor, GadgetExecutionMode, GadgetOutcome, GadgetOutputLimitConfig,
    GadgetRegistry, GadgetScheduler, Hooks, OutputStore, ParsedGadgetCall, SchemaValidator,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

fn call(gadget_name: &str, invocation_id: &str, deps: &[&str]) -> ParsedGadgetCall {
    ParsedGadgetCall {
        gadget_name: gadget_name.to_string(),
        invocation_id: invocation_id.to_string(),
        parameters: json!({}),
        dependencies: deps.iter().map(|s| s.to_string()).collect(),
    }
}

/// A before-execution controller that blocks a named gadget outright.
#[tokio::test]
async fn test_before_execution_controller_skips_gadget() {
    let dangerous = GadgetDescriptor::new(
        "delete_file",
        "Delete a file",
        json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        |_args| async move { panic!("should not execute — controller should skip this") },
    );

    let hooks = Hooks::new().before_gadget_execution_controller(|event| async move {
        if event.gadget_name == "delete_file" {
            ControllerAction::Skip
        } else {
            ControllerAction::Proceed
        }
    });

    let registry = GadgetRegistry::new(&[Arc::new(dangerous)]);
    let validator = SchemaValidator;
    let output_store = OutputStore::new();
    let scheduler = GadgetScheduler::new(
        &registry,
        &validator,
        &output_store,
        &hooks,
        GadgetOutputLimitConfig::default(),
        128_000,
        GadgetExecutionMode::Sequential,
        CancellationToken::new(),
        None,
    );

    let outcome = scheduler.execute(vec![call("delete_file", "gc_1", &[])]).await;
    assert_eq!(outcome.results.len(), 1);
    assert!(outcome.results[0].is_error());
    assert!(outcome.results[0].observed_text().contains("skipped"));
}

/// A before-execution controller that clamps an oversized parameter.
#[tokio::test]
async fn test_before_execution_controller_replaces_parameters() {
    let seen = Arc::new(Mutex::new(None));
    let seen_clone = Arc::clone(&seen);

    let calculate = GadgetDescriptor::new(
        "calculate",
        "double a value",
        json!({"type": "object", "properties": {"value": {"type": "number"}}}),
        move |args| {
            let seen = Arc::clone(&seen_clone);
            async move {
                let value = args["value"].as_f64().unwrap_or(0.0);
                *seen.lock().unwrap() = Some(value);
                Ok(GadgetOutcome::result(json!({"result": value * 2.0})))
            }
        },
    );

    let hooks = Hooks::new().before_gadget_execution_controller(|event| async move {
        if event.gadget_name == "calculate" {
            if event.parameters.get("value").and_then(|v| v.as_f64()).unwrap_or(0.0) > 100.0 {
                return ControllerAction::Replace(json!({"value": 100.0}));
            }
        }
        ControllerAction::Proceed
    });

    let registry = GadgetRegistry::new(&[Arc::new(calculate)]);
    let validator = SchemaValidator;
    let output_store = OutputStore::new();
    let scheduler = GadgetScheduler::new(
        &registry,
        &validator,
        &output_store,
        &hooks,
        GadgetOutputLimitConfig::default(),
        128_000,
        GadgetExecutionMode::Sequential,
        CancellationToken::new(),
        None,
    );

    let mut oversized = call("calculate", "gc_1", &[]);
    oversized.parameters = json!({"value": 500.0});

    let outcome = scheduler.execute(vec![oversized]).await;
    assert!(!outcome.results[0].is_error());
    assert_eq!(*seen.lock().unwrap(), Some(100.0));
}

/// A gadget-result interceptor that redacts sensitive output.
#[tokio::test]
async fn test_gadget_result_interceptor_redacts_output() {
    let get_data = GadgetDescriptor::new(
        "get_data",
        "fetch some data",
        json!({"type": "object"}),
        |_args| async move { Ok(GadgetOutcome::result(json!({"data": "sensitive_information"}))) },
    );

    let hooks = Hooks::new().gadget_result_interceptor(|mut result| async move {
        if result.observed_text().contains("sensitive_information") {
            result.result = Some(r#"{"data":"[REDACTED]"}"#.to_string());
        }
        result
    });

    let registry = GadgetRegistry::new(&[Arc::new(get_data)]);
    let validator = SchemaValidator;
    let output_store = OutputStore::new();
    let scheduler = GadgetScheduler::new(
        &registry,
        &validator,
        &output_store,
        &hooks,
        GadgetOutputLimitConfig::default(),
        128_000,
        GadgetExecutionMode::Sequential,
        CancellationToken::new(),
        None,
    );

    let outcome = scheduler.execute(vec![call("get_data", "gc_1", &[])]).await;
    assert!(outcome.results[0].observed_text().contains("[REDACTED]"));
    assert!(!outcome.results[0].observed_text().contains("sensitive_information"));
}

/// Observers fire for every gadget in registration order, without
/// affecting the result.
#[tokio::test]
async fn test_observers_log_every_gadget_start() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_clone = Arc::clone(&log);

    let noop = |_args: serde_json::Value| async move { Ok(GadgetOutcome::result(json!({"ok": true}))) };
    let op_a = GadgetDescriptor::new("op_a", "operation a", json!({"type": "object"}), noop);
    let op_b = GadgetDescriptor::new("op_b", "operation b", json!({"type": "object"}), noop);

    let hooks = Hooks::new().on_gadget_start(move |event| {
        let log = Arc::clone(&log_clone);
        async move {
            log.lock().unwrap().push(event.gadget_name);
        }
    });

    let registry = GadgetRegistry::new(&[Arc::new(op_a), Arc::new(op_b)]);
    let validator = SchemaValidator;
    let output_store = OutputStore::new();
    let scheduler = GadgetScheduler::new(
        &registry,
        &validator,
        &output_store,
        &hooks,
        GadgetOutputLimitConfig::default(),
        128_000,
        GadgetExecutionMode::Sequential,
        CancellationToken::new(),
        None,
    );

    let outcome = scheduler
        .execute(vec![call("op_a", "gc_1", &[]), call("op_b", "gc_2", &[])])
        .await;

    assert_eq!(outcome.results.len(), 2);
    let seen = log.lock().unwrap().clone();
    assert_eq!(seen, vec!["op_a", "op_b"]);
}

/// The first controller to return a non-`Proceed` action wins; later
/// controllers in the chain don't get a say.
#[tokio::test]
async fn test_first_controller_to_act_wins() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = Arc::clone(&calls);

    let test_op = GadgetDescriptor::new(
        "test_op",
        "test operation",
        json!({"type": "object"}),
        |_args| async move { Ok(GadgetOutcome::result(json!({"result": 42}))) },
    );

    let hooks = Hooks::new()
        .before_gadget_execution_controller(|_event| async move { ControllerAction::Skip })
        .before_gadget_execution_controller(move |_event| {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                ControllerAction::Replace(json!({}))
            }
        });

    let registry = GadgetRegistry::new(&[Arc::new(test_op)]);
    let validator = SchemaValidator;
    let output_store = OutputStore::new();
    let scheduler = GadgetScheduler::new(
        &registry,
        &validator,
        &output_store,
        &hooks,
        GadgetOutputLimitConfig::default(),
        128_000,
        GadgetExecutionMode::Sequential,
        CancellationToken::new(),
        None,
    );

    let outcome = scheduler.execute(vec![call("test_op", "gc_1", &[])]).await;
    assert!(outcome.results[0].is_error());
    assert_eq!(calls.load(Ordering::SeqCst), 0, "second controller must not run");
}
