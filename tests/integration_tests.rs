//! Integration tests for the Gadget Agent Runtime
//!
//! These tests verify that different modules work together correctly,
//! without touching the network — everything exercised here runs locally
//! (gadget registration, option building, conversation state).

use gadget_agent::{AgentOptions, ContentBlock, GadgetDescriptor, GadgetOutcome, Message, MessageRole, TextBlock};
use serde_json::json;

#[test]
fn test_agent_options_with_gadgets() {
    let calculator = GadgetDescriptor::new(
        "add",
        "Add two numbers",
        json!({
            "type": "object",
            "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
        }),
        |args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(GadgetOutcome::result(json!({"result": a + b})))
        },
    );

    let options = AgentOptions::builder()
        .system_prompt("You are a helpful assistant")
        .model("qwen2.5-32b-instruct")
        .base_url("http://localhost:1234/v1")
        .gadget(calculator)
        .build()
        .unwrap();

    assert_eq!(options.gadgets().len(), 1);
    assert_eq!(options.gadgets()[0].name(), "add");
    assert_eq!(options.model().as_str(), "qwen2.5-32b-instruct");
}

#[test]
fn test_agent_options_with_multiple_gadgets() {
    let noop = |_args: serde_json::Value| async move { Ok(GadgetOutcome::result(json!({}))) };

    let search = GadgetDescriptor::new("Search", "search the web", json!({"type": "object"}), noop);
    let read_file = GadgetDescriptor::new("ReadFile", "read a file", json!({"type": "object"}), noop);

    let options = AgentOptions::builder()
        .model("qwen2.5-32b-instruct")
        .base_url("http://localhost:1234/v1")
        .gadgets(vec![search, read_file])
        .build()
        .unwrap();

    assert_eq!(options.gadgets().len(), 2);
    assert!(options.gadgets().iter().any(|g| g.name() == "Search"));
    assert!(options.gadgets().iter().any(|g| g.name() == "ReadFile"));
}

#[test]
fn test_options_default_values_are_sane() {
    let options = AgentOptions::builder()
        .model("gpt-oss-20b")
        .base_url("http://localhost:11434/v1")
        .build()
        .unwrap();

    assert_eq!(options.temperature().value(), 0.7);
    assert_eq!(options.max_tokens(), Some(4096));
    assert_eq!(options.timeout(), 120);
    assert_eq!(options.context_window(), 128_000);
    assert_eq!(options.max_iterations(), 10);
    assert!(options.budget().is_none());
}

#[test]
fn test_message_text_concatenates_text_blocks_only() {
    let msg = Message::user_with_blocks(vec![
        ContentBlock::Text(TextBlock::new("hello ")),
        ContentBlock::Text(TextBlock::new("world")),
    ]);
    assert_eq!(msg.text(), "hello world");
    assert_eq!(msg.role, MessageRole::User);
}

#[test]
fn test_system_and_assistant_message_constructors() {
    let system = Message::system("You are a helpful assistant");
    assert_eq!(system.role, MessageRole::System);
    assert_eq!(system.text(), "You are a helpful assistant");

    let assistant = Message::assistant("!!!GADGET_START:Search:gc_1\n!!!GADGET_END");
    assert_eq!(assistant.role, MessageRole::Assistant);
    assert!(assistant.text().contains("GADGET_START"));
}
