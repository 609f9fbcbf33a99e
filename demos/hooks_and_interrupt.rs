//! Hooks and interrupt example
//!
//! Demonstrates the Hook Bus observing gadget execution and LLM retries,
//! plus using `Agent::cancellation_token()` to cancel a run from another
//! task while it's in flight.
//!
//! Requires a local OpenAI-compatible server.

use gadget_agent::{Agent, AgentOptions, GadgetDescriptor, GadgetOutcome, Hooks};
use serde_json::json;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let slow_lookup = GadgetDescriptor::new(
        "lookup",
        "Look something up (simulated latency)",
        json!({"query": "string"}),
        |args| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(GadgetOutcome::result(json!({ "answer": format!("result for {}", args["query"]) })))
        },
    );

    let hooks = Hooks::new()
        .on_gadget_start(|event| async move {
            println!("  -> gadget start: {} ({})", event.gadget_name, event.invocation_id);
        })
        .on_gadget_complete(|event| async move {
            println!("  <- gadget complete: {}", event.result.gadget_name);
        })
        .on_retry_attempt(|event| async move {
            println!(
                "  retrying after {}: attempt {}/{}, waiting {}ms",
                event.error, event.attempt, event.max_attempts, event.delay_ms
            );
        });

    let options = AgentOptions::builder()
        .system_prompt("You are a helpful assistant with access to a lookup gadget.")
        .model("qwen3:8b")
        .base_url("http://localhost:11434/v1")
        .gadget(slow_lookup)
        .hooks(hooks)
        .build()?;

    let mut agent = Agent::new(options)?;

    // Cancel the run from a separate task after a short delay, simulating a
    // user-initiated interrupt.
    let cancel_token = agent.cancellation_token();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel_token.cancel();
    });

    let outcome = agent.run("Look up the weather in Paris").await?;

    if outcome.cancelled {
        println!("Run was cancelled before completion.");
    } else {
        println!("Final: {}", outcome.final_text);
    }

    canceller.abort();
    Ok(())
}
