//! Calculator gadgets example
//!
//! Demonstrates registering gadgets with the `Agent` and letting it drive
//! the full loop: the model emits `!!!GADGET_START:...!!!GADGET_END` blocks,
//! the scheduler runs the named gadgets (respecting any declared
//! dependencies), and results go back to the model on the next iteration.
//!
//! Requires a local OpenAI-compatible server with a model that follows the
//! sentinel instructions embedded in the system prompt (see
//! `conversation::render_gadget_instructions`).

use gadget_agent::{Agent, AgentOptions, GadgetDescriptor, GadgetOutcome};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let add = GadgetDescriptor::new(
        "add",
        "Add two numbers",
        json!({"a": "number", "b": "number"}),
        |args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(GadgetOutcome::result(json!({ "result": a + b })))
        },
    );

    let multiply = GadgetDescriptor::new(
        "multiply",
        "Multiply two numbers",
        json!({"a": "number", "b": "number"}),
        |args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(GadgetOutcome::result(json!({ "result": a * b })))
        },
    );

    let divide = GadgetDescriptor::new(
        "divide",
        "Divide two numbers",
        json!({"a": "number", "b": "number"}),
        |args| async move {
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            if b == 0.0 {
                return Ok(GadgetOutcome::error("division by zero"));
            }
            Ok(GadgetOutcome::result(json!({ "result": a / b })))
        },
    );

    let options = AgentOptions::builder()
        .system_prompt(
            "You are a helpful calculator assistant. Use the available \
             gadgets to perform calculations and show your work.",
        )
        .model("qwen3:8b")
        .base_url("http://localhost:11434/v1")
        .temperature(0.1)
        .gadgets(vec![add, multiply, divide])
        .max_iterations(5)
        .build()?;

    let mut agent = Agent::new(options)?;

    for prompt in [
        "What is 25 plus 17?",
        "Now multiply that by 3, then divide by 2",
    ] {
        println!("User: {prompt}");
        let outcome = agent.run(prompt).await?;
        println!("Assistant: {}\n", outcome.final_text);
    }

    println!("Total cost: ${:.4}", agent.cost_so_far());

    Ok(())
}
