//! Simple query example
//!
//! Demonstrates the one-shot `query()` entry point: no conversation state,
//! no gadgets, just a single prompt in and the model's final text out.
//!
//! Requires a local OpenAI-compatible server (Ollama, LM Studio, etc.)
//! reachable at the configured `base_url`.

use gadget_agent::{AgentOptions, query};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = AgentOptions::builder()
        .system_prompt("You are a helpful assistant")
        .model("qwen3:8b")
        .base_url("http://localhost:11434/v1")
        .temperature(0.7)
        .max_tokens(500)
        .build()?;

    println!("Sending query to model...\n");

    let outcome = query("What's the capital of France? Please be brief.", &options).await?;

    println!("Response: {}", outcome.final_text);
    println!(
        "\n({} iteration(s), ${:.4} cost)",
        outcome.iterations, outcome.cost_usd
    );

    Ok(())
}
