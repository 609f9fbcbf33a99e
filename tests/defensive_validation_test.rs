//! Validation tests: `AgentOptions::build()` rejects malformed
//! configuration, and `SchemaValidator` catches malformed gadget
//! parameters before a handler ever runs.

use gadget_agent::{
    AgentOptions, GadgetDescriptor, ModelPricing, SchemaValidator, Validator,
};
use serde_json::json;

#[test]
fn test_build_requires_model() {
    let result = AgentOptions::builder().base_url("http://localhost:1234/v1").build();
    assert!(result.is_err());
}

#[test]
fn test_build_requires_base_url() {
    let result = AgentOptions::builder().model("qwen2.5-32b").build();
    assert!(result.is_err());
}

#[test]
fn test_build_rejects_empty_model_name() {
    let result = AgentOptions::builder()
        .model("")
        .base_url("http://localhost:1234/v1")
        .build();
    assert!(result.is_err());
}

#[test]
fn test_build_rejects_base_url_without_scheme() {
    let result = AgentOptions::builder()
        .model("qwen2.5-32b")
        .base_url("localhost:1234/v1")
        .build();
    assert!(result.is_err());
}

#[test]
fn test_build_rejects_out_of_range_temperature() {
    let result = AgentOptions::builder()
        .model("qwen2.5-32b")
        .base_url("http://localhost:1234/v1")
        .temperature(3.0)
        .build();
    assert!(result.is_err());
}

#[test]
fn test_build_rejects_zero_max_tokens() {
    let result = AgentOptions::builder()
        .model("qwen2.5-32b")
        .base_url("http://localhost:1234/v1")
        .max_tokens(0)
        .build();
    assert!(result.is_err());
}

#[test]
fn test_build_rejects_budget_without_pricing() {
    let result = AgentOptions::builder()
        .model("qwen2.5-32b")
        .base_url("http://localhost:1234/v1")
        .budget(5.0)
        .build();
    assert!(result.is_err());
}

#[test]
fn test_build_accepts_budget_with_pricing() {
    let result = AgentOptions::builder()
        .model("qwen2.5-32b")
        .base_url("http://localhost:1234/v1")
        .budget(5.0)
        .model_pricing(ModelPricing {
            input_per_million: 0.15,
            output_per_million: 0.60,
        })
        .build();
    assert!(result.is_ok());
}

#[test]
fn test_schema_validator_flags_missing_required_parameter() {
    let schema = json!({
        "type": "object",
        "properties": {"path": {"type": "string"}},
        "required": ["path"],
    });
    let diagnostics = SchemaValidator.validate(&schema, &json!({}));
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].path, "params.path");
}

#[test]
fn test_schema_validator_flags_type_mismatch() {
    let schema = json!({
        "type": "object",
        "properties": {"count": {"type": "integer"}},
        "required": ["count"],
    });
    let diagnostics = SchemaValidator.validate(&schema, &json!({"count": "five"}));
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].message.contains("expected integer"));
}

#[test]
fn test_schema_validator_passes_well_formed_parameters() {
    let schema = json!({
        "type": "object",
        "properties": {"count": {"type": "integer"}},
        "required": ["count"],
    });
    let diagnostics = SchemaValidator.validate(&schema, &json!({"count": 3}));
    assert!(diagnostics.is_empty());
}

/// A gadget built with the simple `{"name": "type"}` shorthand schema
/// normalizes to a full JSON Schema with every field marked required.
#[test]
fn test_gadget_descriptor_normalizes_shorthand_schema() {
    let noop = |_args: serde_json::Value| async move { Ok(gadget_agent::GadgetOutcome::result(json!({}))) };
    let gadget = GadgetDescriptor::new("Search", "search the web", json!({"query": "string"}), noop);

    let schema = gadget.parameter_schema();
    assert_eq!(schema["type"], "object");
    assert_eq!(schema["properties"]["query"]["type"], "string");
    assert_eq!(schema["required"], json!(["query"]));
}
