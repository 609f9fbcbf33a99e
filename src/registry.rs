//! Gadget definitions and the registry the scheduler looks them up in.
//!
//! A gadget is the unit the model invokes through a sentinel block: a
//! name, a parameter schema used for validation diagnostics, and an async
//! handler. The special control signals `TerminateConversation` and
//! `RequestHumanInput` are not separate types — they're realized as
//! [`GadgetOutcome`] variants any handler may return, so the scheduler and
//! agent loop treat them as ordinary (if structurally special) results
//! rather than thrown exceptions.

use crate::Result;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A gadget's outcome, returned by its handler. `Result` is the common
/// case; `Terminate` and `RequestHumanInput` are the two control signals
/// the agent loop treats specially (§4.6); `Error` lets a handler report
/// a failure without using Rust's `Result::Err`, which is reserved for
/// infrastructure failures (timeout, cancellation, scheduler errors).
#[derive(Debug, Clone)]
pub enum GadgetOutcome {
    /// Ordinary successful result, serialized back to the model as text.
    Result(Value),
    /// The gadget wants to end the conversation after this iteration,
    /// optionally with a final message for the caller.
    Terminate { message: Option<String> },
    /// The gadget needs a human to supply information before the loop
    /// can continue.
    RequestHumanInput { prompt: String },
    /// The gadget ran but failed; `message` is surfaced to the model as
    /// the call's result text, same as a handler-level `Err` would be.
    Error { message: String },
}

impl GadgetOutcome {
    pub fn result(value: impl Into<Value>) -> Self {
        GadgetOutcome::Result(value.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        GadgetOutcome::Error {
            message: message.into(),
        }
    }

    pub fn terminate(message: Option<impl Into<String>>) -> Self {
        GadgetOutcome::Terminate {
            message: message.map(Into::into),
        }
    }

    pub fn request_human_input(prompt: impl Into<String>) -> Self {
        GadgetOutcome::RequestHumanInput {
            prompt: prompt.into(),
        }
    }

    pub fn is_control_signal(&self) -> bool {
        matches!(
            self,
            GadgetOutcome::Terminate { .. } | GadgetOutcome::RequestHumanInput { .. }
        )
    }
}

/// Type alias for a gadget's handler. Arc'd for cheap cloning into the
/// scheduler's per-call tasks; `Pin<Box<dyn Future>>` erases the concrete
/// async-fn type so handlers of different shapes can share one registry.
pub type GadgetHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<GadgetOutcome>> + Send>> + Send + Sync>;

/// A gadget's static definition: identity, parameter schema, the handler
/// that runs it, and whether it represents a subagent (§9: carried as a
/// flag rather than a distinct type, since the core doesn't prescribe
/// subagent hook inheritance — see DESIGN.md Open Question 3).
#[derive(Clone)]
pub struct GadgetDescriptor {
    name: String,
    description: String,
    parameter_schema: Value,
    handler: GadgetHandler,
    is_subagent: bool,
    timeout_ms: Option<u64>,
}

impl GadgetDescriptor {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameter_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GadgetOutcome>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema: normalize_schema(parameter_schema),
            handler: Arc::new(move |args| Box::pin(handler(args))),
            is_subagent: false,
            timeout_ms: None,
        }
    }

    pub fn as_subagent(mut self) -> Self {
        self.is_subagent = true;
        self
    }

    /// Per-call timeout enforced by the scheduler (§4.7). Unset means no
    /// timeout beyond the run's overall cancellation.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    pub fn is_subagent(&self) -> bool {
        self.is_subagent
    }

    /// Invoke the handler. The scheduler is responsible for timeouts and
    /// cancellation races; this just awaits the future.
    pub async fn execute(&self, arguments: Value) -> Result<GadgetOutcome> {
        (self.handler)(arguments).await
    }
}

impl std::fmt::Debug for GadgetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GadgetDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameter_schema", &self.parameter_schema)
            .field("is_subagent", &self.is_subagent)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Accepts the same three schema shapes the teacher's tool schema
/// conversion did: simple type notation, extended per-property schema,
/// or a full JSON Schema passed through unchanged.
fn normalize_schema(schema: Value) -> Value {
    if let Some(obj) = schema.as_object() {
        if obj.contains_key("type") && obj.contains_key("properties") {
            return schema;
        }

        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for (param_name, param_type) in obj {
            if let Some(type_str) = param_type.as_str() {
                properties.insert(param_name.clone(), simple_type_to_schema(type_str));
                required.push(param_name.clone());
            } else if param_type.is_object() {
                let mut prop = param_type.clone();
                let prop_obj = prop
                    .as_object_mut()
                    .expect("checked is_object above");

                let is_optional = prop_obj
                    .remove("optional")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let is_required = prop_obj.remove("required").and_then(|v| v.as_bool());
                let has_default = prop_obj.contains_key("default");

                properties.insert(param_name.clone(), prop);

                if is_required == Some(true) {
                    required.push(param_name.clone());
                } else if is_optional || is_required == Some(false) || has_default {
                    // stays optional
                } else {
                    required.push(param_name.clone());
                }
            }
        }

        return serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        });
    }

    serde_json::json!({ "type": "object", "properties": {}, "required": [] })
}

fn simple_type_to_schema(type_str: &str) -> Value {
    let json_type = match type_str {
        "string" | "str" => "string",
        "integer" | "int" | "i32" | "i64" | "u32" | "u64" => "integer",
        "number" | "float" | "f32" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" | "vec" => "array",
        "object" | "dict" | "map" => "object",
        _ => "string",
    };
    serde_json::json!({ "type": json_type })
}

/// One validation failure against a gadget's parameter schema, formatted
/// as a dot-path diagnostic (§4.2): e.g. `params.location: expected
/// string, got number`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationDiagnostic {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validates a gadget call's assembled parameters against its schema
/// before execution. The default implementation checks required
/// properties are present and, where a `type` is declared, that the
/// value's JSON type matches.
pub trait Validator: Send + Sync {
    fn validate(&self, schema: &Value, parameters: &Value) -> Vec<ValidationDiagnostic>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaValidator;

impl Validator for SchemaValidator {
    fn validate(&self, schema: &Value, parameters: &Value) -> Vec<ValidationDiagnostic> {
        let mut diagnostics = Vec::new();

        let Some(schema_obj) = schema.as_object() else {
            return diagnostics;
        };

        let required = schema_obj
            .get("required")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
            .unwrap_or_default();

        let properties = schema_obj.get("properties").and_then(|v| v.as_object());

        let params_obj = parameters.as_object();

        for name in &required {
            let present = params_obj.map(|p| p.contains_key(*name)).unwrap_or(false);
            if !present {
                diagnostics.push(ValidationDiagnostic {
                    path: format!("params.{}", name),
                    message: "required parameter is missing".to_string(),
                });
            }
        }

        if let (Some(properties), Some(params_obj)) = (properties, params_obj) {
            for (name, value) in params_obj {
                let Some(prop_schema) = properties.get(name) else {
                    continue;
                };
                let Some(declared_type) = prop_schema.get("type").and_then(|v| v.as_str()) else {
                    continue;
                };
                if !matches_json_type(declared_type, value) {
                    diagnostics.push(ValidationDiagnostic {
                        path: format!("params.{}", name),
                        message: format!(
                            "expected {}, got {}",
                            declared_type,
                            json_type_name(value)
                        ),
                    });
                }
            }
        }

        diagnostics
    }
}

fn matches_json_type(declared: &str, value: &Value) -> bool {
    match declared {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "string",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::Null => "null",
    }
}

/// Name-keyed lookup table of registered gadgets, built once at
/// `Agent` construction from `AgentOptions::gadgets()`.
#[derive(Clone, Default)]
pub struct GadgetRegistry {
    gadgets: std::collections::HashMap<String, Arc<GadgetDescriptor>>,
}

impl GadgetRegistry {
    pub fn new(gadgets: &[Arc<GadgetDescriptor>]) -> Self {
        let mut map = std::collections::HashMap::with_capacity(gadgets.len());
        for gadget in gadgets {
            map.insert(gadget.name().to_string(), gadget.clone());
        }
        Self { gadgets: map }
    }

    pub fn get(&self, name: &str) -> Option<Arc<GadgetDescriptor>> {
        self.gadgets.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.gadgets.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<GadgetDescriptor>> {
        self.gadgets.values()
    }

    pub fn len(&self) -> usize {
        self.gadgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gadgets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_gadget_descriptor_execute() {
        let gadget = GadgetDescriptor::new(
            "Add",
            "Add two numbers",
            json!({"a": "number", "b": "number"}),
            |args| async move {
                let a = args["a"].as_f64().unwrap_or(0.0);
                let b = args["b"].as_f64().unwrap_or(0.0);
                Ok(GadgetOutcome::result(json!(a + b)))
            },
        );

        let outcome = gadget.execute(json!({"a": 2, "b": 3})).await.unwrap();
        match outcome {
            GadgetOutcome::Result(v) => assert_eq!(v, json!(5.0)),
            other => panic!("expected Result, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_simple_schema() {
        let schema = normalize_schema(json!({"location": "string"}));
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["location"]["type"], "string");
        assert_eq!(schema["required"], json!(["location"]));
    }

    #[test]
    fn test_registry_lookup() {
        let gadget = Arc::new(GadgetDescriptor::new(
            "Noop",
            "Does nothing",
            json!({}),
            |_| async move { Ok(GadgetOutcome::result(json!(null))) },
        ));
        let registry = GadgetRegistry::new(&[gadget]);
        assert!(registry.contains("Noop"));
        assert!(registry.get("Noop").is_some());
        assert!(registry.get("Missing").is_none());
    }

    #[test]
    fn test_schema_validator_missing_required() {
        let schema = json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"],
        });
        let diagnostics = SchemaValidator.validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].path, "params.query");
    }

    #[test]
    fn test_schema_validator_type_mismatch() {
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
    fn test_schema_validator_passes() {
        let schema = json!({
            "type": "object",
            "properties": {"count": {"type": "integer"}},
            "required": ["count"],
        });
        let diagnostics = SchemaValidator.validate(&schema, &json!({"count": 5}));
        assert!(diagnostics.is_empty());
    }
}
