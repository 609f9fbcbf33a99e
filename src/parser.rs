//! The Block Parser: an incremental, line-based state machine that turns
//! a token stream of assistant text into plain `text` events and
//! structured gadget-call events (§4.1).
//!
//! Grammar:
//!
//! ```text
//! !!!GADGET_START:<Name>:<id>[:<dep1>,<dep2>,...]\n
//! (!!!ARG:<pointer>\n<value lines>\n)*
//! !!!GADGET_END\n
//! ```
//!
//! The parser never reorders text already emitted, and buffers at most a
//! partial line's worth of text across `feed()` calls so a sentinel split
//! across two stream chunks is still recognized correctly.

use crate::types::SentinelConfig;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// One structural event out of the parser. Mirrors §9's "tagged union
/// instead of inheritance" design note.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Plain assistant text outside any gadget block.
    Text(String),
    GadgetCallBegin {
        gadget_name: String,
        invocation_id: String,
        dependencies: Vec<String>,
    },
    /// One `!!!ARG:` region's pointer and raw value text.
    GadgetArg {
        invocation_id: String,
        pointer: String,
        raw_value: String,
        multiline: bool,
    },
    GadgetCallEnd {
        invocation_id: String,
    },
    /// A structural failure associated with one call (duplicate
    /// invocation id, duplicate pointer, unknown sentinel, malformed
    /// header, missing end). Surrounding text is preserved.
    Error {
        invocation_id: Option<String>,
        message: String,
    },
}

#[derive(Debug)]
struct OpenCall {
    gadget_name: String,
    invocation_id: String,
    dependencies: Vec<String>,
    seen_pointers: HashSet<String>,
    current_arg: Option<(String, String)>, // (pointer, accumulated raw text)
    /// Set once this call hits a structural error; further ARG lines are
    /// absorbed silently and a single `Error` event is emitted at `END`.
    failed: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum State {
    Outside,
    InCall,
}

/// Incremental parser. One instance is created per assistant message
/// (per iteration); construct with [`BlockParser::new`] and call
/// [`BlockParser::feed`] as chunks arrive, then [`BlockParser::finish`]
/// once the stream ends.
pub struct BlockParser {
    sentinel: SentinelConfig,
    state: State,
    text_buffer: String,
    line_buffer: String,
    current_call: Option<OpenCall>,
    seen_invocation_ids: HashSet<String>,
}

impl BlockParser {
    pub fn new(sentinel: SentinelConfig) -> Self {
        Self {
            sentinel,
            state: State::Outside,
            text_buffer: String::new(),
            line_buffer: String::new(),
            current_call: None,
            seen_invocation_ids: HashSet::new(),
        }
    }

    /// Feed the next chunk of raw assistant text, returning the events it
    /// produced. Any trailing partial line is held back until the next
    /// `feed` or `finish` call.
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.line_buffer.push_str(chunk);

        while let Some(newline_pos) = self.line_buffer.find('\n') {
            let line: String = self.line_buffer.drain(..=newline_pos).collect();
            let line = line.strip_suffix('\n').unwrap_or(&line).to_string();
            self.process_line(line, true, &mut events);
        }

        events
    }

    /// Flush any remaining buffered text/partial line at end of stream.
    /// A call left open at this point (missing `!!!GADGET_END`) yields a
    /// structural error. The remainder never carried a terminating
    /// newline (the `feed` loop above already drained every line that
    /// did), so it's processed as such — otherwise non-newline-terminated
    /// assistant output would gain a `\n` it never had (P5).
    pub fn finish(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if !self.line_buffer.is_empty() {
            let remainder = std::mem::take(&mut self.line_buffer);
            self.process_line(remainder, false, &mut events);
        }

        if !self.text_buffer.is_empty() {
            events.push(StreamEvent::Text(std::mem::take(&mut self.text_buffer)));
        }

        if let Some(call) = self.current_call.take() {
            events.push(StreamEvent::Error {
                invocation_id: Some(call.invocation_id),
                message: "missing !!!GADGET_END".to_string(),
            });
        }

        events
    }

    fn process_line(&mut self, line: String, had_newline: bool, events: &mut Vec<StreamEvent>) {
        match self.state {
            State::Outside => self.process_outside_line(line, had_newline, events),
            State::InCall => self.process_in_call_line(line, had_newline, events),
        }
    }

    fn process_outside_line(&mut self, line: String, had_newline: bool, events: &mut Vec<StreamEvent>) {
        if let Some(header) = line.strip_prefix(self.sentinel.start.as_str()) {
            if !self.text_buffer.is_empty() {
                events.push(StreamEvent::Text(std::mem::take(&mut self.text_buffer)));
            }
            self.begin_call(header, events);
            return;
        }

        self.text_buffer.push_str(&line);
        if had_newline {
            self.text_buffer.push('\n');
        }
    }

    fn begin_call(&mut self, header: &str, events: &mut Vec<StreamEvent>) {
        let parts: Vec<&str> = header.split(':').collect();
        if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
            events.push(StreamEvent::Error {
                invocation_id: None,
                message: format!("malformed gadget start header: {:?}", header),
            });
            return;
        }

        let gadget_name = parts[0].to_string();
        let invocation_id = parts[1].to_string();
        let dependencies: Vec<String> = match parts.get(2) {
            Some(raw) if !raw.is_empty() => raw.split(',').map(|s| s.to_string()).collect(),
            _ => Vec::new(),
        };

        let duplicate_id = self.seen_invocation_ids.contains(&invocation_id);
        if !duplicate_id {
            self.seen_invocation_ids.insert(invocation_id.clone());
        }

        self.state = State::InCall;
        self.current_call = Some(OpenCall {
            gadget_name: gadget_name.clone(),
            invocation_id: invocation_id.clone(),
            dependencies: dependencies.clone(),
            seen_pointers: HashSet::new(),
            current_arg: None,
            failed: if duplicate_id {
                Some(format!("duplicate invocation id: {}", invocation_id))
            } else {
                None
            },
        });

        if !duplicate_id {
            events.push(StreamEvent::GadgetCallBegin {
                gadget_name,
                invocation_id,
                dependencies,
            });
        }
    }

    fn process_in_call_line(&mut self, line: String, had_newline: bool, events: &mut Vec<StreamEvent>) {
        if line == self.sentinel.end {
            self.end_call(events);
            return;
        }

        if let Some(pointer) = line.strip_prefix(self.sentinel.arg.as_str()) {
            self.close_current_arg(events);
            self.open_arg(pointer.to_string());
            return;
        }

        if line.starts_with("!!!") {
            self.fail_current_call(format!("unknown sentinel: {}", line));
            return;
        }

        // Value-continuation line, or stray content before the first ARG
        // (no destination to accumulate into; dropped).
        let call = self.current_call.as_mut().expect("in InCall state");
        if let Some((_, buf)) = call.current_arg.as_mut() {
            buf.push_str(&line);
            if had_newline {
                buf.push('\n');
            }
        }
    }

    fn open_arg(&mut self, pointer: String) {
        let call = self.current_call.as_mut().expect("in InCall state");
        if call.failed.is_none() && call.seen_pointers.contains(&pointer) {
            call.failed = Some(format!("duplicate pointer: {}", pointer));
        }
        call.seen_pointers.insert(pointer.clone());
        call.current_arg = Some((pointer, String::new()));
    }

    fn close_current_arg(&mut self, events: &mut Vec<StreamEvent>) {
        let call = self.current_call.as_mut().expect("in InCall state");
        if let Some((pointer, raw_value)) = call.current_arg.take() {
            if call.failed.is_some() {
                return;
            }
            let raw_value = raw_value.strip_suffix('\n').unwrap_or(&raw_value).to_string();
            let multiline = raw_value.contains('\n');
            events.push(StreamEvent::GadgetArg {
                invocation_id: call.invocation_id.clone(),
                pointer,
                raw_value,
                multiline,
            });
        }
    }

    fn fail_current_call(&mut self, message: String) {
        let call = self.current_call.as_mut().expect("in InCall state");
        if call.failed.is_none() {
            call.failed = Some(message);
        }
    }

    fn end_call(&mut self, events: &mut Vec<StreamEvent>) {
        self.close_current_arg(events);
        let call = self.current_call.take().expect("in InCall state");
        if let Some(message) = call.failed {
            events.push(StreamEvent::Error {
                invocation_id: Some(call.invocation_id),
                message,
            });
        } else {
            events.push(StreamEvent::GadgetCallEnd {
                invocation_id: call.invocation_id,
            });
        }
        self.state = State::Outside;
    }
}

/// One parsed `(pointer, value)` pair ready for assembly into a
/// `parameters` JSON value.
#[derive(Debug, Clone)]
pub struct ParsedArg {
    pub pointer: String,
    pub raw_value: String,
    pub multiline: bool,
}

/// Assemble a call's `!!!ARG` pointer/value pairs into a single JSON
/// object, applying scalar coercion per §4.1. `schema` (when given) is
/// consulted to pick a coercion hint (`string|number|boolean`) for each
/// top-level field; without it, single-line scalars are auto-coerced
/// (`unknown` hint: booleans and strict numeric literals convert,
/// everything else stays a string). Multiline values are never coerced.
pub fn assemble_parameters(entries: &[ParsedArg], schema: Option<&Value>) -> Result<Value, Vec<String>> {
    let mut root = Value::Object(Map::new());
    let mut errors = Vec::new();

    for entry in entries {
        let segments: Vec<&str> = entry.pointer.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            errors.push(format!("invalid pointer: {}", entry.pointer));
            continue;
        }

        let hint = if entry.multiline {
            "string"
        } else {
            type_hint_for(schema, segments[0])
        };
        let leaf = coerce_scalar(&entry.raw_value, hint);

        if let Err(err) = insert_value(&mut root, &segments, leaf) {
            errors.push(format!("{}: {}", entry.pointer, err));
        }
    }

    if errors.is_empty() {
        Ok(root)
    } else {
        Err(errors)
    }
}

fn type_hint_for<'a>(schema: Option<&Value>, top_level_field: &str) -> &'a str {
    let Some(schema) = schema else { return "unknown" };
    let declared = schema
        .get("properties")
        .and_then(|p| p.get(top_level_field))
        .and_then(|p| p.get("type"))
        .and_then(|t| t.as_str());
    match declared {
        Some("string") => "string",
        Some("number") | Some("integer") => "number",
        Some("boolean") => "boolean",
        _ => "unknown",
    }
}

fn coerce_scalar(raw: &str, hint: &str) -> Value {
    match hint {
        "string" => Value::String(raw.to_string()),
        "number" => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        "boolean" => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        _ => {
            if raw == "true" {
                Value::Bool(true)
            } else if raw == "false" {
                Value::Bool(false)
            } else if let Ok(i) = raw.parse::<i64>() {
                Value::Number(i.into())
            } else if let Ok(f) = raw.parse::<f64>() {
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(raw.to_string()))
            } else {
                Value::String(raw.to_string())
            }
        }
    }
}

fn insert_value(current: &mut Value, segments: &[&str], leaf: Value) -> Result<(), String> {
    let seg = segments[0];
    if segments.len() == 1 {
        return set_member(current, seg, leaf);
    }

    let next_is_index = is_array_index(segments[1]);
    let child = get_or_create_child(current, seg, next_is_index)?;
    insert_value(child, &segments[1..], leaf)
}

fn is_array_index(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}

fn set_member(current: &mut Value, seg: &str, leaf: Value) -> Result<(), String> {
    if is_array_index(seg) {
        let index: usize = seg.parse().map_err(|_| "invalid array index".to_string())?;
        let arr = as_array_mut(current)?;
        if index > arr.len() {
            return Err(format!("array index gap at {}", index));
        }
        if index == arr.len() {
            arr.push(leaf);
        } else {
            arr[index] = leaf;
        }
        Ok(())
    } else {
        let obj = as_object_mut(current)?;
        obj.insert(seg.to_string(), leaf);
        Ok(())
    }
}

fn get_or_create_child<'a>(
    current: &'a mut Value,
    seg: &str,
    child_is_array: bool,
) -> Result<&'a mut Value, String> {
    if is_array_index(seg) {
        let index: usize = seg.parse().map_err(|_| "invalid array index".to_string())?;
        let arr = as_array_mut(current)?;
        if index > arr.len() {
            return Err(format!("array index gap at {}", index));
        }
        if index == arr.len() {
            arr.push(if child_is_array {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            });
        }
        Ok(&mut arr[index])
    } else {
        let obj = as_object_mut(current)?;
        if !obj.contains_key(seg) {
            obj.insert(
                seg.to_string(),
                if child_is_array {
                    Value::Array(Vec::new())
                } else {
                    Value::Object(Map::new())
                },
            );
        }
        Ok(obj.get_mut(seg).expect("just inserted or present"))
    }
}

fn as_array_mut(value: &mut Value) -> Result<&mut Vec<Value>, String> {
    if value.is_null() {
        *value = Value::Array(Vec::new());
    }
    value.as_array_mut().ok_or_else(|| "expected array at this path".to_string())
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    if value.is_null() {
        *value = Value::Object(Map::new());
    }
    value.as_object_mut().ok_or_else(|| "expected object at this path".to_string())
}
