//! Tool validation & wrapping (spec §4.3): parameter coercion against a
//! JSON schema, the approval-gating decorator, and empty-name filtering.
//!
//! Tools are a mapping from name to a `{builtin|mcp}` variant sharing
//! one execute contract; wrapping is a decorator layered over that
//! contract rather than a branch inside it.

use serde_json::Value;

use relaycore_domain::tool::ToolCall;

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub corrected_args: Option<Value>,
    pub error: Option<String>,
}

impl ValidationOutcome {
    fn ok(args: Value) -> Self {
        Self {
            valid: true,
            corrected_args: Some(args),
            error: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            corrected_args: None,
            error: Some(message.into()),
        }
    }
}

/// Validates (and coerces) tool-call arguments against a JSON-schema
/// `{type: "object", properties: {...}, required: [...]}` shape.
pub fn validate_tool_parameters(args: &Value, schema: &Value, tool_name: &str) -> ValidationOutcome {
    let Some(args_obj) = args.as_object() else {
        return ValidationOutcome::fail(format!("tool '{tool_name}' expects an object of arguments"));
    };

    let properties = schema.get("properties").and_then(Value::as_object);
    let required: Vec<&str> = schema.get("required").and_then(Value::as_array).map(|a| a.iter().filter_map(Value::as_str).collect()).unwrap_or_default();

    let mut corrected = serde_json::Map::new();

    for (key, value) in args_obj {
        if value.is_null() {
            continue;
        }
        let expected_type = properties.and_then(|p| p.get(key)).and_then(|schema| schema.get("type")).and_then(Value::as_str);

        let coerced = match expected_type {
            Some("array") => coerce_to_array(value),
            Some("number") | Some("integer") => coerce_to_number(value),
            _ => value.clone(),
        };
        corrected.insert(key.clone(), coerced);
    }

    for key in &required {
        match corrected.get(*key) {
            None => return ValidationOutcome::fail(format!("tool '{tool_name}' is missing required parameter '{key}'")),
            Some(Value::String(s)) if s.is_empty() => return ValidationOutcome::fail(format!("tool '{tool_name}' requires a non-empty '{key}'")),
            Some(Value::Array(a)) if a.is_empty() => return ValidationOutcome::fail(format!("tool '{tool_name}' requires a non-empty '{key}'")),
            _ => {}
        }
    }

    ValidationOutcome::ok(Value::Object(corrected))
}

fn coerce_to_array(value: &Value) -> Value {
    match value {
        Value::String(s) if !s.is_empty() => Value::Array(vec![Value::String(s.clone())]),
        other => other.clone(),
    }
}

fn coerce_to_number(value: &Value) -> Value {
    match value {
        Value::String(s) => {
            if let Ok(i) = s.parse::<i64>() {
                serde_json::json!(i)
            } else if let Ok(f) = s.parse::<f64>() {
                serde_json::json!(f)
            } else {
                value.clone()
            }
        }
        other => other.clone(),
    }
}

/// Approval policy carried alongside a tool definition. `approval.required`
/// in spec §4.3 routes execution through a synthetic HITL pause instead
/// of running the tool directly.
#[derive(Debug, Clone, Default)]
pub struct ApprovalPolicy {
    pub required: bool,
}

pub const APPROVAL_TOOL_CALL_PREFIX: &str = "approval_";
pub const APPROVAL_REDIRECT_NAME: &str = "client.requestApproval";

/// The outcome of wrapping a tool call through validation and approval
/// gating, before the dispatch loop (C8) decides what to do next.
pub enum WrappedOutcome {
    /// Safe to execute: arguments were valid (possibly coerced).
    Execute { args: Value },
    /// Arguments failed validation; surface this as the tool result.
    ValidationFailed { error: String },
    /// The tool requires approval: synthesize a `client.requestApproval`
    /// redirect instead of running it. The dispatch loop treats this as
    /// `_stopProcessing=true`.
    RequiresApproval { original_call: ToolCall, args: Value },
}

/// `wrapToolWithValidation` (spec §4.3): validates first, then either
/// clears the call for execution or redirects it into an approval gate.
pub fn wrap_tool_call(call: &ToolCall, schema: &Value, policy: &ApprovalPolicy) -> WrappedOutcome {
    let outcome = validate_tool_parameters(&call.parsed_arguments(), schema, &call.function.name);
    if !outcome.valid {
        return WrappedOutcome::ValidationFailed {
            error: outcome.error.unwrap_or_else(|| "validation failed".to_string()),
        };
    }
    let args = outcome.corrected_args.unwrap_or(Value::Null);
    if policy.required {
        WrappedOutcome::RequiresApproval {
            original_call: call.clone(),
            args,
        }
    } else {
        WrappedOutcome::Execute { args }
    }
}

/// `filterAndHandleEmptyNamedFunctionCalls` (spec §4.3): splits calls
/// into those with a usable function name and those that are malformed,
/// returning tool-result content the dispatch loop appends for the
/// invalid half.
pub fn filter_empty_named_calls(calls: Vec<ToolCall>) -> (Vec<ToolCall>, Vec<(ToolCall, String)>) {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for call in calls {
        if call.function.name.trim().is_empty() {
            let message = format!("Error: malformed tool call '{}' has no function name", call.id);
            invalid.push((call, message));
        } else {
            valid.push(call);
        }
    }
    (valid, invalid)
}
