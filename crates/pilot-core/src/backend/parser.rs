//! Stream-JSON line parser.
//!
//! Parses one line of a backend subprocess's stdout into a
//! [`BackendEvent`]. Never fails: a non-JSON line becomes a `Text` event
//! carrying the raw line verbatim, and valid JSON with an unrecognised
//! `type` becomes a `Progress` event, per the "dynamic JSON parsing
//! tolerance" design note -- the wire format is not versioned, so callers
//! must not hard-fail on an unexpected shape.

use serde_json::Value;

use super::types::BackendEvent;

pub fn parse_line(line: &str) -> BackendEvent {
    let raw = line.to_string();

    let Ok(v) = serde_json::from_str::<Value>(line) else {
        return BackendEvent::Text {
            content: raw.clone(),
            raw,
        };
    };

    let event_type = v.get("type").and_then(Value::as_str).unwrap_or("");

    match event_type {
        "system" if v.get("subtype").and_then(Value::as_str) == Some("init") => {
            let session_id = v
                .get("session_id")
                .and_then(Value::as_str)
                .map(str::to_owned);
            BackendEvent::Init { session_id, raw }
        }

        "assistant" => parse_assistant(&v, raw),

        "user" => parse_user(&v, raw),

        "result" => parse_result(&v, raw),

        "error" => {
            let message = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .or_else(|| v.get("message").and_then(Value::as_str))
                .unwrap_or("unknown error")
                .to_string();
            BackendEvent::Error { message, raw }
        }

        _ => BackendEvent::Progress { raw },
    }
}

fn parse_assistant(v: &Value, raw: String) -> BackendEvent {
    let Some(message) = v.get("message") else {
        return BackendEvent::Progress { raw };
    };

    if let Some(blocks) = message.get("content").and_then(Value::as_array) {
        for block in blocks {
            let block_type = block.get("type").and_then(Value::as_str).unwrap_or("");
            match block_type {
                "text" => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        return BackendEvent::Text {
                            content: text.to_string(),
                            raw,
                        };
                    }
                }
                "tool_use" => {
                    let name = block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string();
                    let input = block.get("input").cloned().unwrap_or(Value::Null);
                    return BackendEvent::ToolUse { name, input, raw };
                }
                _ => {}
            }
        }
    }

    BackendEvent::Progress { raw }
}

fn parse_user(v: &Value, raw: String) -> BackendEvent {
    let Some(result) = v.get("tool_use_result") else {
        return BackendEvent::Progress { raw };
    };
    let output = result.get("content").cloned().unwrap_or(Value::Null);
    let is_error = result
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    BackendEvent::ToolResult {
        output,
        is_error,
        raw,
    }
}

fn parse_result(v: &Value, raw: String) -> BackendEvent {
    let output = v
        .get("result")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let is_error = v.get("is_error").and_then(Value::as_bool).unwrap_or(false);
    let model = v
        .get("model")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let (tokens_in, tokens_out) = v
        .get("usage")
        .map(|usage| {
            let input = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
            let output = usage
                .get("output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            (input, output)
        })
        .unwrap_or((0, 0));

    BackendEvent::Result {
        output,
        tokens_in,
        tokens_out,
        model,
        is_error,
        raw,
    }
}
