//! Extraction of tool calls from free-form model output.
//!
//! Models announce tool calls in several incompatible ways. Each convention
//! has its own strategy; strategies run in order and the first one that
//! yields at least one call wins:
//!
//! 1. `<tool_call>{...}</tool_call>` tags
//! 2. a control-token marker (`<|python_tag|>`, `[TOOL_CALLS]`, ...) followed
//!    by an optional role label and one JSON object
//! 3. fenced code blocks holding a JSON object
//! 4. loose objects with `name` and `arguments` keys, in any order, anywhere
//!    in the text
//! 5. the whole text being a JSON array of calls
//!
//! No calls means the text is a final answer.

use std::sync::LazyLock;

use regex::Regex;

use crate::tools::tool::ToolCall;

type Strategy = fn(&str) -> Vec<ToolCall>;

const STRATEGIES: [(&str, Strategy); 5] = [
    ("tagged", parse_tagged),
    ("control_token", parse_control_token),
    ("fenced", parse_fenced),
    ("loose_object", parse_loose_objects),
    ("json_array", parse_json_array),
];

/// Control tokens that precede a raw JSON tool call.
const CONTROL_TOKENS: &[&str] = &[
    "<|python_tag|>",
    "[TOOL_CALLS]",
    "<|tool_call|>",
    "<|tool_calls|>",
    "<|im_start|>",
    "<|start|>",
];

static TAGGED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(tool_call|function_call)>(.*?)</(?:tool_call|function_call)>")
        .expect("tagged tool call regex is valid")
});

static FENCED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("fenced block regex is valid")
});

static ROLE_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:assistant|tool|function|model)?\b\s*").expect("role label regex is valid")
});

/// Extract every tool call from `text`.
pub fn parse_tool_calls(text: &str) -> Vec<ToolCall> {
    for (name, strategy) in STRATEGIES {
        let calls = strategy(text);
        if !calls.is_empty() {
            tracing::debug!(strategy = name, count = calls.len(), "Parsed tool calls");
            return calls;
        }
    }
    Vec::new()
}

/// Strategy 1: `<tool_call>` / `<function_call>` spans.
pub fn parse_tagged(text: &str) -> Vec<ToolCall> {
    let candidates = TAGGED_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(2))
        .filter_map(|body| serde_json::from_str(body.as_str().trim()).ok());
    collect_calls(candidates)
}

/// Strategy 2: control-token marker followed by one balanced JSON object.
pub fn parse_control_token(text: &str) -> Vec<ToolCall> {
    let mut candidates = Vec::new();

    for token in CONTROL_TOKENS {
        for (pos, _) in text.match_indices(token) {
            let after = &text[pos + token.len()..];
            let label_len = ROLE_LABEL_RE.find(after).map_or(0, |m| m.end());
            let rest = &after[label_len..];
            let Some(brace) = rest.find('{') else {
                continue;
            };
            let offset = pos + token.len() + label_len + brace;
            if let Some(object) = extract_balanced_object(text, offset)
                && let Ok(value) = serde_json::from_str::<serde_json::Value>(object)
            {
                candidates.push((offset, value));
            }
        }
    }

    candidates.sort_by_key(|(offset, _)| *offset);
    candidates.dedup_by_key(|(offset, _)| *offset);
    collect_calls(candidates.into_iter().map(|(_, value)| value))
}

/// Strategy 3: fenced code blocks, with or without a language tag. A block
/// may hold one call object or an array of them.
pub fn parse_fenced(text: &str) -> Vec<ToolCall> {
    let candidates = FENCED_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|body| serde_json::from_str::<serde_json::Value>(body.as_str().trim()).ok())
        .flat_map(|value| match value {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        });
    collect_calls(candidates)
}

/// Strategy 4: any JSON object in the text with a non-empty string `name`
/// and an `arguments` key, whatever the key order.
///
/// Every `{` starts a candidate. An accepted call is skipped as a whole, so
/// calls nested inside it are not reported twice.
pub fn parse_loose_objects(text: &str) -> Vec<ToolCall> {
    let mut candidates = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find('{') {
        let start = cursor + offset;
        cursor = start + 1;
        let Some(object) = extract_balanced_object(text, start) else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(object) else {
            continue;
        };
        if is_loose_call(&value) {
            candidates.push(value);
            cursor = start + object.len();
        }
    }

    collect_calls(candidates)
}

fn is_loose_call(value: &serde_json::Value) -> bool {
    let named = value
        .get("name")
        .and_then(|n| n.as_str())
        .is_some_and(|n| !n.trim().is_empty());
    named && value.get("arguments").is_some()
}

/// Strategy 5: the trimmed text is exactly a JSON array of calls.
pub fn parse_json_array(text: &str) -> Vec<ToolCall> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('[') && trimmed.ends_with(']')) {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<serde_json::Value>>(trimmed) {
        Ok(items) => collect_calls(items),
        Err(_) => Vec::new(),
    }
}

/// Return the complete JSON object starting at byte `start` (which must be `{`).
///
/// Tracks nesting depth and string-literal state, so braces inside string
/// values and escaped quotes do not end the object early. Returns `None` if
/// the object is never closed.
pub fn extract_balanced_object(text: &str, start: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn collect_calls(candidates: impl IntoIterator<Item = serde_json::Value>) -> Vec<ToolCall> {
    candidates
        .into_iter()
        .filter_map(|value| value_to_call(&value))
        .enumerate()
        .map(|(index, mut call)| {
            if call.id.is_empty() {
                call.id = format!("call_{}", index);
            }
            call
        })
        .collect()
}

/// Interpret one JSON value as a call. Accepts `{name, arguments}`, the
/// `parameters` alias, and OpenAI-style `{function: {name, arguments}}`
/// wrappers where `arguments` may itself be a JSON string.
fn value_to_call(value: &serde_json::Value) -> Option<ToolCall> {
    let object = value.as_object()?;
    let inner = object
        .get("function")
        .and_then(|f| f.as_object())
        .unwrap_or(object);

    let name = inner.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let arguments = match inner.get("arguments").or_else(|| inner.get("parameters")) {
        Some(serde_json::Value::String(raw)) => serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.clone())),
        Some(serde_json::Value::Null) | None => serde_json::json!({}),
        Some(other) => other.clone(),
    };

    let id = object
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    Some(ToolCall {
        id,
        name: name.to_string(),
        arguments,
    })
}
