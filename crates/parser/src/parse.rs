//! The parsing strategies and field/action normalization.

use crate::response::ParsedResponse;
use regex_lite::Regex;
use stepwise_core::error::ParseError;
use stepwise_core::Action;
use tracing::debug;

/// Parses raw model text into a [`ParsedResponse`].
///
/// Strategies run in a fixed order — whole-response JSON, fenced JSON
/// block, loose-text extraction — and the first one that recognizes at
/// least one field wins. Key-spelling variants are normalized on the
/// decoded structure, never by editing the raw text.
pub struct ResponseParser {
    fenced: Regex,
    action_marker: Regex,
    line_fields: Vec<(&'static str, Regex)>,
    final_answer: Regex,
}

impl ResponseParser {
    pub fn new() -> Self {
        let line = |name: &str| {
            Regex::new(&format!(r"(?im)^[ \t]*{name}[ \t]*:[ \t]*(.+)$"))
                .unwrap_or_else(|e| unreachable!("static regex: {e}"))
        };
        Self {
            fenced: Regex::new(r"(?s)```(?:json)?\s*(.+?)```")
                .unwrap_or_else(|e| unreachable!("static regex: {e}")),
            action_marker: Regex::new(r"(?i)\bactions?[ \t]*:")
                .unwrap_or_else(|e| unreachable!("static regex: {e}")),
            line_fields: vec![
                ("plan", line("plan")),
                ("thought", line("thought")),
                ("summary", line("summary")),
                ("state", line("state")),
            ],
            final_answer: Regex::new(r"(?is)\bfinal[_ ]?answer[ \t]*:[ \t]*(.+)\z")
                .unwrap_or_else(|e| unreachable!("static regex: {e}")),
        }
    }

    /// Run the pipeline over one raw model response.
    pub fn parse(&self, raw: &str) -> Result<ParsedResponse, ParseError> {
        let raw = raw.trim();

        if let Some(parsed) = self.try_json(raw)? {
            debug!(strategy = "json", "response parsed");
            return Ok(parsed);
        }
        if let Some(parsed) = self.try_fenced_json(raw)? {
            debug!(strategy = "fenced_json", "response parsed");
            return Ok(parsed);
        }
        if let Some(parsed) = self.try_regex_fields(raw)? {
            debug!(strategy = "regex_fields", "response parsed");
            return Ok(parsed);
        }
        Err(ParseError::NoRecognizedFields)
    }

    /// The whole response is one JSON object.
    fn try_json(&self, raw: &str) -> Result<Option<ParsedResponse>, ParseError> {
        let Ok(serde_json::Value::Object(map)) = serde_json::from_str(raw) else {
            return Ok(None);
        };
        let parsed = extract_from_object(&map)?;
        Ok((!parsed.is_empty()).then_some(parsed))
    }

    /// A JSON object inside a code fence, with prose around it.
    fn try_fenced_json(&self, raw: &str) -> Result<Option<ParsedResponse>, ParseError> {
        let Some(caps) = self.fenced.captures(raw) else {
            return Ok(None);
        };
        let inner = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let Ok(serde_json::Value::Object(map)) = serde_json::from_str(inner) else {
            return Ok(None);
        };
        let parsed = extract_from_object(&map)?;
        Ok((!parsed.is_empty()).then_some(parsed))
    }

    /// Loose `Key: value` lines plus a dedicated `Action: {json}` blob
    /// extractor.
    fn try_regex_fields(&self, raw: &str) -> Result<Option<ParsedResponse>, ParseError> {
        let mut parsed = ParsedResponse::default();

        for (name, re) in &self.line_fields {
            if let Some(caps) = re.captures(raw) {
                let value = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
                if value.is_empty() {
                    continue;
                }
                let slot = match *name {
                    "plan" => &mut parsed.plan,
                    "thought" => &mut parsed.thought,
                    "summary" => &mut parsed.summary,
                    _ => &mut parsed.state,
                };
                *slot = Some(value.to_string());
            }
        }
        if let Some(caps) = self.final_answer.captures(raw) {
            let value = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if !value.is_empty() {
                parsed.final_answer = Some(value.to_string());
            }
        }

        // A marker only counts as an action payload when JSON actually
        // follows; `Action: call foo` is just prose. Prose markers may
        // precede the real one, so every match is examined.
        for m in self.action_marker.find_iter(raw) {
            let tail = &raw[m.end()..];
            if tail.trim_start().starts_with(['{', '[']) {
                let blob = extract_json_blob(tail).ok_or_else(|| {
                    ParseError::MalformedAction("unbalanced JSON after Actions:".into())
                })?;
                let value: serde_json::Value = serde_json::from_str(blob)
                    .map_err(|e| ParseError::MalformedAction(e.to_string()))?;
                parsed.actions = normalize_actions(&value)?;
                break;
            }
        }

        Ok((!parsed.is_empty()).then_some(parsed))
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase a key and drop `_`/space so spelling variants compare equal
/// (`Final_Answer`, `final answer`, `FINALANSWER`).
fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != ' ')
        .flat_map(char::to_lowercase)
        .collect()
}

fn extract_from_object(
    map: &serde_json::Map<String, serde_json::Value>,
) -> Result<ParsedResponse, ParseError> {
    let mut parsed = ParsedResponse::default();
    for (key, value) in map {
        match normalize_key(key).as_str() {
            "plan" => parsed.plan = text_value(value),
            "thought" => parsed.thought = text_value(value),
            "summary" => parsed.summary = text_value(value),
            "state" => parsed.state = text_value(value),
            "finalanswer" => parsed.final_answer = text_value(value),
            "actions" => parsed.actions = normalize_actions(value)?,
            "storeresults" => {
                if let serde_json::Value::Object(pairs) = value {
                    parsed.store_results = pairs.clone();
                }
            }
            "retrieveresults" => parsed.retrieve_results = key_list(value),
            "deleteresults" => parsed.delete_results = key_list(value),
            _ => {}
        }
    }
    Ok(parsed)
}

/// Stringify a field value: strings pass through, arrays become one item
/// per line, everything else is JSON-encoded. Blank results are dropped.
fn text_value(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// A list of stored-result keys: an array of strings, or a lone string.
fn key_list(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Normalize any accepted Actions payload shape into a flat list.
///
/// Accepted shapes: a bare array of action objects, an object nesting
/// the array under an `actions` key, or a single action object.
fn normalize_actions(value: &serde_json::Value) -> Result<Vec<Action>, ParseError> {
    match value {
        serde_json::Value::Array(items) => items.iter().map(action_from_value).collect(),
        serde_json::Value::Object(map) => {
            if let Some((_, inner)) = map
                .iter()
                .find(|(k, _)| normalize_key(k) == "actions")
            {
                return normalize_actions(inner);
            }
            Ok(vec![action_from_value(value)?])
        }
        other => Err(ParseError::MalformedAction(format!(
            "Actions must be an object or array, got {other}"
        ))),
    }
}

fn action_from_value(value: &serde_json::Value) -> Result<Action, ParseError> {
    let serde_json::Value::Object(map) = value else {
        return Err(ParseError::MalformedAction(format!(
            "action must be an object, got {value}"
        )));
    };

    let mut tool: Option<String> = None;
    let mut args: Option<serde_json::Map<String, serde_json::Value>> = None;
    let mut leftover = serde_json::Map::new();

    for (key, val) in map {
        match normalize_key(key).as_str() {
            "tool" | "toolname" => {
                let name = val.as_str().ok_or_else(|| {
                    ParseError::MalformedAction(format!("tool name must be a string, got {val}"))
                })?;
                tool = Some(name.to_string());
            }
            "args" | "arguments" => match val {
                serde_json::Value::Object(a) => args = Some(a.clone()),
                serde_json::Value::Null => {}
                other => {
                    return Err(ParseError::MalformedAction(format!(
                        "args must be an object, got {other}"
                    )))
                }
            },
            _ => {
                leftover.insert(key.clone(), val.clone());
            }
        }
    }

    let tool = tool.ok_or_else(|| {
        ParseError::MalformedAction("action is missing a tool name".to_string())
    })?;
    // Models sometimes inline arguments next to the tool name instead of
    // nesting them; treat the leftovers as args when no args key exists.
    Ok(Action {
        tool,
        args: args.unwrap_or(leftover),
    })
}

/// Extract the first balanced JSON object or array in `text`.
fn extract_json_blob(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();
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
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
