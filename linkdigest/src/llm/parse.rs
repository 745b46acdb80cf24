use serde_json::{Map, Value};
use tracing::warn;

use super::{truncate_chars, LlmError};

pub const BRIEF_MAX_CHARS: usize = 100;
pub const SUMMARY_MAX_CHARS: usize = 1000;

/// `brief` + `summary` pulled out of a model reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSummary {
    pub brief: String,
    pub summary: String,
}

impl ParsedSummary {
    /// Clamp both fields to their length limits. Overlong output is not an error.
    pub fn truncated(self, url: &str) -> Self {
        Self {
            brief: truncate_field(self.brief, BRIEF_MAX_CHARS, "brief", url),
            summary: truncate_field(self.summary, SUMMARY_MAX_CHARS, "summary", url),
        }
    }
}

fn truncate_field(value: String, max_chars: usize, field: &str, url: &str) -> String {
    let len = value.chars().count();
    if len <= max_chars {
        return value;
    }
    warn!(
        "Truncating {} for URL={} from {} to {} chars",
        field, url, len, max_chars
    );
    truncate_chars(&value, max_chars)
}

/// Parse free-form model output into a `ParsedSummary`.
pub fn parse_summary_payload(text: &str) -> Result<ParsedSummary, LlmError> {
    let payload = extract_json_object(text)?;
    let brief = string_field(&payload, "brief");
    let summary = string_field(&payload, "summary");
    if brief.is_empty() || summary.is_empty() {
        return Err(LlmError::parse(
            "LLM response must include non-empty `brief` and `summary`.",
        ));
    }
    Ok(ParsedSummary { brief, summary })
}

fn string_field(payload: &Map<String, Value>, key: &str) -> String {
    match payload.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

/// First JSON object among: the trimmed text, the text without a code fence,
/// and the span from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>, LlmError> {
    let stripped = text.trim();
    if stripped.is_empty() {
        return Err(LlmError::parse("Empty response from LLM."));
    }

    let mut candidates = vec![stripped.to_string()];
    if stripped.contains("```") {
        candidates.push(strip_code_fence(stripped));
    }
    if let (Some(start), Some(end)) = (stripped.find('{'), stripped.rfind('}')) {
        if start < end {
            candidates.push(stripped[start..=end].to_string());
        }
    }

    candidates
        .iter()
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
        .ok_or_else(|| LlmError::parse("Could not parse JSON from model response."))
}

/// Remove a leading ```` ``` ```` / ```` ```json ```` fence and a trailing ```` ``` ````.
fn strip_code_fence(text: &str) -> String {
    let mut body = text;
    if let Some(rest) = body.strip_prefix("```") {
        body = rest;
        if body.get(..4).map_or(false, |tag| tag.eq_ignore_ascii_case("json")) {
            body = &body[4..];
        }
        body = body.trim_start();
    }
    body = body.trim_end();
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim().to_string()
}
