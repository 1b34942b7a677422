// In crates/oracle/src/parse.rs

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use core_types::{Bias, OracleAssessment};
use serde_json::Value;

/// Strips code fences and surrounding prose, leaving the JSON object.
pub fn clean_response(text: &str) -> &str {
    for fence in ["```json", "```"] {
        if let Some(start) = text.find(fence) {
            let body = &text[start + fence.len()..];
            if let Some(end) = body.find("```") {
                return body[..end].trim();
            }
        }
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            return text[start..=end].trim();
        }
    }
    text.trim()
}

fn parse_bias(raw: &str) -> Bias {
    match raw.trim().to_ascii_uppercase().as_str() {
        "LONG" | "BUY" | "BULLISH" => Bias::Long,
        "SHORT" | "SELL" | "BEARISH" => Bias::Short,
        _ => Bias::Neutral,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Cuts `text` to at most `max_chars` characters, marking the cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Turns a model answer into an assessment.
///
/// Accepts `bias` or `direction` with `LONG`/`SHORT`/`NO_POSITION` (anything
/// else reads as neutral). Confidence is clamped to `[0, 1]`.
pub fn parse_assessment(
    text: &str,
    model: &str,
    timestamp: DateTime<Utc>,
    max_reasoning_length: usize,
) -> Result<OracleAssessment> {
    let cleaned = clean_response(text);
    let value: Value =
        serde_json::from_str(cleaned).map_err(|e| Error::Parse(format!("not JSON ({e}): {cleaned}")))?;
    let obj = value.as_object().ok_or_else(|| Error::Parse("answer is not an object".into()))?;

    let bias = obj
        .get("bias")
        .or_else(|| obj.get("direction"))
        .and_then(Value::as_str)
        .map(parse_bias)
        .ok_or_else(|| Error::Parse("missing bias".into()))?;
    let confidence = obj
        .get("confidence")
        .and_then(number)
        .filter(|c| c.is_finite())
        .ok_or_else(|| Error::Parse("missing confidence".into()))?
        .clamp(0.0, 1.0);
    let rationale = obj
        .get("reasoning")
        .or_else(|| obj.get("rationale"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(OracleAssessment {
        bias,
        confidence,
        rationale: truncate(rationale, max_reasoning_length),
        timestamp,
        model: model.to_string(),
    })
}
