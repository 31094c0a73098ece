//! Strict parsing of the model's calendar answer
//!
//! The answer must be one JSON object with `audit_metadata` and `calendar`.
//! Markdown fences and prose around the object are tolerated; anything else
//! is a parse error. Days outside the horizon are dropped, horizon days the
//! model skipped (or priced invalidly) are reported as missing so the caller
//! falls back to the baseline for those dates only.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LlmError;
use crate::llm::sanitizer::sanitize_text;

const MAX_REASONING_CHARS: usize = 300;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditMetadata {
    #[serde(default)]
    pub market_sentiment: Option<String>,
    #[serde(default)]
    pub property_grade: Option<String>,
    #[serde(default)]
    pub top_demand_drivers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDay {
    pub price: i64,
    pub reasoning: String,
    pub premium: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCalendar {
    pub audit: AuditMetadata,
    pub days: BTreeMap<NaiveDate, ParsedDay>,
    /// Entries ignored: outside the horizon, duplicated, or unusable
    pub dropped: usize,
    /// Horizon dates without a usable entry
    pub missing: Vec<NaiveDate>,
}

/// Remove a surrounding ```json fence if present
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Drop `[n]` citation markers
pub fn strip_citations(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '[' {
            let tail = &text[i + 1..];
            let digits = tail.chars().take_while(|d| d.is_ascii_digit()).count();
            if digits > 0 && tail[digits..].starts_with(']') {
                for _ in 0..=digits {
                    chars.next();
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn json_object_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn positive_integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return (n > 0).then_some(n);
    }
    let f = value.as_f64()?;
    (f.is_finite() && f > 0.0 && f.fract() == 0.0 && f < i64::MAX as f64).then_some(f as i64)
}

pub fn parse_calendar(raw: &str, horizon: &[NaiveDate]) -> Result<ParsedCalendar, LlmError> {
    let body = json_object_slice(strip_fences(raw))
        .ok_or_else(|| LlmError::Parse("no JSON object in answer".to_string()))?;

    let root: Value =
        serde_json::from_str(body).map_err(|e| LlmError::Parse(format!("invalid JSON: {}", e)))?;
    let object = root
        .as_object()
        .ok_or_else(|| LlmError::Parse("answer is not an object".to_string()))?;

    let audit = match object.get("audit_metadata") {
        Some(value @ Value::Object(_)) => serde_json::from_value::<AuditMetadata>(value.clone())
            .map_err(|e| LlmError::Parse(format!("audit_metadata: {}", e)))?,
        _ => return Err(LlmError::Parse("missing audit_metadata object".to_string())),
    };
    let entries = object
        .get("calendar")
        .and_then(Value::as_array)
        .ok_or_else(|| LlmError::Parse("missing calendar array".to_string()))?;

    let wanted: HashSet<NaiveDate> = horizon.iter().copied().collect();
    let mut days = BTreeMap::new();
    let mut dropped = 0;

    for entry in entries {
        let date = entry
            .get("date")
            .and_then(Value::as_str)
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok());
        let price = entry.get("final_suggested_price").and_then(positive_integer);

        let (Some(date), Some(price)) = (date, price) else {
            dropped += 1;
            continue;
        };
        if !wanted.contains(&date) || days.contains_key(&date) {
            dropped += 1;
            continue;
        }

        let reasoning = entry
            .get("reasoning")
            .and_then(Value::as_str)
            .map(|r| sanitize_text(&strip_citations(r), MAX_REASONING_CHARS))
            .unwrap_or_default();
        let premium = entry
            .get("price_breakdown")
            .and_then(|b| b.get("premium"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        days.insert(
            date,
            ParsedDay {
                price,
                reasoning,
                premium,
            },
        );
    }

    if days.is_empty() {
        return Err(LlmError::Parse("calendar has no usable horizon days".to_string()));
    }

    let missing = horizon
        .iter()
        .filter(|d| !days.contains_key(d))
        .copied()
        .collect();

    Ok(ParsedCalendar {
        audit,
        days,
        dropped,
        missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizon() -> Vec<NaiveDate> {
        NaiveDate::from_ymd_opt(2026, 7, 1)
            .unwrap()
            .iter_days()
            .take(3)
            .collect()
    }

    #[test]
    fn test_parses_fenced_answer_with_citations() {
        let raw = r#"```json
{"audit_metadata":{"market_sentiment":"hot","property_grade":"A","top_demand_drivers":["festival"]},
 "calendar":[
  {"date":"2026-07-01","weekday":"Wednesday","final_suggested_price":180,"price_breakdown":{"base":150},"reasoning":"Festival week[1][2]"},
  {"date":"2026-07-02","weekday":"Thursday","final_suggested_price":200.0,"price_breakdown":{"premium":true},"reasoning":"Opening night"},
  {"date":"2026-08-01","weekday":"Saturday","final_suggested_price":300,"price_breakdown":{},"reasoning":"out of range"}
 ]}
```
[3]"#;
        let parsed = parse_calendar(raw, &horizon()).unwrap();
        assert_eq!(parsed.days.len(), 2);
        assert_eq!(parsed.dropped, 1);
        assert_eq!(parsed.missing, vec![NaiveDate::from_ymd_opt(2026, 7, 3).unwrap()]);
        assert_eq!(parsed.audit.top_demand_drivers, vec!["festival".to_string()]);

        let first = &parsed.days[&NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()];
        assert_eq!(first.reasoning, "Festival week");
        assert!(!first.premium);
        let second = &parsed.days[&NaiveDate::from_ymd_opt(2026, 7, 2).unwrap()];
        assert_eq!(second.price, 200);
        assert!(second.premium);
    }

    #[test]
    fn test_prose_is_parse_error() {
        let err = parse_calendar("I cannot help with pricing today.", &horizon()).unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)));
    }

    #[test]
    fn test_missing_audit_metadata_is_parse_error() {
        let raw = r#"{"calendar":[{"date":"2026-07-01","final_suggested_price":100}]}"#;
        assert!(matches!(parse_calendar(raw, &horizon()), Err(LlmError::Parse(_))));
    }

    #[test]
    fn test_non_positive_or_fractional_prices_are_dropped() {
        let raw = r#"{"audit_metadata":{},"calendar":[
            {"date":"2026-07-01","final_suggested_price":0},
            {"date":"2026-07-02","final_suggested_price":99.5},
            {"date":"2026-07-03","final_suggested_price":"120"},
            {"date":"2026-07-03","final_suggested_price":120}
        ]}"#;
        let parsed = parse_calendar(raw, &horizon()).unwrap();
        assert_eq!(parsed.dropped, 3);
        assert_eq!(parsed.days.len(), 1);
        assert_eq!(parsed.missing.len(), 2);
    }

    #[test]
    fn test_strip_citations_keeps_other_brackets() {
        assert_eq!(strip_citations("busy[12] weekend [a] [3]"), "busy weekend [a] ");
    }
}
