//! Reasoning response parsing
//!
//! Free-text responses are interpreted by an ordered list of pure strategies.
//! The first strategy that yields a result wins; if none does the caller gets
//! a typed parse failure.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use shared::{AlertLevel, ForecastField, StormAssessment};

use crate::error::{AppError, AppResult};

/// One forecast entry as read from the response, before validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawForecastPoint {
    /// Hours ahead of the forecast anchor
    pub hour: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub values: BTreeMap<ForecastField, f64>,
    /// Per-field confidence, if the response gave one
    pub field_confidence: BTreeMap<ForecastField, f64>,
    /// Confidence applying to every field of this point
    pub confidence: Option<f64>,
    pub condition: Option<String>,
}

impl RawForecastPoint {
    fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Everything a strategy managed to extract
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub points: Vec<RawForecastPoint>,
    pub assessment: Option<StormAssessment>,
    /// Overall confidence of the response
    pub confidence: Option<f64>,
}

impl ParsedResponse {
    fn is_empty(&self) -> bool {
        self.points.is_empty() && self.assessment.is_none()
    }
}

pub type ParseStrategy = fn(&str) -> Option<ParsedResponse>;

/// Strategies in the order they are tried
pub const STRATEGIES: [(&str, ParseStrategy); 4] = [
    ("direct_json", parse_direct_json),
    ("fenced_block", parse_fenced_block),
    ("brace_span", parse_brace_span),
    ("key_value_lines", parse_key_value_lines),
];

/// Run the strategies in order; returns the result and the strategy name
pub fn parse_response(text: &str) -> AppResult<(ParsedResponse, &'static str)> {
    if text.trim().is_empty() {
        return Err(AppError::ParseFailure("empty response".into()));
    }
    for (name, strategy) in STRATEGIES {
        if let Some(parsed) = strategy(text) {
            return Ok((parsed, name));
        }
    }
    let preview: String = text.chars().take(120).collect();
    Err(AppError::ParseFailure(format!(
        "no strategy could interpret the response: {preview:?}"
    )))
}

// ============================================================================
// Strategies
// ============================================================================

/// The whole response is a JSON document
pub fn parse_direct_json(text: &str) -> Option<ParsedResponse> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    from_json(&value)
}

/// JSON inside a ``` fenced block, optionally tagged `json`
pub fn parse_fenced_block(text: &str) -> Option<ParsedResponse> {
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let tag = after[..body_start].trim();
        let body = &after[body_start..];
        let end = body.find("```")?;

        if tag.is_empty() || tag.eq_ignore_ascii_case("json") {
            if let Ok(value) = serde_json::from_str::<Value>(body[..end].trim()) {
                if let Some(parsed) = from_json(&value) {
                    return Some(parsed);
                }
            }
        }
        rest = &body[end + 3..];
    }
    None
}

/// Outermost `{ ... }` span embedded in prose
pub fn parse_brace_span(text: &str) -> Option<ParsedResponse> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
    from_json(&value)
}

/// Line-oriented `key=value` / `key: value` extraction
///
/// Each line carrying forecast fields becomes one point; an `hour` key (or a
/// `+3h` / `h3` token) sets its lead time. Lines with only storm keys fill the
/// assessment.
pub fn parse_key_value_lines(text: &str) -> Option<ParsedResponse> {
    let mut parsed = ParsedResponse::default();
    let mut assessment = StormAssessment::default();
    let mut saw_assessment = false;

    for line in text.lines() {
        let line = line.trim().trim_start_matches(['-', '*', '•']).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(summary) = text_value(line, &["summary", "analysis_summary"]) {
            assessment.summary = summary;
            saw_assessment = true;
            continue;
        }

        let mut point = RawForecastPoint::default();
        for (key, value) in key_value_pairs(line) {
            match key.as_str() {
                "hour" | "hours_ahead" | "hour_offset" | "h" => {
                    point.hour = parse_number(&value).map(|h| h.round() as i64);
                }
                "condition" | "weather_condition" | "weather" => point.condition = Some(value),
                "confidence" | "confidence_score" => {
                    point.confidence = parse_number(&value);
                }
                "storm_detected" | "storm" => {
                    assessment.storm_detected = parse_bool(&value).unwrap_or(false);
                    saw_assessment = true;
                }
                "alert_level" => {
                    if let Ok(level) = value.parse::<AlertLevel>() {
                        assessment.alert_level = level;
                        saw_assessment = true;
                    }
                }
                "predicted_intensity" | "intensity" => {
                    assessment.predicted_intensity = Some(value);
                    saw_assessment = true;
                }
                other => {
                    if let (Ok(field), Some(number)) =
                        (other.parse::<ForecastField>(), parse_number(&value))
                    {
                        point.values.insert(field, number);
                    }
                }
            }
        }

        if point.is_empty() {
            // A bare confidence line speaks for the whole response
            if point.confidence.is_some() {
                parsed.confidence = point.confidence;
            }
            continue;
        }
        parsed.points.push(point);
    }

    if saw_assessment {
        assessment.confidence = parsed.confidence.unwrap_or(0.0);
        parsed.assessment = Some(assessment);
    }
    (!parsed.is_empty()).then_some(parsed)
}

// ============================================================================
// JSON interpretation
// ============================================================================

const FORECAST_ARRAY_KEYS: [&str; 5] =
    ["hourly_forecast", "forecast", "forecasts", "predictions", "points"];

fn from_json(value: &Value) -> Option<ParsedResponse> {
    let mut parsed = ParsedResponse::default();

    match value {
        Value::Array(items) => {
            parsed.points = points_from_array(items);
        }
        Value::Object(map) => {
            if let Some(items) = FORECAST_ARRAY_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_array))
            {
                parsed.points = points_from_array(items);
            }
            parsed.confidence = ["confidence_score", "confidence", "overall_confidence"]
                .iter()
                .find_map(|k| map.get(*k).and_then(number_value));
            parsed.assessment = assessment_from_object(map, parsed.confidence);
        }
        _ => return None,
    }

    (!parsed.is_empty()).then_some(parsed)
}

fn points_from_array(items: &[Value]) -> Vec<RawForecastPoint> {
    items
        .iter()
        .filter_map(Value::as_object)
        .map(point_from_object)
        .filter(|p| !p.is_empty())
        .collect()
}

fn point_from_object(map: &Map<String, Value>) -> RawForecastPoint {
    let mut point = RawForecastPoint::default();

    for (key, value) in map {
        let key = normalize_key(key);
        match key.as_str() {
            "hour" | "hours_ahead" | "hour_offset" | "lead_hours" => {
                point.hour = number_value(value).map(|h| h.round() as i64);
            }
            "timestamp" | "time" | "target" | "datetime" => {
                point.timestamp = value
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc));
            }
            "condition" | "weather_condition" | "description" | "weather" => {
                point.condition = value.as_str().map(str::to_string);
            }
            "confidence" => match value {
                Value::Object(per_field) => {
                    for (field, c) in per_field {
                        if let (Ok(field), Some(c)) =
                            (field.parse::<ForecastField>(), number_value(c))
                        {
                            point.field_confidence.insert(field, c);
                        }
                    }
                }
                other => point.confidence = number_value(other),
            },
            other => {
                if let (Ok(field), Some(number)) =
                    (other.parse::<ForecastField>(), number_value(value))
                {
                    point.values.insert(field, number);
                }
            }
        }
    }
    point
}

fn assessment_from_object(
    map: &Map<String, Value>,
    confidence: Option<f64>,
) -> Option<StormAssessment> {
    let storm_detected = map.get("storm_detected").and_then(bool_value)?;

    let text = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string)
    };

    Some(StormAssessment {
        storm_detected,
        confidence: confidence.unwrap_or(0.0),
        alert_level: text(&["alert_level"][..])
            .and_then(|s| s.parse().ok())
            .unwrap_or_default(),
        predicted_arrival: text(&["predicted_arrival"][..])
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        predicted_intensity: text(&["predicted_intensity"][..]),
        summary: text(&["analysis_summary", "summary"][..]).unwrap_or_default(),
        recommendations: map
            .get("recommendations")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    })
}

// ============================================================================
// Scalar helpers
// ============================================================================

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

fn number_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn bool_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => parse_bool(s),
        _ => None,
    }
}

/// Leading number of a token, ignoring units such as `°C`, `%` or `hPa`
fn parse_number(token: &str) -> Option<f64> {
    let token = token.trim().trim_start_matches('+');
    let end = token
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && *c == '-')))
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    token[..end].parse::<f64>().ok().filter(|n| n.is_finite())
}

fn parse_bool(token: &str) -> Option<bool> {
    match token.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Free text after `key:` / `key=` when the line starts with one of `keys`
fn text_value(line: &str, keys: &[&str]) -> Option<String> {
    let lower = line.to_ascii_lowercase();
    keys.iter().find_map(|key| {
        let rest = lower.strip_prefix(key)?;
        let rest = rest.trim_start();
        let sep = rest.chars().next().filter(|c| *c == ':' || *c == '=')?;
        let offset = line.len() - rest.len() + sep.len_utf8();
        Some(line[offset..].trim().to_string())
    })
}

/// Split a line into `(key, value)` pairs
///
/// Keys may span several words (`wind speed: 5`); `+3h`, `3h` and `h3`
/// tokens are read as an hour.
fn key_value_pairs(line: &str) -> Vec<(String, String)> {
    let spaced = line.replace('=', " = ").replace(':', " : ");
    let tokens: Vec<&str> = spaced
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';' || c == '|')
        .filter(|t| !t.is_empty())
        .collect();

    let mut pairs = Vec::new();
    let mut key_words: Vec<String> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if (token == "=" || token == ":") && !key_words.is_empty() {
            if let Some(value) = tokens.get(i + 1) {
                pairs.push((resolve_key(&key_words), value.to_string()));
                i += 2;
            } else {
                i += 1;
            }
            key_words.clear();
            continue;
        }
        if let Some(hour) = hour_token(token) {
            pairs.push(("hour".to_string(), hour.to_string()));
            key_words.clear();
        } else if key_words.last().is_some_and(|k| k == "hour") && parse_number(token).is_some() {
            pairs.push(("hour".to_string(), token.to_string()));
            key_words.clear();
        } else if token.chars().all(|c| c.is_alphabetic() || c == '_' || c == '-') {
            key_words.push(token.to_lowercase());
        } else {
            key_words.clear();
        }
        i += 1;
    }
    pairs
}

const META_KEYS: [&str; 14] = [
    "hour",
    "hours_ahead",
    "hour_offset",
    "h",
    "condition",
    "weather_condition",
    "weather",
    "confidence",
    "confidence_score",
    "storm_detected",
    "storm",
    "alert_level",
    "predicted_intensity",
    "intensity",
];

/// Longest trailing run of words that forms a known key
///
/// Unit words left over from a previous value (`2 mm humidity: 80`) are
/// dropped this way.
fn resolve_key(words: &[String]) -> String {
    (1..=words.len())
        .rev()
        .map(|n| words[words.len() - n..].join("_"))
        .find(|key| META_KEYS.contains(&key.as_str()) || key.parse::<ForecastField>().is_ok())
        .unwrap_or_else(|| words.join("_"))
}

fn hour_token(token: &str) -> Option<i64> {
    let lower = token.to_ascii_lowercase();
    let digits = lower
        .strip_prefix('+')
        .unwrap_or(&lower)
        .strip_suffix('h')
        .or_else(|| lower.strip_prefix('h'))?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_strips_units() {
        assert_eq!(parse_number("21.5°C"), Some(21.5));
        assert_eq!(parse_number("80%"), Some(80.0));
        assert_eq!(parse_number("-3.2"), Some(-3.2));
        assert_eq!(parse_number("+2"), Some(2.0));
        assert_eq!(parse_number("hPa"), None);
    }

    #[test]
    fn test_hour_tokens() {
        assert_eq!(hour_token("+3h"), Some(3));
        assert_eq!(hour_token("h4"), Some(4));
        assert_eq!(hour_token("2h"), Some(2));
        assert_eq!(hour_token("hail"), None);
        assert_eq!(hour_token("h"), None);
    }

    #[test]
    fn test_key_value_pairs_multiword_keys() {
        let pairs = key_value_pairs("Hour 2: wind speed: 7 m/s, temperature=19.5");
        assert!(pairs.contains(&("hour".to_string(), "2".to_string())));
        assert!(pairs.contains(&("wind_speed".to_string(), "7".to_string())));
        assert!(pairs.contains(&("temperature".to_string(), "19.5".to_string())));
    }

    #[test]
    fn test_unit_words_do_not_leak_into_keys() {
        let pairs = key_value_pairs("precipitation: 2 mm humidity: 80 %");
        assert!(pairs.contains(&("humidity".to_string(), "80".to_string())));
        assert_eq!(resolve_key(&["the".to_string(), "pressure".to_string()]), "pressure");
    }

    #[test]
    fn test_text_value() {
        assert_eq!(
            text_value("Summary: Storm cells moving in", &["summary"]).as_deref(),
            Some("Storm cells moving in")
        );
        assert_eq!(text_value("summary of the day", &["summary"]), None);
    }
}
