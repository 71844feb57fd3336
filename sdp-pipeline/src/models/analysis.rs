//! Analysis results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use uuid::Uuid;

/// Confidence / severity / priority qualifier
///
/// Unrecognized strings from the model are kept as `Other` rather than
/// rejected. Numeric qualifiers (`"confidence": 0.9`) are kept as their
/// normalized text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Value", into = "String")]
pub enum Level {
    High,
    #[default]
    Medium,
    Low,
    Other(String),
}

impl Level {
    pub fn as_str(&self) -> &str {
        match self {
            Level::High => "high",
            Level::Medium => "medium",
            Level::Low => "low",
            Level::Other(s) => s,
        }
    }
}

impl From<String> for Level {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Level::High,
            "medium" => Level::Medium,
            "low" => Level::Low,
            _ => Level::Other(s),
        }
    }
}

impl From<Value> for Level {
    fn from(value: Value) -> Self {
        match normalize_numbers(value) {
            Value::String(s) => Level::from(s),
            Value::Null => Level::default(),
            other => Level::Other(other.to_string()),
        }
    }
}

impl From<Level> for String {
    fn from(level: Level) -> Self {
        level.as_str().to_string()
    }
}

/// Integral floats become integers (`3.0` → `3`), recursively; other
/// numbers are kept as floats
pub fn normalize_numbers(value: Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Value::Number(Number::from(f as i64))
            }
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_numbers).collect()),
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, normalize_numbers(v))).collect()),
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(rename = "type", default)]
    pub insight_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub confidence: Level,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(rename = "type", default)]
    pub anomaly_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Level,
}

impl Anomaly {
    /// High severity, or typed as a high-value anomaly
    pub fn is_high_value(&self) -> bool {
        self.severity == Level::High || self.anomaly_type.to_ascii_lowercase().contains("high_value")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub priority: Level,
}

/// Structured content extracted from one model reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedAnalysis {
    #[serde(default)]
    pub insights: Vec<Insight>,
    #[serde(default)]
    pub anomalies: Vec<Anomaly>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub summary: String,
    /// Reply could not be parsed; `summary` holds the raw text
    #[serde(skip)]
    pub parse_degraded: bool,
}

impl ParsedAnalysis {
    /// Fallback used when the reply holds no parseable JSON object
    pub fn degraded(raw_text: &str) -> Self {
        Self {
            summary: raw_text.to_string(),
            parse_degraded: true,
            ..Self::default()
        }
    }
}

/// Persisted Analysis Result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analysis_id: String,
    pub correlation_id: Uuid,
    pub source_file: String,
    pub processed_file: String,
    pub records_analyzed: usize,
    pub raw_output: String,
    pub insights: Vec<Insight>,
    pub anomalies: Vec<Anomaly>,
    pub recommendations: Vec<Recommendation>,
    pub summary: String,
    pub parse_degraded: bool,
    pub notified: bool,
    pub notified_at: Option<DateTime<Utc>>,
    pub analysis_timestamp: DateTime<Utc>,
    /// TTL marker, epoch seconds
    pub expires_at: i64,
}

impl AnalysisResult {
    /// Identifier format: `analysis_{unix_seconds}_{first 8 of correlation id}`
    pub fn make_id(created_at: DateTime<Utc>, correlation_id: &Uuid) -> String {
        format!(
            "analysis_{}_{}",
            created_at.timestamp(),
            sdp_common::uuid_utils::short(correlation_id)
        )
    }

    pub fn high_value_anomalies(&self) -> usize {
        self.anomalies.iter().filter(|a| a.is_high_value()).count()
    }

    pub fn has_high_severity(&self) -> bool {
        self.anomalies.iter().any(|a| a.severity == Level::High)
    }

    pub fn notification_required(&self) -> bool {
        self.high_value_anomalies() > 0 || !self.insights.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_level_keeps_unknown_verbatim() {
        let anomaly: Anomaly =
            serde_json::from_str(r#"{"type":"price_anomaly","description":"x","severity":"Critical"}"#).unwrap();
        assert_eq!(anomaly.severity, Level::Other("Critical".into()));
        assert_eq!(serde_json::to_value(&anomaly).unwrap()["severity"], "Critical");
    }

    #[test]
    fn test_numeric_qualifier_is_normalized() {
        let insight: Insight =
            serde_json::from_str(r#"{"type":"trend","description":"d","confidence":1.0}"#).unwrap();
        assert_eq!(insight.confidence, Level::Other("1".into()));
        let insight: Insight =
            serde_json::from_str(r#"{"type":"trend","description":"d","confidence":0.85}"#).unwrap();
        assert_eq!(insight.confidence, Level::Other("0.85".into()));
    }

    #[test]
    fn test_normalize_numbers_recurses() {
        let value = serde_json::json!({"a": 2.0, "b": [1.5, 4.0], "c": "7.0"});
        assert_eq!(normalize_numbers(value), serde_json::json!({"a": 2, "b": [1.5, 4], "c": "7.0"}));
    }

    #[test]
    fn test_level_is_case_insensitive() {
        assert_eq!(Level::from("HIGH".to_string()), Level::High);
    }

    #[test]
    fn test_high_value_detection() {
        let by_type = Anomaly {
            anomaly_type: "high_value_order".into(),
            description: String::new(),
            severity: Level::Low,
        };
        let by_severity = Anomaly {
            anomaly_type: "price_anomaly".into(),
            description: String::new(),
            severity: Level::High,
        };
        assert!(by_type.is_high_value());
        assert!(by_severity.is_high_value());
    }

    #[test]
    fn test_make_id_format() {
        let at = Utc.timestamp_opt(1_711_447_200, 0).unwrap();
        let id = Uuid::parse_str("1a2b3c4d-5e6f-4000-8000-000000000000").unwrap();
        assert_eq!(AnalysisResult::make_id(at, &id), "analysis_1711447200_1a2b3c4d");
    }
}
