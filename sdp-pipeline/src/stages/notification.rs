//! Notification Stage
//!
//! Loads an Analysis Result, renders it, dispatches it once and flips the
//! result's notified flag. A result that is already notified is not sent
//! again, which makes repeated `AnalysisComplete` deliveries harmless.

use crate::db::ResultStore;
use crate::error::{StageError, StageResult};
use crate::models::{AnalysisResult, Level};
use crate::services::{NotificationChannel, RenderedMessage};
use sdp_common::{retry_with_backoff, RetryPolicy};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const STAGE: &str = "notification";

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationOutcome {
    Sent { delivery_id: String, subject: String },
    AlreadyNotified,
}

pub struct NotificationStage {
    results: Arc<dyn ResultStore>,
    channel: Arc<dyn NotificationChannel>,
    subject_prefix: String,
    retry: RetryPolicy,
}

impl NotificationStage {
    pub fn new(
        results: Arc<dyn ResultStore>,
        channel: Arc<dyn NotificationChannel>,
        subject_prefix: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            results,
            channel,
            subject_prefix: subject_prefix.into(),
            retry,
        }
    }

    pub async fn get_analysis_details(&self, analysis_id: &str) -> StageResult<AnalysisResult> {
        self.results
            .get(analysis_id)
            .await?
            .ok_or_else(|| StageError::NotFound(format!("analysis result {}", analysis_id)))
    }

    /// Handle one `AnalysisComplete` delivery
    pub async fn notify(&self, analysis_id: &str, correlation_id: Option<Uuid>) -> StageResult<NotificationOutcome> {
        let result = self.get_analysis_details(analysis_id).await?;
        let correlation_id = correlation_id.unwrap_or(result.correlation_id);

        if result.notified {
            info!(
                correlation_id = %correlation_id,
                analysis_id = %analysis_id,
                "Result already notified, skipping dispatch"
            );
            return Ok(NotificationOutcome::AlreadyNotified);
        }

        let message = render_message(&result, &self.subject_prefix);

        let delivery_id = retry_with_backoff("dispatch notification", &self.retry, || {
            self.channel.dispatch(&message)
        })
        .await
        .map_err(|e| {
            tracing::error!(
                correlation_id = %correlation_id,
                analysis_id = %analysis_id,
                category = e.category(),
                error = %e,
                "Notification dispatch failed"
            );
            StageError::fatal(STAGE, Some(correlation_id), e.to_string())
        })?;

        if !self.results.mark_notified(analysis_id).await? {
            warn!(
                correlation_id = %correlation_id,
                analysis_id = %analysis_id,
                "Result was marked notified by a concurrent delivery"
            );
        }

        info!(
            correlation_id = %correlation_id,
            analysis_id = %analysis_id,
            delivery_id = %delivery_id,
            "Notification sent"
        );

        Ok(NotificationOutcome::Sent {
            delivery_id,
            subject: message.subject,
        })
    }
}

/// Subject tier from anomaly severities
pub fn render_subject(result: &AnalysisResult, prefix: &str) -> String {
    if result.has_high_severity() {
        format!("ALERT: {} - High Priority Anomalies Detected ({})", prefix, result.analysis_id)
    } else if !result.anomalies.is_empty() {
        format!("{} - Anomalies Detected ({})", prefix, result.analysis_id)
    } else {
        format!("{} - All Normal ({})", prefix, result.analysis_id)
    }
}

/// Deterministic HTML and plain-text rendering of one result
pub fn render_message(result: &AnalysisResult, prefix: &str) -> RenderedMessage {
    let (status, color) = if result.has_high_severity() {
        ("HIGH PRIORITY", "#dc3545")
    } else if !result.anomalies.is_empty() {
        ("ATTENTION NEEDED", "#ffc107")
    } else {
        ("NORMAL", "#28a745")
    };

    let mut html = format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"UTF-8\"><title>{prefix}</title></head>\n<body>\n\
         <div class=\"header\" style=\"background-color: {color}\">\n<h1>{prefix}</h1>\n\
         <h2>Status: {status}</h2>\n<p>Analysis ID: {id}</p>\n</div>\n",
        prefix = escape_html(prefix),
        color = color,
        status = status,
        id = escape_html(&result.analysis_id),
    );
    let mut text = format!("{}\nStatus: {}\nAnalysis ID: {}\n\n", prefix, status, result.analysis_id);

    let records = group_thousands(result.records_analyzed);
    html.push_str(&format!(
        "<div class=\"stats\">\n<p>Insights: {}</p>\n<p>Anomalies: {}</p>\n<p>Records Analyzed: {}</p>\n</div>\n",
        result.insights.len(),
        result.anomalies.len(),
        records,
    ));
    text.push_str(&format!(
        "Insights: {}  Anomalies: {}  Records Analyzed: {}\n\n",
        result.insights.len(),
        result.anomalies.len(),
        records,
    ));

    let summary = if result.summary.trim().is_empty() {
        "No summary available"
    } else {
        result.summary.as_str()
    };
    html.push_str(&format!(
        "<div class=\"section\">\n<h3>Analysis Summary</h3>\n<p>{}</p>\n</div>\n",
        escape_html(summary)
    ));
    text.push_str(&format!("Summary\n{}\n\n", summary));

    let insights: Vec<(String, &Level, &str)> = result
        .insights
        .iter()
        .map(|i| (title_label(&i.insight_type), &i.confidence, i.description.as_str()))
        .collect();
    render_section(&mut html, &mut text, "Key Insights", "insight", &insights);

    let anomalies: Vec<(String, &Level, &str)> = result
        .anomalies
        .iter()
        .map(|a| (title_label(&a.anomaly_type), &a.severity, a.description.as_str()))
        .collect();
    render_section(&mut html, &mut text, "Anomalies Detected", "anomaly", &anomalies);

    let recommendations: Vec<(String, &Level, &str)> = result
        .recommendations
        .iter()
        .map(|r| (title_label(&r.category), &r.priority, r.action.as_str()))
        .collect();
    render_section(&mut html, &mut text, "Recommendations", "recommendation", &recommendations);

    let timestamp = result.analysis_timestamp.to_rfc3339();
    html.push_str(&format!(
        "<div class=\"metadata\">\n<h4>Analysis Metadata</h4>\n\
         <p><strong>Analysis ID:</strong> {}</p>\n<p><strong>Correlation ID:</strong> {}</p>\n\
         <p><strong>Source File:</strong> {}</p>\n<p><strong>Processed File:</strong> {}</p>\n\
         <p><strong>Analysis Timestamp:</strong> {}</p>\n</div>\n</body>\n</html>\n",
        escape_html(&result.analysis_id),
        result.correlation_id,
        escape_html(&result.source_file),
        escape_html(&result.processed_file),
        timestamp,
    ));
    text.push_str(&format!(
        "Analysis ID: {}\nCorrelation ID: {}\nSource File: {}\nProcessed File: {}\nAnalysis Timestamp: {}\n",
        result.analysis_id, result.correlation_id, result.source_file, result.processed_file, timestamp,
    ));

    RenderedMessage {
        subject: render_subject(result, prefix),
        html_body: html,
        text_body: text,
    }
}

fn render_section(html: &mut String, text: &mut String, title: &str, class: &str, items: &[(String, &Level, &str)]) {
    if items.is_empty() {
        return;
    }

    html.push_str(&format!("<div class=\"section\">\n<h3>{} ({})</h3>\n", title, items.len()));
    text.push_str(&format!("{} ({})\n", title, items.len()));

    for (label, level, description) in items {
        let level_class = escape_html(&level.as_str().to_ascii_lowercase());
        html.push_str(&format!(
            "<div class=\"{class} {level_class}\">\n<strong>{label}</strong> \
             <span class=\"badge {level_class}\">{badge}</span>\n<br>{description}\n</div>\n",
            class = class,
            level_class = level_class,
            label = escape_html(label),
            badge = escape_html(&level.as_str().to_ascii_uppercase()),
            description = escape_html(description),
        ));
        text.push_str(&format!(
            "- {} [{}]: {}\n",
            label,
            level.as_str().to_ascii_uppercase(),
            description
        ));
    }

    html.push_str("</div>\n");
    text.push('\n');
}

/// `price_anomaly` → `Price Anomaly`
pub fn title_label(raw: &str) -> String {
    let raw = if raw.trim().is_empty() { "general" } else { raw };
    raw.replace('_', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// `1234567` → `1,234,567`
fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Anomaly, Insight, Recommendation};
    use chrono::Utc;

    fn result_with(anomalies: Vec<Anomaly>) -> AnalysisResult {
        AnalysisResult {
            analysis_id: "analysis_1711447200_1a2b3c4d".into(),
            correlation_id: Uuid::nil(),
            source_file: "input/sales.csv".into(),
            processed_file: "processed/sales_processed_20240326_101500.csv".into(),
            records_analyzed: 12_345,
            raw_output: String::new(),
            insights: vec![Insight {
                insight_type: "market_trend".into(),
                description: "Samsung <b>leads</b> & grows".into(),
                confidence: Level::High,
            }],
            anomalies,
            recommendations: vec![Recommendation {
                category: "pricing".into(),
                action: "Review flagship prices".into(),
                priority: Level::Medium,
            }],
            summary: "Healthy quarter".into(),
            parse_degraded: false,
            notified: false,
            notified_at: None,
            analysis_timestamp: Utc::now(),
            expires_at: 0,
        }
    }

    fn anomaly(severity: Level) -> Anomaly {
        Anomaly {
            anomaly_type: "price_anomaly".into(),
            description: "Price far above median".into(),
            severity,
        }
    }

    #[test]
    fn test_subject_tiers() {
        let prefix = "Data Analysis Report";
        assert_eq!(
            render_subject(&result_with(vec![anomaly(Level::High)]), prefix),
            "ALERT: Data Analysis Report - High Priority Anomalies Detected (analysis_1711447200_1a2b3c4d)"
        );
        assert_eq!(
            render_subject(&result_with(vec![anomaly(Level::Low)]), prefix),
            "Data Analysis Report - Anomalies Detected (analysis_1711447200_1a2b3c4d)"
        );
        assert_eq!(
            render_subject(&result_with(vec![]), prefix),
            "Data Analysis Report - All Normal (analysis_1711447200_1a2b3c4d)"
        );
    }

    #[test]
    fn test_body_escapes_model_text() {
        let message = render_message(&result_with(vec![]), "Report");
        assert!(message.html_body.contains("Samsung &lt;b&gt;leads&lt;/b&gt; &amp; grows"));
        assert!(!message.html_body.contains("<b>leads"));
        assert!(message.text_body.contains("Samsung <b>leads</b> & grows"));
    }

    #[test]
    fn test_body_labels_and_counts() {
        let message = render_message(&result_with(vec![anomaly(Level::High)]), "Report");
        assert!(message.html_body.contains("<strong>Market Trend</strong>"));
        assert!(message.html_body.contains("<strong>Price Anomaly</strong>"));
        assert!(message.html_body.contains("Records Analyzed: 12,345"));
        assert!(message.html_body.contains("Status: HIGH PRIORITY"));
        assert!(message.text_body.contains("- Pricing [MEDIUM]: Review flagship prices"));
    }

    #[test]
    fn test_text_body_layout() {
        let message = render_message(&result_with(vec![anomaly(Level::Low)]), "Report");
        assert!(message.text_body.starts_with("Report\nStatus: ATTENTION NEEDED\nAnalysis ID: analysis_1711447200_1a2b3c4d\n\n"));
        assert!(message
            .text_body
            .contains("Anomalies Detected (1)\n- Price Anomaly [LOW]: Price far above median\n\n"));
        assert!(message.text_body.ends_with("\n"));
        assert!(message.html_body.ends_with("</body>\n</html>\n"));
        assert_eq!(message.html_body.matches("<div class=\"section\">").count(), 4);
    }

    #[test]
    fn test_render_is_deterministic() {
        let result = result_with(vec![anomaly(Level::Medium)]);
        assert_eq!(render_message(&result, "R"), render_message(&result, "R"));
    }

    #[test]
    fn test_title_label() {
        assert_eq!(title_label("price_anomaly"), "Price Anomaly");
        assert_eq!(title_label("HIGH_value"), "High Value");
        assert_eq!(title_label(""), "General");
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }
}
