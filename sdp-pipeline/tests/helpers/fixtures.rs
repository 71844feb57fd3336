//! Batch file and model reply fixtures

pub const BATCH_HEADER: &str =
    "order_id,date,model,brand,release_year,price,region,customer_review,ram,storage,color";

pub const GOOD_ROW_1: &str = "ORD-1001,2024-03-01,Galaxy S23,Samsung,2023,899.99,Europe,Great phone,8,256,Black";
pub const GOOD_ROW_2: &str = "ORD-1002,2024-03-02,iPhone 15,Apple,2023,1099.00,North America,,6,128,Blue";
pub const MISSING_PRICE_ROW: &str = "ORD-1003,2024-03-03,Pixel 8,Google,2023,,Asia,Solid,8,128,White";

/// Header plus the given rows, newline-terminated
pub fn sample_batch(rows: &[&str]) -> String {
    let mut body = String::from(BATCH_HEADER);
    body.push('\n');
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }
    body
}

/// Well-formed model reply with one high-severity anomaly
pub const MODEL_REPLY: &str = r#"Here is the analysis:
{
  "insights": [
    {"type": "pricing", "description": "Premium models dominate revenue", "confidence": "medium"}
  ],
  "anomalies": [
    {"type": "price_outlier", "description": "iPhone 15 priced above regional average", "severity": "high"}
  ],
  "recommendations": [
    {"category": "pricing", "action": "Review North America pricing", "priority": "high"}
  ],
  "summary": "Two orders analyzed; one pricing outlier."
}"#;

/// Fixture row keyed by [`BATCH_HEADER`] columns
pub fn raw_row(row: &str) -> sdp_pipeline::models::RawRow {
    BATCH_HEADER
        .split(',')
        .zip(row.split(','))
        .map(|(h, v)| (h.to_string(), v.to_string()))
        .collect()
}
