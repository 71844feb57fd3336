//! Record Validator
//!
//! Classifies one raw row as a typed [`Record`] or a rejection reason.
//! Pure and total: no I/O, never panics, every row gets a verdict.
//!
//! # Check Order (fail-fast)
//! 1. **Presence**: required fields non-empty (`order_id`, `date`, `model`,
//!    `brand`, `price`, `region`)
//! 2. **Coercion**: `date` is `YYYY-MM-DD`; numeric fields parse
//! 3. **Bounds**: `0 < price <= 10000`, `release_year` in
//!    `2000..=current_year + 1`, `ram` in `1..=32`, `storage > 0`
//! 4. **Enumeration**: `region` is one of the six allowed names
//!
//! The first failing check determines the reason. Optional numeric cells
//! that are empty or `N/A` count as absent.

use crate::models::{RawRow, Record, Region, REQUIRED_FIELDS};
use chrono::{Datelike, NaiveDate, Utc};

/// Rejection reason attached to an invalid row
pub type Rejection = String;

const MAX_PRICE: f64 = 10_000.0;
const MIN_RELEASE_YEAR: i32 = 2000;
const MAX_RAM_GB: u32 = 32;

#[derive(Debug, Clone)]
pub struct RecordValidator {
    current_year: i32,
}

impl Default for RecordValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordValidator {
    /// Validator that bounds release years by today's date
    pub fn new() -> Self {
        Self {
            current_year: Utc::now().year(),
        }
    }

    /// Validator with a fixed reference year
    pub fn with_current_year(current_year: i32) -> Self {
        Self { current_year }
    }

    pub fn validate(&self, row: &RawRow) -> Result<Record, Rejection> {
        // 1. Presence
        for field in REQUIRED_FIELDS {
            if cell(row, field).is_none() {
                return Err(format!("missing required field: {}", field));
            }
        }
        let required = |field: &str| cell(row, field).unwrap_or_default();

        // 2. Coercion
        let date_raw = required("date");
        let date = NaiveDate::parse_from_str(date_raw, "%Y-%m-%d")
            .map_err(|_| format!("invalid date format: expected YYYY-MM-DD, got '{}'", date_raw))?;

        let price_raw = required("price");
        let price: f64 = price_raw
            .parse()
            .ok()
            .filter(|p: &f64| p.is_finite())
            .ok_or_else(|| format!("invalid price format: '{}' is not a number", price_raw))?;

        let release_year = optional_number(row, "release_year")?;
        let ram = optional_number(row, "ram")?;
        let storage = optional_number(row, "storage")?;

        // 3. Bounds
        if price <= 0.0 || price > MAX_PRICE {
            return Err(format!("price out of range: {} (must be > 0 and <= {})", price_raw, MAX_PRICE));
        }
        let release_year = match release_year {
            Some(year) => {
                let max_year = i64::from(self.current_year) + 1;
                if !(i64::from(MIN_RELEASE_YEAR)..=max_year).contains(&year) {
                    return Err(format!(
                        "release_year out of range: {} (must be {}-{})",
                        year, MIN_RELEASE_YEAR, max_year
                    ));
                }
                i32::try_from(year).ok()
            }
            None => None,
        };
        let ram = match ram {
            Some(gb) if !(1..=i64::from(MAX_RAM_GB)).contains(&gb) => {
                return Err(format!("ram out of range: {} (must be 1-{} GB)", gb, MAX_RAM_GB));
            }
            other => other.and_then(|gb| u32::try_from(gb).ok()),
        };
        let storage = match storage {
            Some(gb) if gb <= 0 => {
                return Err(format!("storage out of range: {} (must be > 0 GB)", gb));
            }
            Some(gb) => Some(
                u32::try_from(gb)
                    .map_err(|_| format!("storage out of range: {} (must be at most {} GB)", gb, u32::MAX))?,
            ),
            None => None,
        };

        // 4. Enumeration
        let region_raw = required("region");
        let region: Region = region_raw
            .parse()
            .map_err(|_| format!("invalid region: {}", region_raw))?;

        Ok(Record {
            order_id: required("order_id").to_string(),
            date,
            model: required("model").to_string(),
            brand: required("brand").to_string(),
            release_year,
            price,
            region,
            customer_review: cell(row, "customer_review").map(str::to_string),
            ram,
            storage,
            color: cell(row, "color").map(str::to_string),
        })
    }
}

/// Trimmed, non-empty cell value
fn cell<'a>(row: &'a RawRow, field: &str) -> Option<&'a str> {
    row.get(field).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Parse an optional whole-number cell; empty and `N/A` are absent
///
/// Sign and magnitude are left to the bounds checks.
fn optional_number(row: &RawRow, field: &str) -> Result<Option<i64>, Rejection> {
    match cell(row, field) {
        None => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("N/A") => Ok(None),
        Some(v) => v
            .parse::<i64>()
            .map(Some)
            .map_err(|_| format!("invalid {} format: '{}' is not a whole number", field, v)),
    }
}
