//! Sales records

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// One parsed CSV row: column name → raw cell text
pub type RawRow = HashMap<String, String>;

/// Fields that must be present and non-empty, in check order
pub const REQUIRED_FIELDS: [&str; 6] = ["order_id", "date", "model", "brand", "price", "region"];

/// Column order used when writing records back out
pub const CANONICAL_FIELDS: [&str; 11] = [
    "order_id",
    "date",
    "model",
    "brand",
    "release_year",
    "price",
    "region",
    "customer_review",
    "ram",
    "storage",
    "color",
];

/// Sales region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "North America")]
    NorthAmerica,
    #[serde(rename = "South America")]
    SouthAmerica,
    Europe,
    Asia,
    Africa,
    Oceania,
}

impl Region {
    pub const ALL: [Region; 6] = [
        Region::NorthAmerica,
        Region::SouthAmerica,
        Region::Europe,
        Region::Asia,
        Region::Africa,
        Region::Oceania,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::NorthAmerica => "North America",
            Region::SouthAmerica => "South America",
            Region::Europe => "Europe",
            Region::Asia => "Asia",
            Region::Africa => "Africa",
            Region::Oceania => "Oceania",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = ();

    /// Exact match against the allowed names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::ALL.into_iter().find(|r| r.as_str() == s).ok_or(())
    }
}

/// A validated sales record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub order_id: String,
    pub date: NaiveDate,
    pub model: String,
    pub brand: String,
    pub release_year: Option<i32>,
    pub price: f64,
    pub region: Region,
    pub customer_review: Option<String>,
    /// GB
    pub ram: Option<u32>,
    /// GB
    pub storage: Option<u32>,
    pub color: Option<String>,
}

impl Record {
    /// Cell values in [`CANONICAL_FIELDS`] order; absent optionals are empty
    pub fn to_csv_fields(&self) -> Vec<String> {
        fn opt<T: ToString>(v: &Option<T>) -> String {
            v.as_ref().map(ToString::to_string).unwrap_or_default()
        }

        vec![
            self.order_id.clone(),
            self.date.format("%Y-%m-%d").to_string(),
            self.model.clone(),
            self.brand.clone(),
            opt(&self.release_year),
            self.price.to_string(),
            self.region.as_str().to_string(),
            opt(&self.customer_review),
            opt(&self.ram),
            opt(&self.storage),
            opt(&self.color),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_parse_is_exact() {
        assert_eq!("North America".parse::<Region>(), Ok(Region::NorthAmerica));
        assert!("north america".parse::<Region>().is_err());
        assert!("Antarctica".parse::<Region>().is_err());
    }

    #[test]
    fn test_region_serializes_display_name() {
        let json = serde_json::to_string(&Region::SouthAmerica).unwrap();
        assert_eq!(json, "\"South America\"");
    }

    #[test]
    fn test_csv_fields_follow_canonical_order() {
        let record = Record {
            order_id: "ORD-1".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            model: "Pixel 8".into(),
            brand: "Google".into(),
            release_year: Some(2023),
            price: 699.0,
            region: Region::Europe,
            customer_review: None,
            ram: Some(8),
            storage: None,
            color: Some("Obsidian".into()),
        };

        let fields = record.to_csv_fields();
        assert_eq!(fields.len(), CANONICAL_FIELDS.len());
        assert_eq!(fields[1], "2024-03-01");
        assert_eq!(fields[5], "699");
        assert_eq!(fields[6], "Europe");
        assert_eq!(fields[7], "");
        assert_eq!(fields[9], "");
    }
}
