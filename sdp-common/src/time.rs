//! Timestamp utilities

use chrono::{DateTime, Duration, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Compact timestamp used in output object keys (`20240326_101500`)
pub fn key_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// Expiry instant for a record created at `created_at` with a TTL in days
pub fn expires_at(created_at: DateTime<Utc>, ttl_days: i64) -> DateTime<Utc> {
    created_at + Duration::days(ttl_days)
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01
    }

    #[test]
    fn test_key_timestamp_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 26, 10, 15, 0).unwrap();
        assert_eq!(key_timestamp(at), "20240326_101500");
    }

    #[test]
    fn test_expires_at_adds_days() {
        let at = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(expires_at(at, 30), Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_millis_to_duration() {
        assert_eq!(millis_to_duration(1500), std::time::Duration::from_millis(1500));
    }
}
