// Timezone handling
//
// All times are stored UTC. User-facing strings render in the user's IANA
// timezone; invalid timezones are rejected at write boundaries and a missing
// timezone falls back to "UTC".

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::{CoreError, Result};

/// Validate an IANA timezone string
pub fn validate_timezone(tz: &str) -> Result<Tz> {
    tz.parse::<Tz>()
        .map_err(|_| CoreError::validation(format!("invalid timezone: {tz}")))
}

/// Resolve a possibly-missing timezone, defaulting to UTC
pub fn resolve_timezone(tz: Option<&str>) -> Tz {
    tz.and_then(|s| s.parse::<Tz>().ok()).unwrap_or(Tz::UTC)
}

/// Format a UTC instant for user-facing text in the given timezone
pub fn format_in_timezone(instant: DateTime<Utc>, tz: Tz) -> String {
    instant
        .with_timezone(&tz)
        .format("%Y-%m-%d %H:%M (%Z)")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn validates_iana_names() {
        assert!(validate_timezone("America/New_York").is_ok());
        assert!(validate_timezone("Europe/Berlin").is_ok());
        assert!(validate_timezone("Mars/Olympus").is_err());
        assert!(validate_timezone("").is_err());
    }

    #[test]
    fn missing_timezone_defaults_to_utc() {
        assert_eq!(resolve_timezone(None), Tz::UTC);
        assert_eq!(resolve_timezone(Some("not-a-tz")), Tz::UTC);
        assert_eq!(
            resolve_timezone(Some("Asia/Tokyo")),
            "Asia/Tokyo".parse::<Tz>().unwrap()
        );
    }

    #[test]
    fn formats_in_user_zone() {
        let instant = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let tokyo = resolve_timezone(Some("Asia/Tokyo"));
        let formatted = format_in_timezone(instant, tokyo);
        assert!(formatted.starts_with("2026-03-01 21:00"));
    }
}
