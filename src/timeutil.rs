use chrono::{DateTime, Duration, SecondsFormat, Utc};

pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now_str() -> String {
    format_utc(Utc::now())
}

pub fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Start of the minute bucket containing `dt`, as stored in
/// `rate_limit_counters.window_start`.
pub fn minute_window(dt: DateTime<Utc>) -> String {
    let secs = dt.timestamp() - dt.timestamp().rem_euclid(60);
    match DateTime::<Utc>::from_timestamp(secs, 0) {
        Some(floored) => format_utc(floored),
        None => format_utc(dt),
    }
}

/// Seconds remaining until the next minute window opens.
pub fn secs_to_next_window(dt: DateTime<Utc>) -> i64 {
    60 - dt.timestamp().rem_euclid(60)
}

pub fn plus_seconds(dt: DateTime<Utc>, secs: i64) -> String {
    format_utc(dt + Duration::seconds(secs))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn minute_window_floors_to_minute() {
        let dt = parse_utc("2026-03-01T10:15:42Z").unwrap();
        assert_eq!(minute_window(dt), "2026-03-01T10:15:00Z");
    }

    #[test]
    fn secs_to_next_window_counts_down() {
        let dt = parse_utc("2026-03-01T10:15:42Z").unwrap();
        assert_eq!(secs_to_next_window(dt), 18);
    }
}
