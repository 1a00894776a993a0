//! Small helpers shared by config, the HTTP gateway and the entity services.

/// Trim optional text; blank input becomes `None`.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Accept an `http://` or `https://` base URL and strip trailing slashes.
///
/// Returns `None` for any other scheme so callers can report it in their own
/// error type.
pub fn http_base_url(value: &str) -> Option<String> {
    let value = value.trim();
    if value.starts_with("http://") || value.starts_with("https://") {
        Some(value.trim_end_matches('/').to_string())
    } else {
        None
    }
}

/// Key under which a timesheet day is stored (`" Mon "` and `"mon"` collide).
pub fn timesheet_day_key(day: &str) -> String {
    day.trim().to_lowercase()
}

/// Cap server error bodies at 180 characters.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
