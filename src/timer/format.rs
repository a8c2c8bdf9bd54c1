//! Human-readable rendering of second counts.

/// Splits a second count into hours, minutes and seconds.
#[must_use]
pub const fn breakdown(total_seconds: i64) -> (i64, i64, i64) {
    let total = if total_seconds < 0 { 0 } else { total_seconds };
    (total / 3600, (total % 3600) / 60, total % 60)
}

/// Renders a second count compactly, omitting zero components:
/// `45s`, `5m`, `5m 3s`, `1h`, `3h 30m`, `1h 0m 5s`.
#[must_use]
pub fn format_duration(total_seconds: i64) -> String {
    let (hours, minutes, seconds) = breakdown(total_seconds);
    match (hours, minutes, seconds) {
        (0, 0, s) => format!("{s}s"),
        (0, m, 0) => format!("{m}m"),
        (0, m, s) => format!("{m}m {s}s"),
        (h, 0, 0) => format!("{h}h"),
        (h, m, 0) => format!("{h}h {m}m"),
        (h, m, s) => format!("{h}h {m}m {s}s"),
    }
}

/// Exact `h/m/s` form used by status reports.
#[must_use]
pub fn format_exact(total_seconds: i64) -> String {
    let (hours, minutes, seconds) = breakdown(total_seconds);
    format!("{hours}h {minutes}m {seconds}s")
}
