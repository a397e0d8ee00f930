//! Display helpers shared by every provider when building API payloads.

/// Placeholder rendered whenever a provider could not report a value.
pub const UNKNOWN: &str = "N/A";

const KIB: f64 = 1024.0;
const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * 1024 * 1024;

/// Renders a byte count as `KB` below 1 MiB, `MB` below 1 GiB and `GB` from
/// 1 GiB upwards.
pub fn format_size(bytes: u64) -> String {
    if bytes >= GIB {
        format!("{:.2} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.0} MB", bytes as f64 / MIB as f64)
    } else {
        format!("{:.0} KB", bytes as f64 / KIB)
    }
}

/// Same as [`format_size`] but treats `0`/missing as unknown.
pub fn format_size_or_unknown(bytes: Option<u64>) -> String {
    match bytes {
        Some(bytes) if bytes > 0 => format_size(bytes),
        _ => UNKNOWN.to_string(),
    }
}

/// Compact view counter: `999`, `1.5K`, `2.5M`.
pub fn format_views(views: u64) -> String {
    if views >= 1_000_000 {
        format!("{:.1}M", views as f64 / 1_000_000.0)
    } else if views >= 1_000 {
        format!("{:.1}K", views as f64 / 1_000.0)
    } else {
        views.to_string()
    }
}

/// Renders a duration as `M:SS`. Minutes are not folded into hours, so a
/// 90 minute video reads `90:00`.
pub fn format_duration(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
