//! Byte formatting and transfer progress helpers.

pub mod progress_stream;

pub use progress_stream::ProgressStream;

/// Format a byte count as a human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format a transfer rate, given the bytes moved and the time it took
pub fn format_rate(bytes: u64, elapsed: std::time::Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return format!("{}/s", format_bytes(bytes));
    }
    format!("{}/s", format_bytes((bytes as f64 / secs) as u64))
}
